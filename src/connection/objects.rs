//! Extended-query object tables: prepared statements and portals
//! (spec §3, §4.5).

use crate::messages::types::{ColumnDesc, FormatCode, Value};

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub sql_text: String,
    pub param_oids: Vec<i32>,
    pub inferred_result_columns: Vec<ColumnDesc>,
}

#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    pub statement_name: String,
    pub bound_params: Vec<Value>,
    pub param_formats: Vec<FormatCode>,
    pub result_formats: Vec<FormatCode>,
    pub cursor_position: u64,
    pub exhausted: bool,
    /// Materialised rows, produced by the dispatcher at Bind time so
    /// Execute only needs to slice them (the demo dialect never produces
    /// an unbounded result set).
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<ColumnDesc>,
    pub command_tag_prefix: String,
    pub cancelled: bool,
}

impl Portal {
    pub fn remaining(&self) -> usize {
        self.rows.len() - (self.cursor_position as usize).min(self.rows.len())
    }
}
