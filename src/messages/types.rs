//! Typed shapes shared by the codec, the object tables and the dispatcher:
//! format codes, column descriptors and the tagged [`Value`] variant, per
//! spec §3/§9 ("Dynamic shapes on the wire").

/// Text or binary wire representation of a parameter/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    Text,
    Binary,
}

impl FormatCode {
    pub fn from_i16(v: i16) -> Self {
        if v == 0 {
            FormatCode::Text
        } else {
            FormatCode::Binary
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            FormatCode::Text => 0,
            FormatCode::Binary => 1,
        }
    }
}

/// Well-known type OIDs for the demo dialect's small built-in type set.
pub mod oid {
    pub const BOOL: i32 = 16;
    pub const INT8: i32 = 20;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const FLOAT8: i32 = 701;
    pub const UNKNOWN: i32 = 705;
}

/// A single result column's descriptor, as carried by `RowDescription` /
/// `ParameterDescription`.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    pub table_oid: i32,
    pub column_attnum: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl ColumnDesc {
    pub fn unlabeled(name: impl Into<String>, type_oid: i32) -> Self {
        ColumnDesc {
            name: name.into(),
            table_oid: 0,
            column_attnum: 0,
            type_oid,
            type_size: type_size_for(type_oid),
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }
}

/// Fixed on-wire size for a type OID, or -1 for variable-length types, as
/// `pg_type.typlen` would report.
pub fn type_size_for(type_oid: i32) -> i16 {
    match type_oid {
        oid::BOOL => 1,
        oid::INT4 => 4,
        oid::INT8 | oid::FLOAT8 => 8,
        _ => -1,
    }
}

/// A single parameter or column value: its type, wire format, and raw
/// bytes. `None` represents SQL NULL (wire sentinel length -1).
#[derive(Debug, Clone)]
pub struct Value {
    pub type_oid: i32,
    pub format: FormatCode,
    pub bytes: Option<Vec<u8>>,
}

impl Value {
    pub fn null(type_oid: i32, format: FormatCode) -> Self {
        Value {
            type_oid,
            format,
            bytes: None,
        }
    }

    pub fn text(type_oid: i32, text: impl Into<String>) -> Self {
        Value {
            type_oid,
            format: FormatCode::Text,
            bytes: Some(text.into().into_bytes()),
        }
    }

    pub fn is_null(&self) -> bool {
        self.bytes.is_none()
    }

    /// Decodes this value's bytes as UTF-8 text, the only input
    /// representation the demo dialect's type set accepts in text format.
    pub fn as_text(&self) -> Option<&str> {
        self.bytes
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Renders this value (always produced in text format by the demo
    /// dialect) for the wire in `target` format. Binary encodings cover the
    /// small built-in type set per spec §4.5; anything else falls back to
    /// its text bytes, matching how `unknown`-typed columns are sent.
    pub fn render(&self, target: FormatCode) -> Option<Vec<u8>> {
        let text = self.as_text()?;
        match target {
            FormatCode::Text => Some(text.as_bytes().to_vec()),
            FormatCode::Binary => encode_binary(self.type_oid, text),
        }
    }
}

fn encode_binary(type_oid: i32, text: &str) -> Option<Vec<u8>> {
    match type_oid {
        oid::BOOL => Some(vec![if text == "t" { 1 } else { 0 }]),
        oid::INT4 => text.parse::<i32>().ok().map(|n| n.to_be_bytes().to_vec()),
        oid::INT8 => text.parse::<i64>().ok().map(|n| n.to_be_bytes().to_vec()),
        oid::FLOAT8 => text.parse::<f64>().ok().map(|n| n.to_be_bytes().to_vec()),
        _ => Some(text.as_bytes().to_vec()),
    }
}
