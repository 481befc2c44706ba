//! Query dispatcher: a thin evaluator for the demo dialect (spec §4.3)
//! behind a [`Dispatcher`] trait so a delegate evaluator hook (per spec
//! §1) could be substituted without touching the query cycles.

pub mod split;

use crate::connection::state::{SessionInfo, TransactionStatus};
use crate::errors::{Error, Result};
use crate::messages::types::{oid, ColumnDesc, FormatCode, Value};
use crate::stats::snapshot::QueryKind;

/// What a dispatched statement does to the connection's transaction
/// status, beyond producing rows (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEffect {
    None,
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub kind: QueryKind,
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Value>>,
    pub command_tag_prefix: String,
    pub effect: TransactionEffect,
    pub notice: Option<Notice>,
}

impl DispatchOutcome {
    fn rows_result(kind: QueryKind, columns: Vec<ColumnDesc>, rows: Vec<Vec<Value>>) -> Self {
        DispatchOutcome {
            kind,
            columns,
            rows,
            command_tag_prefix: kind.label().to_string(),
            effect: TransactionEffect::None,
            notice: None,
        }
    }

    fn command(kind: QueryKind, tag: &str, effect: TransactionEffect) -> Self {
        DispatchOutcome {
            kind,
            columns: Vec::new(),
            rows: Vec::new(),
            command_tag_prefix: tag.to_string(),
            effect,
            notice: None,
        }
    }
}

/// Evaluates one already-split SQL statement against session context.
/// Implementations MUST NOT mutate `session`/`transaction_status`
/// themselves; the caller applies `effect` after a successful dispatch, as
/// the extended-query cycle needs to apply it at Bind time while simple
/// query applies it at statement-completion time.
pub trait Dispatcher: Send + Sync {
    fn dispatch(
        &self,
        sql: &str,
        session: &SessionInfo,
        transaction_status: TransactionStatus,
    ) -> Result<DispatchOutcome>;
}

/// The built-in demo dialect: `SELECT` literal lists and a handful of
/// pseudo-functions, `SHOW`, and transaction control statements.
#[derive(Debug, Default)]
pub struct DemoDialect;

impl Dispatcher for DemoDialect {
    fn dispatch(
        &self,
        sql: &str,
        session: &SessionInfo,
        transaction_status: TransactionStatus,
    ) -> Result<DispatchOutcome> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Ok(DispatchOutcome::rows_result(QueryKind::Other, Vec::new(), Vec::new()));
        }

        if transaction_status == TransactionStatus::FailedTransaction
            && !is_rollback(trimmed)
        {
            return Err(Error::InvalidTransactionState(
                "current transaction is aborted, commands ignored until end of transaction block"
                    .to_string(),
            ));
        }

        let upper = trimmed.trim_end_matches(';').trim();
        let upper_ci = upper.to_ascii_uppercase();

        if upper_ci == "BEGIN" || upper_ci == "START TRANSACTION" {
            let notice = if transaction_status == TransactionStatus::InTransaction {
                Some(Notice {
                    code: "25001",
                    message: "there is already a transaction in progress".to_string(),
                })
            } else {
                None
            };
            let mut outcome = DispatchOutcome::command(QueryKind::Begin, "BEGIN", TransactionEffect::Begin);
            outcome.notice = notice;
            return Ok(outcome);
        }

        if upper_ci == "COMMIT" || upper_ci == "END" {
            if transaction_status == TransactionStatus::FailedTransaction {
                let mut outcome =
                    DispatchOutcome::command(QueryKind::Rollback, "ROLLBACK", TransactionEffect::Rollback);
                outcome.notice = Some(Notice {
                    code: "01000",
                    message: "current transaction was aborted, commands rolled back".to_string(),
                });
                return Ok(outcome);
            }
            return Ok(DispatchOutcome::command(QueryKind::Commit, "COMMIT", TransactionEffect::Commit));
        }

        if upper_ci == "ROLLBACK" {
            return Ok(DispatchOutcome::command(QueryKind::Rollback, "ROLLBACK", TransactionEffect::Rollback));
        }

        if let Some(rest) = strip_ci_prefix(upper, "SHOW ") {
            return dispatch_show(rest.trim(), session);
        }

        if let Some(rest) = strip_ci_prefix(upper, "SELECT ") {
            return dispatch_select(rest.trim(), session);
        }

        Ok(DispatchOutcome::command(QueryKind::Other, "OTHER 0", TransactionEffect::None))
    }
}

fn is_rollback(sql: &str) -> bool {
    sql.trim().trim_end_matches(';').eq_ignore_ascii_case("rollback")
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn dispatch_show(param: &str, session: &SessionInfo) -> Result<DispatchOutcome> {
    if param.eq_ignore_ascii_case("all") {
        let columns = vec![
            ColumnDesc::unlabeled("name", oid::TEXT),
            ColumnDesc::unlabeled("setting", oid::TEXT),
        ];
        let mut rows: Vec<Vec<Value>> = session
            .params
            .iter()
            .map(|(k, v)| vec![Value::text(oid::TEXT, k.clone()), Value::text(oid::TEXT, v.clone())])
            .collect();
        rows.sort_by(|a, b| a[0].as_text().cmp(&b[0].as_text()));
        return Ok(DispatchOutcome::rows_result(QueryKind::Show, columns, rows));
    }

    let value = session
        .params
        .get(param)
        .cloned()
        .ok_or_else(|| Error::MissingObject {
            kind: "parameter",
            name: param.to_string(),
        })?;
    let columns = vec![ColumnDesc::unlabeled(param, oid::TEXT)];
    let rows = vec![vec![Value::text(oid::TEXT, value)]];
    Ok(DispatchOutcome::rows_result(QueryKind::Show, columns, rows))
}

fn dispatch_select(body: &str, session: &SessionInfo) -> Result<DispatchOutcome> {
    let body = body.trim_end_matches(';').trim();

    match body.to_ascii_lowercase().as_str() {
        "version()" => {
            let columns = vec![ColumnDesc::unlabeled("version", oid::TEXT)];
            let rows = vec![vec![Value::text(oid::TEXT, session.server_version.clone())]];
            return Ok(DispatchOutcome::rows_result(QueryKind::Select, columns, rows));
        }
        "current_user" => {
            let columns = vec![ColumnDesc::unlabeled("current_user", oid::TEXT)];
            let rows = vec![vec![Value::text(oid::TEXT, session.user.clone())]];
            return Ok(DispatchOutcome::rows_result(QueryKind::Select, columns, rows));
        }
        "current_database()" => {
            let columns = vec![ColumnDesc::unlabeled("current_database", oid::TEXT)];
            let rows = vec![vec![Value::text(oid::TEXT, session.database.clone())]];
            return Ok(DispatchOutcome::rows_result(QueryKind::Select, columns, rows));
        }
        _ => {}
    }

    let literals = split_top_level_commas(body);
    let mut columns = Vec::with_capacity(literals.len());
    let mut values = Vec::with_capacity(literals.len());
    for literal in literals {
        let (name, expr) = split_alias(literal.trim());
        let (value, type_oid) = parse_literal(expr).ok_or_else(|| {
            Error::SyntaxError(format!("unsupported expression in demo dialect: {expr}"))
        })?;
        columns.push(ColumnDesc::unlabeled(name.unwrap_or_else(|| "?column?".to_string()), type_oid));
        values.push(value);
    }

    Ok(DispatchOutcome::rows_result(QueryKind::Select, columns, vec![values]))
}

fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn split_alias(expr: &str) -> (Option<String>, &str) {
    let lower = expr.to_ascii_lowercase();
    if let Some(pos) = lower.rfind(" as ") {
        let (value, alias) = expr.split_at(pos);
        return (Some(alias[4..].trim().to_string()), value.trim());
    }
    (None, expr)
}

fn parse_literal(expr: &str) -> Option<(Value, i32)> {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("null") {
        return Some((Value::null(oid::UNKNOWN, FormatCode::Text), oid::UNKNOWN));
    }
    if expr.eq_ignore_ascii_case("true") || expr.eq_ignore_ascii_case("false") {
        let text = if expr.eq_ignore_ascii_case("true") { "t" } else { "f" };
        return Some((Value::text(oid::BOOL, text), oid::BOOL));
    }
    if expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2 {
        let inner = &expr[1..expr.len() - 1];
        return Some((Value::text(oid::TEXT, inner.replace("''", "'")), oid::TEXT));
    }
    if expr.contains('.') {
        if expr.parse::<f64>().is_ok() {
            return Some((Value::text(oid::FLOAT8, expr.to_string()), oid::FLOAT8));
        }
        return None;
    }
    if let Ok(n) = expr.parse::<i32>() {
        return Some((Value::text(oid::INT4, n.to_string()), oid::INT4));
    }
    if expr.parse::<i64>().is_ok() {
        return Some((Value::text(oid::INT8, expr.to_string()), oid::INT8));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn session() -> SessionInfo {
        SessionInfo {
            user: "alice".to_string(),
            database: "postgres".to_string(),
            application_name: "test".to_string(),
            server_version: "16.0 (pg_wire_mock)".to_string(),
            params: HashMap::new(),
        }
    }

    #[test]
    fn select_integer_literal() {
        let outcome = DemoDialect.dispatch("SELECT 1", &session(), TransactionStatus::Idle).unwrap();
        assert_eq!(outcome.columns[0].name, "?column?");
        assert_eq!(outcome.rows[0][0].as_text(), Some("1"));
    }

    #[test]
    fn select_current_user() {
        let outcome = DemoDialect
            .dispatch("SELECT current_user", &session(), TransactionStatus::Idle)
            .unwrap();
        assert_eq!(outcome.rows[0][0].as_text(), Some("alice"));
    }

    #[test]
    fn begin_transitions_and_commit_resets() {
        let begin = DemoDialect.dispatch("BEGIN", &session(), TransactionStatus::Idle).unwrap();
        assert_eq!(begin.effect, TransactionEffect::Begin);
        let commit = DemoDialect
            .dispatch("COMMIT", &session(), TransactionStatus::InTransaction)
            .unwrap();
        assert_eq!(commit.effect, TransactionEffect::Commit);
    }

    #[test]
    fn failed_transaction_rejects_non_rollback() {
        let err = DemoDialect
            .dispatch("SELECT 1", &session(), TransactionStatus::FailedTransaction)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "25P02");
    }

    #[test]
    fn failed_transaction_allows_rollback() {
        let outcome = DemoDialect
            .dispatch("ROLLBACK", &session(), TransactionStatus::FailedTransaction)
            .unwrap();
        assert_eq!(outcome.effect, TransactionEffect::Rollback);
    }

    #[test]
    fn unsupported_expression_is_a_syntax_error() {
        let err = DemoDialect
            .dispatch("SELECT bogus_syntax(", &session(), TransactionStatus::Idle)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "42601");
    }

    #[test]
    fn unrecognised_statement_returns_other_tag() {
        let outcome = DemoDialect
            .dispatch("VACUUM", &session(), TransactionStatus::Idle)
            .unwrap();
        assert_eq!(outcome.command_tag_prefix, "OTHER 0");
    }
}
