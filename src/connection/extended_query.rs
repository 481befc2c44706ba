//! Extended query cycle: Parse/Bind/Describe/Execute/Close/Sync/Flush
//! (spec §4.5), including the poisoning rule after an in-sequence error.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::objects::{Portal, PreparedStatement};
use super::state::{ConnectionState, TransactionStatus};
use crate::dispatcher::{Dispatcher, TransactionEffect};
use crate::errors::{Error, Result};
use crate::messages::backend::{self, ErrorFields};
use crate::messages::frontend::{BindMessage, ObjectKind, ParseMessage};
use crate::messages::types::{FormatCode, Value};
use crate::server::cancel::CancelHandle;
use crate::stats::Collector;
use crate::utils::clock::{elapsed_ms, monotonic_now};

/// Applies the "poisoning" rule: once `state.poisoned` is set, every
/// subsequent extended-query message produces nothing until Sync
/// (spec §4.5, invariant 5). Callers should check this before doing any
/// other work for Parse/Bind/Describe/Execute.
fn poisoned(state: &ConnectionState) -> bool {
    state.poisoned
}

async fn send_error<W: AsyncWrite + Unpin>(writer: &mut W, state: &mut ConnectionState, err: &Error) -> Result<()> {
    if state.transaction_status == TransactionStatus::InTransaction {
        state.transaction_status = TransactionStatus::FailedTransaction;
    }
    let fields = ErrorFields::new(err.severity(), err.sqlstate(), err.to_string());
    writer.write_all(&backend::error_response(&fields)).await?;
    state.poisoned = true;
    Ok(())
}

pub async fn handle_parse<W: AsyncWrite + Unpin>(
    writer: &mut W,
    state: &mut ConnectionState,
    dispatcher: &dyn Dispatcher,
    msg: ParseMessage,
) -> Result<()> {
    if poisoned(state) {
        return Ok(());
    }
    // Dispatch is pure (it doesn't apply `effect` or mutate `session`), so
    // running it here just to read off `columns` is safe even though Bind
    // will dispatch the same statement again once parameters are bound.
    // A statement this dialect can't resolve at Parse time (bad syntax,
    // an unset SHOW parameter) just leaves result columns unknown; the
    // error resurfaces naturally at Bind.
    let inferred_result_columns = dispatcher
        .dispatch(&msg.sql, &state.session, state.transaction_status)
        .map(|outcome| outcome.columns)
        .unwrap_or_default();

    state.prepared_statements.insert(
        msg.statement.clone(),
        PreparedStatement {
            name: msg.statement,
            sql_text: msg.sql,
            param_oids: msg.param_oids,
            inferred_result_columns,
        },
    );
    writer.write_all(&backend::parse_complete()).await?;
    Ok(())
}

pub async fn handle_bind<W: AsyncWrite + Unpin>(
    writer: &mut W,
    state: &mut ConnectionState,
    dispatcher: &dyn Dispatcher,
    msg: BindMessage,
) -> Result<()> {
    if poisoned(state) {
        return Ok(());
    }

    let collector = Collector::global();
    let statement = match state.prepared_statements.get(&msg.statement) {
        Some(s) => s.clone(),
        None => {
            collector.record_prepared_statement_miss();
            let err = Error::MissingObject {
                kind: "prepared statement",
                name: msg.statement,
            };
            return send_error(writer, state, &err).await;
        }
    };
    collector.record_prepared_statement_hit();

    let bound_params: Vec<Value> = msg
        .params_raw
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let format = pick_format(&msg.param_formats, i);
            let oid = statement
                .param_oids
                .get(i)
                .copied()
                .unwrap_or(crate::messages::types::oid::UNKNOWN);
            Value {
                type_oid: oid,
                format,
                bytes: raw,
            }
        })
        .collect();

    let outcome = match dispatcher.dispatch(&statement.sql_text, &state.session, state.transaction_status) {
        Ok(outcome) => outcome,
        Err(err) => return send_error(writer, state, &err).await,
    };

    apply_effect(state, outcome.effect);

    let result_formats = if msg.result_formats.is_empty() {
        vec![FormatCode::Text; outcome.columns.len()]
    } else if msg.result_formats.len() == 1 {
        vec![msg.result_formats[0]; outcome.columns.len()]
    } else {
        msg.result_formats
    };

    state.portals.insert(
        msg.portal.clone(),
        Portal {
            name: msg.portal,
            statement_name: statement.name.clone(),
            bound_params,
            param_formats: msg.param_formats,
            result_formats,
            cursor_position: 0,
            exhausted: false,
            rows: outcome.rows,
            columns: outcome.columns,
            command_tag_prefix: outcome.command_tag_prefix,
            cancelled: false,
        },
    );

    writer.write_all(&backend::bind_complete()).await?;
    Ok(())
}

fn pick_format(formats: &[FormatCode], i: usize) -> FormatCode {
    if formats.is_empty() {
        FormatCode::Text
    } else if formats.len() == 1 {
        formats[0]
    } else {
        formats.get(i).copied().unwrap_or(FormatCode::Text)
    }
}

fn apply_effect(state: &mut ConnectionState, effect: TransactionEffect) {
    state.transaction_status = match effect {
        TransactionEffect::None => state.transaction_status,
        TransactionEffect::Begin => TransactionStatus::InTransaction,
        TransactionEffect::Commit | TransactionEffect::Rollback => TransactionStatus::Idle,
    };
}

pub async fn handle_describe<W: AsyncWrite + Unpin>(
    writer: &mut W,
    state: &mut ConnectionState,
    kind: ObjectKind,
    name: String,
) -> Result<()> {
    if poisoned(state) {
        return Ok(());
    }
    match kind {
        ObjectKind::Statement => {
            let statement = state.prepared_statements.get(&name).cloned();
            match statement {
                Some(s) => {
                    writer.write_all(&backend::parameter_description(&s.param_oids)).await?;
                    if s.inferred_result_columns.is_empty() {
                        writer.write_all(&backend::no_data()).await?;
                    } else {
                        writer
                            .write_all(&backend::row_description(&s.inferred_result_columns))
                            .await?;
                    }
                }
                None => {
                    let err = Error::MissingObject {
                        kind: "prepared statement",
                        name,
                    };
                    return send_error(writer, state, &err).await;
                }
            }
        }
        ObjectKind::Portal => {
            let portal = state.portals.get(&name).cloned();
            match portal {
                Some(p) if !p.columns.is_empty() => {
                    writer.write_all(&backend::row_description(&p.columns)).await?;
                }
                Some(_) => {
                    writer.write_all(&backend::no_data()).await?;
                }
                None => {
                    let err = Error::MissingObject { kind: "portal", name };
                    return send_error(writer, state, &err).await;
                }
            }
        }
    }
    Ok(())
}

pub async fn handle_execute<W: AsyncWrite + Unpin>(
    writer: &mut W,
    state: &mut ConnectionState,
    cancel: &CancelHandle,
    portal_name: String,
    max_rows: i32,
) -> Result<()> {
    if poisoned(state) {
        return Ok(());
    }

    let Some(portal) = state.portals.get(&portal_name) else {
        let err = Error::MissingObject {
            kind: "portal",
            name: portal_name,
        };
        return send_error(writer, state, &err).await;
    };

    let started = monotonic_now();
    let limit = if max_rows <= 0 { usize::MAX } else { max_rows as usize };
    let start = portal.cursor_position as usize;
    let end = (start + limit).min(portal.rows.len());
    let batch: Vec<Vec<Option<Vec<u8>>>> = portal.rows[start..end]
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, v)| v.render(*portal.result_formats.get(i).unwrap_or(&FormatCode::Text)))
                .collect()
        })
        .collect();
    let total_rows = portal.rows.len();
    let tag = portal.command_tag_prefix.clone();

    let mut cancelled_at = None;
    for raw in &batch {
        if cancel.is_cancelled() {
            cancel.reset();
            cancelled_at = Some(());
            break;
        }
        writer.write_all(&backend::data_row(raw)).await?;
    }

    if let Some(()) = cancelled_at {
        if let Some(portal) = state.portals.get_mut(&portal_name) {
            portal.cursor_position = end as u64;
        }
        Collector::global().record_query(
            state.connection_id,
            &tag,
            elapsed_ms(started),
            crate::stats::snapshot::QueryKind::Other,
            false,
        );
        let err = Error::QueryCanceled;
        return send_error(writer, state, &err).await;
    }

    let finished = end >= total_rows;
    if let Some(portal) = state.portals.get_mut(&portal_name) {
        portal.cursor_position = end as u64;
        portal.exhausted = finished;
    }

    Collector::global().record_query(
        state.connection_id,
        &tag,
        elapsed_ms(started),
        crate::stats::snapshot::QueryKind::Other,
        true,
    );

    if finished {
        let full_tag = if tag == "OTHER 0" || ends_with_count(&tag) {
            tag
        } else {
            format!("{tag} {total_rows}")
        };
        writer.write_all(&backend::command_complete(&full_tag)).await?;
    } else {
        writer.write_all(&backend::portal_suspended()).await?;
    }
    Ok(())
}

fn ends_with_count(tag: &str) -> bool {
    tag.split_whitespace().last().map(|s| s.chars().all(|c| c.is_ascii_digit())).unwrap_or(false)
}

pub async fn handle_close<W: AsyncWrite + Unpin>(
    writer: &mut W,
    state: &mut ConnectionState,
    kind: ObjectKind,
    name: String,
) -> Result<()> {
    if poisoned(state) {
        return Ok(());
    }
    match kind {
        ObjectKind::Statement => state.close_statement(&name),
        ObjectKind::Portal => state.close_portal(&name),
    }
    writer.write_all(&backend::close_complete()).await?;
    Ok(())
}

pub async fn handle_sync<W: AsyncWrite + Unpin>(writer: &mut W, state: &mut ConnectionState) -> Result<()> {
    state.discard_unnamed();
    state.poisoned = false;
    writer
        .write_all(&backend::ready_for_query(state.transaction_status.status_byte()))
        .await?;
    writer.flush().await?;
    Ok(())
}

pub async fn handle_flush<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::state::SessionInfo;
    use crate::dispatcher::DemoDialect;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::io::AsyncReadExt;

    fn state() -> ConnectionState {
        ConnectionState::new(
            1,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5432),
            100,
            200,
            SessionInfo {
                user: "alice".to_string(),
                database: "postgres".to_string(),
                application_name: "test".to_string(),
                server_version: "16.0 (pg_wire_mock)".to_string(),
                params: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn parse_bind_describe_execute_sync_cycle() {
        let mut state = state();
        let (mut client, mut server) = tokio::io::duplex(8192);

        handle_parse(
            &mut server,
            &mut state,
            &DemoDialect,
            ParseMessage {
                statement: String::new(),
                sql: "SELECT 1".to_string(),
                param_oids: Vec::new(),
            },
        )
        .await
        .unwrap();

        handle_bind(
            &mut server,
            &mut state,
            &DemoDialect,
            BindMessage {
                portal: String::new(),
                statement: String::new(),
                param_formats: Vec::new(),
                params_raw: Vec::new(),
                result_formats: vec![FormatCode::Text],
            },
        )
        .await
        .unwrap();

        handle_describe(&mut server, &mut state, ObjectKind::Portal, String::new())
            .await
            .unwrap();

        let cancel = CancelHandle::new();
        handle_execute(&mut server, &mut state, &cancel, String::new(), 0)
            .await
            .unwrap();

        handle_sync(&mut server, &mut state).await.unwrap();

        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        assert_eq!(out[0], b'1'); // ParseComplete
        assert!(out.contains(&b'2')); // BindComplete somewhere in the stream
        assert_eq!(*out.last().unwrap(), b'I');
    }

    #[tokio::test]
    async fn describe_statement_infers_result_columns_from_parse() {
        let mut state = state();
        let (mut client, mut server) = tokio::io::duplex(8192);

        handle_parse(
            &mut server,
            &mut state,
            &DemoDialect,
            ParseMessage {
                statement: "s1".to_string(),
                sql: "SELECT 1".to_string(),
                param_oids: Vec::new(),
            },
        )
        .await
        .unwrap();

        handle_describe(&mut server, &mut state, ObjectKind::Statement, "s1".to_string())
            .await
            .unwrap();

        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out[0], b't'); // ParameterDescription
        assert!(out.contains(&b'T')); // RowDescription, not NoData ('n')
    }

    #[tokio::test]
    async fn bind_against_unknown_statement_is_missing_object() {
        let mut state = state();
        let (mut client, mut server) = tokio::io::duplex(8192);
        handle_bind(
            &mut server,
            &mut state,
            &DemoDialect,
            BindMessage {
                portal: String::new(),
                statement: "nope".to_string(),
                param_formats: Vec::new(),
                params_raw: Vec::new(),
                result_formats: Vec::new(),
            },
        )
        .await
        .unwrap();
        assert!(state.poisoned);
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out[0], b'E');
    }

    #[tokio::test]
    async fn poisoned_sequence_suppresses_further_messages_until_sync() {
        let mut state = state();
        state.poisoned = true;
        let (mut client, mut server) = tokio::io::duplex(8192);
        handle_parse(
            &mut server,
            &mut state,
            &DemoDialect,
            ParseMessage {
                statement: String::new(),
                sql: "SELECT 1".to_string(),
                param_oids: Vec::new(),
            },
        )
        .await
        .unwrap();
        handle_sync(&mut server, &mut state).await.unwrap();
        assert!(!state.poisoned);
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        // Only ReadyForQuery from Sync should be observable.
        assert_eq!(out[0], b'Z');
    }

    #[tokio::test]
    async fn close_statement_cascades_to_its_portals() {
        let mut state = state();
        state.prepared_statements.insert(
            "s1".to_string(),
            PreparedStatement {
                name: "s1".to_string(),
                sql_text: "SELECT 1".to_string(),
                param_oids: Vec::new(),
                inferred_result_columns: Vec::new(),
            },
        );
        state.portals.insert(
            "p1".to_string(),
            Portal {
                name: "p1".to_string(),
                statement_name: "s1".to_string(),
                bound_params: Vec::new(),
                param_formats: Vec::new(),
                result_formats: Vec::new(),
                cursor_position: 0,
                exhausted: false,
                rows: Vec::new(),
                columns: Vec::new(),
                command_tag_prefix: "SELECT".to_string(),
                cancelled: false,
            },
        );
        let (_client, mut server) = tokio::io::duplex(8192);
        handle_close(&mut server, &mut state, ObjectKind::Statement, "s1".to_string())
            .await
            .unwrap();
        assert!(!state.portals.contains_key("p1"));
    }
}
