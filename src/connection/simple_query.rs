//! Simple query cycle (spec §4.4).

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::state::{ConnectionState, TransactionStatus};
use crate::dispatcher::split::split_statements;
use crate::dispatcher::{Dispatcher, TransactionEffect};
use crate::errors::Result;
use crate::messages::backend::{self, ErrorFields};
use crate::stats::snapshot::QueryKind;
use crate::stats::Collector;
use crate::utils::clock::{elapsed_ms, monotonic_now};

pub async fn handle_query<W: AsyncWrite + Unpin>(
    writer: &mut W,
    sql_batch: &str,
    state: &mut ConnectionState,
    dispatcher: &dyn Dispatcher,
) -> Result<()> {
    let statements = split_statements(sql_batch);

    if statements.is_empty() {
        writer.write_all(&backend::empty_query_response()).await?;
        writer
            .write_all(&backend::ready_for_query(state.transaction_status.status_byte()))
            .await?;
        writer.flush().await?;
        return Ok(());
    }

    let collector = Collector::global();

    for sql in &statements {
        let started = monotonic_now();
        match dispatcher.dispatch(sql, &state.session, state.transaction_status) {
            Ok(outcome) => {
                let duration = elapsed_ms(started);
                collector.record_query(state.connection_id, sql, duration, outcome.kind, true);

                if !outcome.columns.is_empty() || !outcome.rows.is_empty() {
                    writer.write_all(&backend::row_description(&outcome.columns)).await?;
                    for row in &outcome.rows {
                        let raw: Vec<Option<Vec<u8>>> = row.iter().map(|v| v.bytes.clone()).collect();
                        writer.write_all(&backend::data_row(&raw)).await?;
                    }
                }

                if let Some(notice) = &outcome.notice {
                    let fields = ErrorFields::new("NOTICE", notice.code, notice.message.clone());
                    writer.write_all(&backend::notice_response(&fields)).await?;
                }

                let tag = command_tag(outcome.kind, &outcome.command_tag_prefix, outcome.rows.len());
                writer.write_all(&backend::command_complete(&tag)).await?;

                apply_effect(state, outcome.effect);
            }
            Err(err) => {
                collector.record_query(state.connection_id, sql, elapsed_ms(started), QueryKind::Other, false);

                if state.transaction_status == TransactionStatus::InTransaction {
                    state.transaction_status = TransactionStatus::FailedTransaction;
                }

                let fields = ErrorFields::new(err.severity(), err.sqlstate(), err.to_string());
                writer.write_all(&backend::error_response(&fields)).await?;
                break;
            }
        }
    }

    writer
        .write_all(&backend::ready_for_query(state.transaction_status.status_byte()))
        .await?;
    writer.flush().await?;
    Ok(())
}

fn apply_effect(state: &mut ConnectionState, effect: TransactionEffect) {
    state.transaction_status = match effect {
        TransactionEffect::None => state.transaction_status,
        TransactionEffect::Begin => TransactionStatus::InTransaction,
        TransactionEffect::Commit | TransactionEffect::Rollback => TransactionStatus::Idle,
    };
}

fn command_tag(kind: QueryKind, prefix: &str, row_count: usize) -> String {
    match kind {
        QueryKind::Select | QueryKind::Show => format!("{prefix} {row_count}"),
        QueryKind::Insert => format!("INSERT 0 {row_count}"),
        QueryKind::Update | QueryKind::Delete => format!("{prefix} {row_count}"),
        _ => prefix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::state::SessionInfo;
    use crate::dispatcher::DemoDialect;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

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

    async fn collect_output(
        state: &mut ConnectionState,
        sql: &str,
    ) -> Vec<u8> {
        use tokio::io::AsyncReadExt;
        let (mut client, mut server) = tokio::io::duplex(8192);
        handle_query(&mut server, sql, state, &DemoDialect).await.unwrap();
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn select_one_emits_full_cycle() {
        let mut state = state();
        let out = collect_output(&mut state, "SELECT 1;").await;
        assert_eq!(out[0], b'T'); // RowDescription
        assert!(out.windows(b"SELECT 1".len()).any(|w| w == b"SELECT 1"));
        assert_eq!(*out.last().unwrap(), b'I');
    }

    #[tokio::test]
    async fn error_sets_failed_transaction_status() {
        let mut state = state();
        state.transaction_status = TransactionStatus::InTransaction;
        collect_output(&mut state, "SELECT bogus_syntax(").await;
        assert_eq!(state.transaction_status, TransactionStatus::FailedTransaction);
    }

    #[tokio::test]
    async fn empty_query_emits_empty_query_response() {
        let mut state = state();
        let out = collect_output(&mut state, "").await;
        assert_eq!(out[0], b'I');
    }
}
