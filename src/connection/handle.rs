//! The per-connection task: startup handshake, authentication, and the
//! main message loop that dispatches into the simple/extended query
//! cycles (spec §4.2, §4.6).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;

use super::counting_writer::CountingWriter;
use super::extended_query;
use super::simple_query::handle_query;
use super::state::{ConnectionState, Phase, SessionInfo, TransactionStatus};
use crate::auth;
use crate::config::{get_config, AuthMethod};
use crate::dispatcher::Dispatcher;
use crate::errors::{Error, Result};
use crate::messages::backend::{self, ErrorFields};
use crate::messages::codec::Decoder;
use crate::messages::constants::*;
use crate::messages::frontend::{self, FrontendMessage, StartupRequest};
use crate::server::cancel::{CancelHandle, CancelRegistry};
use crate::stats::connection as connection_state;
use crate::stats::Collector;
use crate::utils::buffer_pool::PooledBuffer;

async fn fill_until<F, T>(
    read_half: &mut OwnedReadHalf,
    decoder: &mut Decoder,
    connection_id: u64,
    mut try_decode: F,
) -> Result<T>
where
    F: FnMut(&mut Decoder) -> Result<Option<T>>,
{
    let mut scratch = PooledBuffer::acquire();
    loop {
        if let Some(value) = try_decode(decoder)? {
            return Ok(value);
        }
        scratch.clear();
        let n = read_half.read_buf(&mut *scratch).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        decoder.push_bytes(&scratch);
        if let Some(detail) = Collector::global().connection_detail(connection_id) {
            detail.add_bytes_in(n as u64);
        }
    }
}

/// Drives one accepted TCP connection end to end. Returns once the
/// connection is closed, either by the client, a protocol error, an idle
/// timeout, or server shutdown.
///
/// The write half is kept outside the task that does the actual protocol
/// work so a panic there can still be answered with an `ErrorResponse`:
/// the body runs as its own spawned task, and a panic surfaces here as a
/// `JoinError` with the write half still intact (spec §7).
pub async fn run_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    cancel_registry: CancelRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let write_half = Arc::new(AsyncMutex::new(write_half));

    let body_write_half = write_half.clone();
    let joined = tokio::spawn(run_connection_body(
        read_half,
        body_write_half,
        remote_addr,
        cancel_registry,
        dispatcher,
        shutdown,
    ))
    .await;

    match joined {
        Ok(result) => result,
        Err(join_err) => {
            error!("connection {remote_addr} task ended abnormally: {join_err}");
            let err = Error::Internal("internal error".to_string());
            let fields = ErrorFields::new(err.severity(), err.sqlstate(), err.to_string());
            let mut guard = write_half.lock().await;
            let _ = guard.write_all(&backend::error_response(&fields)).await;
            let _ = guard.flush().await;
            Err(Error::ConnectionClosed)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_body(
    mut read_half: OwnedReadHalf,
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    remote_addr: SocketAddr,
    cancel_registry: CancelRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let config = get_config();
    let general = config.general.clone();
    let mut write_guard = write_half.lock().await;
    let write_half = &mut *write_guard;

    let mut decoder = Decoder::new(general.max_message_bytes.bytes());
    let collector = Collector::global();
    let connection_id = collector.next_connection_id();
    let detail = collector.record_connection_created(connection_id, remote_addr.to_string());

    let outcome = run_startup(
        &mut read_half,
        write_half,
        &mut decoder,
        connection_id,
        &general,
        &cancel_registry,
    )
    .await;

    let (mut state, cancel_handle) = match outcome {
        Ok(StartupOutcome::Connected(state, handle)) => (state, handle),
        Ok(StartupOutcome::CancelHandled) => {
            return Ok(());
        }
        Err(err) => {
            collector.record_connection_error();
            collector.record_connection_destroyed(connection_id, detail.bytes_in(), detail.bytes_out());
            return Err(err);
        }
    };

    if general.log_client_connections_default() {
        info!("connection {connection_id} from {remote_addr} established");
    }

    let idle_timeout = general.idle_timeout_ms.as_std();
    let max_lifetime = general.max_lifetime_ms.map(|d| d.as_std());
    let result = message_loop(
        &mut read_half,
        write_half,
        &mut decoder,
        &mut state,
        dispatcher.as_ref(),
        &cancel_handle,
        idle_timeout,
        max_lifetime,
        &mut shutdown,
    )
    .await;

    cancel_registry.remove(&(state.backend_pid, state.backend_secret));
    collector.record_connection_destroyed(connection_id, detail.bytes_in(), detail.bytes_out());

    if general.log_client_connections_default() {
        let lifetime = crate::utils::format_duration_ms(state.created_at.elapsed().as_secs_f64() * 1000.0);
        info!("connection {connection_id} from {remote_addr} closed after {lifetime}");
    }

    match &result {
        Ok(()) => {}
        Err(err) if matches!(err, Error::ConnectionClosed) => {}
        Err(_) => collector.record_connection_error(),
    }
    result
}

enum StartupOutcome {
    Connected(ConnectionState, CancelHandle),
    CancelHandled,
}

async fn run_startup(
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    decoder: &mut Decoder,
    connection_id: u64,
    general: &crate::config::General,
    cancel_registry: &CancelRegistry,
) -> Result<StartupOutcome> {
    loop {
        let frame = fill_until(read_half, decoder, connection_id, |d| d.try_decode_untagged()).await?;
        let request = frontend::parse_startup(&frame)?;
        match request {
            StartupRequest::Ssl => {
                write_half.write_all(&[b'N']).await?;
                continue;
            }
            StartupRequest::Cancel { pid, secret } => {
                if let Some(entry) = cancel_registry.get(&(pid, secret)) {
                    entry.cancel();
                }
                return Ok(StartupOutcome::CancelHandled);
            }
            StartupRequest::Startup { major, minor, params } => {
                if major != 3 || minor != 0 {
                    let fields = ErrorFields::new("FATAL", "0A000", "unsupported frontend protocol version");
                    write_half.write_all(&backend::error_response(&fields)).await?;
                    return Err(Error::InvalidStartup(format!("unsupported protocol {major}.{minor}")));
                }

                let params: HashMap<String, String> = params.into_iter().collect();
                let user = params.get("user").cloned().unwrap_or_default();
                if user.is_empty() {
                    let fields = ErrorFields::new("FATAL", "0A000", "no user specified in startup packet");
                    write_half.write_all(&backend::error_response(&fields)).await?;
                    return Err(Error::InvalidStartup("missing user parameter".into()));
                }

                if let Err(err) = authenticate(read_half, write_half, decoder, connection_id, general, &user).await {
                    let fields = ErrorFields::new(err.severity(), err.sqlstate(), err.to_string());
                    write_half.write_all(&backend::error_response(&fields)).await?;
                    return Err(err);
                }

                let database = params.get("database").cloned().unwrap_or_else(|| user.clone());
                let application_name = params.get("application_name").cloned().unwrap_or_default();

                let pid = 10_000 + (connection_id as i32 % 2_000_000_000);
                let mut secret_bytes = [0u8; 4];
                rand::rng().fill_bytes(&mut secret_bytes);
                let secret = i32::from_be_bytes(secret_bytes);

                let mut session_params = HashMap::new();
                session_params.insert("server_version".to_string(), general.server_version_string.clone());
                session_params.insert("server_encoding".to_string(), "UTF8".to_string());
                session_params.insert("client_encoding".to_string(), "UTF8".to_string());
                session_params.insert("application_name".to_string(), application_name.clone());
                session_params.insert("DateStyle".to_string(), "ISO, MDY".to_string());
                session_params.insert("IntervalStyle".to_string(), "postgres".to_string());
                session_params.insert("TimeZone".to_string(), "UTC".to_string());
                session_params.insert("integer_datetimes".to_string(), "on".to_string());
                session_params.insert("standard_conforming_strings".to_string(), "on".to_string());

                let session = SessionInfo {
                    user: user.clone(),
                    database,
                    application_name,
                    server_version: general.server_version_string.clone(),
                    params: session_params.clone(),
                };

                let mut state = ConnectionState::new(connection_id, read_half_peer_addr(read_half), pid, secret, session);
                state.phase = Phase::Ready;

                write_half.write_all(&backend::authentication_ok()).await?;
                write_half.write_all(&backend::backend_key_data(pid, secret)).await?;
                for (key, value) in &session_params {
                    write_half.write_all(&backend::parameter_status(key, value)).await?;
                }
                write_half
                    .write_all(&backend::ready_for_query(STATUS_IDLE))
                    .await?;
                write_half.flush().await?;

                let cancel_handle = CancelHandle::new();
                cancel_registry.insert((pid, secret), cancel_handle.clone());

                return Ok(StartupOutcome::Connected(state, cancel_handle));
            }
        }
    }
}

/// `OwnedReadHalf` doesn't expose the peer address; `ConnectionState` wants
/// one for observability, so the caller threads it through at accept time
/// instead in the real code path. Tests construct `ConnectionState`
/// directly, so this indirection only matters here.
fn read_half_peer_addr(_read_half: &OwnedReadHalf) -> SocketAddr {
    "0.0.0.0:0".parse().unwrap()
}

async fn authenticate(
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    decoder: &mut Decoder,
    connection_id: u64,
    general: &crate::config::General,
    user: &str,
) -> Result<()> {
    let password = auth::lookup_password(&general.users, general.auth_method, user)?;
    match general.auth_method {
        AuthMethod::Trust => Ok(()),
        AuthMethod::Cleartext => {
            write_half.write_all(&backend::authentication_cleartext_password()).await?;
            write_half.flush().await?;
            let frame = fill_until(read_half, decoder, connection_id, |d| d.try_decode_tagged()).await?;
            let FrontendMessage::PasswordMessage(received) = frontend::parse_tagged(&frame)? else {
                return Err(Error::ProtocolViolation("expected PasswordMessage".into()));
            };
            auth::verify_cleartext(password.unwrap_or_default(), &received, user)
        }
        AuthMethod::Md5 => {
            let salt = auth::generate_md5_salt();
            write_half.write_all(&backend::authentication_md5_password(salt)).await?;
            write_half.flush().await?;
            let frame = fill_until(read_half, decoder, connection_id, |d| d.try_decode_tagged()).await?;
            let FrontendMessage::PasswordMessage(received) = frontend::parse_tagged(&frame)? else {
                return Err(Error::ProtocolViolation("expected PasswordMessage".into()));
            };
            auth::verify_md5(password.unwrap_or_default(), user, salt, &received)
        }
    }
}

/// Writes `ErrorResponse(FATAL, ...)` and flushes when `err.is_fatal()`,
/// then returns it — the shared tail of every fatal decode/parse path in
/// [`message_loop`] (spec §4.2's "any state, fatal protocol error" row).
async fn emit_fatal_and_return<T>(write_half: &mut OwnedWriteHalf, err: Error) -> Result<T> {
    if err.is_fatal() {
        let fields = ErrorFields::new("FATAL", err.sqlstate(), err.to_string());
        write_half.write_all(&backend::error_response(&fields)).await?;
        write_half.flush().await?;
    }
    Err(err)
}

#[allow(clippy::too_many_arguments)]
async fn message_loop(
    read_half: &mut OwnedReadHalf,
    write_half: &mut OwnedWriteHalf,
    decoder: &mut Decoder,
    state: &mut ConnectionState,
    dispatcher: &dyn Dispatcher,
    cancel_handle: &CancelHandle,
    idle_timeout: Duration,
    max_lifetime: Option<Duration>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let collector = Collector::global();
    let mut scratch = PooledBuffer::acquire();
    let lifetime_deadline = max_lifetime.map(|d| state.created_at + d);

    loop {
        if let Some(deadline) = lifetime_deadline {
            if tokio::time::Instant::from_std(deadline) <= tokio::time::Instant::now() {
                collector.record_connection_timeout();
                let fields = ErrorFields::new("FATAL", "57P05", "terminating connection due to max lifetime");
                write_half.write_all(&backend::error_response(&fields)).await?;
                write_half.flush().await?;
                return Err(Error::ConnectionClosed);
            }
        }

        let frame = loop {
            match decoder.try_decode_tagged() {
                Ok(Some(frame)) => break frame,
                Ok(None) => {}
                Err(err) => return emit_fatal_and_return(write_half, err).await,
            }
            let read_timeout = match lifetime_deadline {
                Some(deadline) => idle_timeout.min(deadline.saturating_duration_since(std::time::Instant::now())),
                None => idle_timeout,
            };
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let fields = ErrorFields::new("FATAL", "57P01", Error::AdminShutdown.to_string());
                        write_half.write_all(&backend::error_response(&fields)).await?;
                        write_half.flush().await?;
                        return Err(Error::AdminShutdown);
                    }
                }
                read_result = tokio::time::timeout(read_timeout, async {
                    scratch.clear();
                    read_half.read_buf(&mut *scratch).await
                }) => {
                    match read_result {
                        Ok(Ok(0)) => return Err(Error::ConnectionClosed),
                        Ok(Ok(n)) => {
                            decoder.push_bytes(&scratch);
                            if let Some(detail) = collector.connection_detail(state.connection_id) {
                                detail.add_bytes_in(n as u64);
                                detail.touch();
                            }
                        }
                        Ok(Err(err)) => return Err(Error::Io(err)),
                        Err(_elapsed) => {
                            let timed_out_for_lifetime = lifetime_deadline
                                .is_some_and(|d| d <= std::time::Instant::now());
                            collector.record_connection_timeout();
                            let reason = if timed_out_for_lifetime {
                                "terminating connection due to max lifetime"
                            } else {
                                "terminating connection due to idle timeout"
                            };
                            let fields = ErrorFields::new("FATAL", "57P05", reason);
                            write_half.write_all(&backend::error_response(&fields)).await?;
                            write_half.flush().await?;
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }
            }
        };

        state.touch();
        let message = match frontend::parse_tagged(&frame) {
            Ok(message) => message,
            Err(err) => return emit_fatal_and_return(write_half, err).await,
        };
        let is_extended = !matches!(message, FrontendMessage::Query(_) | FrontendMessage::Terminate);
        collector.record_protocol_message(frame.kind.unwrap_or(b'?') as char, is_extended);

        if let Some(detail) = collector.connection_detail(state.connection_id) {
            detail.set_state(connection_state::CONN_STATE_ACTIVE);
            if let FrontendMessage::Query(sql) = &message {
                detail.set_current_statement(sql);
            }
        }

        let mut writer = CountingWriter::new(write_half);

        match message {
            FrontendMessage::Terminate => return Ok(()),
            FrontendMessage::Query(sql) => {
                state.phase = Phase::InSimpleQuery;
                handle_query(&mut writer, &sql, state, dispatcher).await?;
                state.phase = Phase::Ready;
            }
            FrontendMessage::Parse(msg) => {
                state.phase = Phase::InExtendedQuery;
                extended_query::handle_parse(&mut writer, state, dispatcher, msg).await?;
            }
            FrontendMessage::Bind(msg) => {
                extended_query::handle_bind(&mut writer, state, dispatcher, msg).await?;
            }
            FrontendMessage::Describe { kind, name } => {
                extended_query::handle_describe(&mut writer, state, kind, name).await?;
            }
            FrontendMessage::Execute { portal, max_rows } => {
                extended_query::handle_execute(&mut writer, state, cancel_handle, portal, max_rows).await?;
            }
            FrontendMessage::Close { kind, name } => {
                extended_query::handle_close(&mut writer, state, kind, name).await?;
            }
            FrontendMessage::Sync => {
                extended_query::handle_sync(&mut writer, state).await?;
                state.phase = Phase::Ready;
            }
            FrontendMessage::Flush => {
                extended_query::handle_flush(&mut writer).await?;
            }
            FrontendMessage::PasswordMessage(_) => {
                drop(writer);
                let err = Error::ProtocolViolation("unexpected PasswordMessage after startup".into());
                return emit_fatal_and_return(write_half, err).await;
            }
        }

        if let Some(detail) = collector.connection_detail(state.connection_id) {
            detail.add_bytes_out(writer.bytes_written());
            let idle_state = if state.transaction_status == TransactionStatus::InTransaction
                || state.transaction_status == TransactionStatus::FailedTransaction
            {
                connection_state::CONN_STATE_IDLE_IN_TRANSACTION
            } else {
                connection_state::CONN_STATE_IDLE
            };
            detail.set_state(idle_state);
        }
    }
}
