//! Connection manager: the TCP acceptor, bounded per-connection task
//! spawning, idle/lifetime timeouts and graceful shutdown (spec §4.6).
//! An atomic counter bounds concurrency against `max_connections`; on
//! shutdown the same counter is polled down to zero within the
//! configured grace period.

pub mod cancel;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use socket2::SockRef;
#[cfg(not(windows))]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

use self::cancel::CancelRegistry;
use crate::config::General;
use crate::connection::run_connection;
use crate::dispatcher::Dispatcher;
use crate::messages::backend::{self, ErrorFields};
use crate::stats::Collector;

/// Tracks peak concurrency observed since process start (spec §4.6).
pub static PEAK_CONCURRENCY: AtomicUsize = AtomicUsize::new(0);
static CURRENT_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

fn configure_accepted_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock_ref = SockRef::from(stream);
    let _ = sock_ref.set_linger(Some(Duration::from_secs(0)));
}

fn bind_listener(general: &General) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", general.listen_host, general.listen_port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")))?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(general.max_connections as u32)
}

/// Runs the accept loop until SIGINT/SIGTERM, then drains in-flight
/// connections for up to `shutdown_grace_ms` before returning.
pub async fn run(dispatcher: Arc<dyn Dispatcher>) -> std::io::Result<()> {
    let config = crate::config::get_config();
    let general = config.general.clone();

    let listener = bind_listener(&general)?;
    info!("pg_wire_mock listening on {}:{}", general.listen_host, general.listen_port);

    let cancel_registry: CancelRegistry = cancel::new_registry();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = crate::stats::spawn_sweeper(Duration::from_secs(60));

    #[cfg(not(windows))]
    let mut term_signal = unix_signal(SignalKind::terminate())?;
    #[cfg(not(windows))]
    let mut interrupt_signal = unix_signal(SignalKind::interrupt())?;

    if general.prometheus_listen.is_some() && general.stats_enabled {
        let addr = general.prometheus_listen.clone().unwrap();
        tokio::spawn(async move {
            if let Err(err) = crate::prometheus::server::serve(&addr).await {
                error!("prometheus endpoint failed: {err}");
            }
        });
    }

    loop {
        tokio::select! {
            biased;

            #[cfg(not(windows))]
            _ = term_signal.recv() => {
                info!("received SIGTERM, starting graceful shutdown");
                break;
            }
            #[cfg(not(windows))]
            _ = interrupt_signal.recv() => {
                info!("received SIGINT, starting graceful shutdown");
                break;
            }

            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("accept error: {err}");
                        continue;
                    }
                };
                configure_accepted_socket(&stream);

                let current = CURRENT_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
                if current as usize > general.max_connections {
                    CURRENT_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                    warn!("rejecting {remote_addr}: too many clients already");
                    tokio::spawn(reject_too_many(stream));
                    continue;
                }
                let peak = PEAK_CONCURRENCY.fetch_max(current as usize, Ordering::SeqCst).max(current as usize);
                debug!("accepted {remote_addr}, {current} active (peak {peak})");

                let cancel_registry = cancel_registry.clone();
                let dispatcher = dispatcher.clone();
                let shutdown_rx = shutdown_rx.clone();

                tokio::spawn(async move {
                    let result = run_connection(stream, remote_addr, cancel_registry, dispatcher, shutdown_rx).await;
                    if let Err(err) = result {
                        debug!("connection from {remote_addr} ended: {err}");
                    }
                    CURRENT_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                });
            }
        }
    }

    let _ = shutdown_tx.send(true);
    sweeper.abort();

    let grace = general.shutdown_grace_ms.as_std();
    let deadline = tokio::time::Instant::now() + grace;
    while CURRENT_CONNECTIONS.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let remaining = CURRENT_CONNECTIONS.load(Ordering::SeqCst);
    if remaining > 0 {
        warn!("shutdown grace period elapsed with {remaining} connections still active; closing anyway");
    } else {
        info!("all connections drained, shutting down cleanly");
    }
    Ok(())
}

/// Rejects a connection before authentication when `max_connections` is
/// already saturated (spec §4.6, SQLSTATE `53300`).
async fn reject_too_many(mut stream: TcpStream) {
    Collector::global().record_connection_error();
    let fields = ErrorFields::new("FATAL", "53300", "sorry, too many clients already");
    let _ = stream.write_all(&backend::error_response(&fields)).await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_concurrency_tracks_the_high_water_mark() {
        PEAK_CONCURRENCY.store(0, Ordering::SeqCst);
        PEAK_CONCURRENCY.fetch_max(3, Ordering::SeqCst);
        PEAK_CONCURRENCY.fetch_max(1, Ordering::SeqCst);
        assert_eq!(PEAK_CONCURRENCY.load(Ordering::SeqCst), 3);
    }
}
