//! Stats collector (spec §4.7): atomic counters, a per-connection detail
//! map, a fixed-bucket histogram and a slow-query ring, exposed through a
//! pull-based [`Collector::snapshot`] and a push-based event stream
//! (`subscribe`/`on`).
//!
//! Per-connection state is packed atomics (`record_connection_created`,
//! `record_query`, etc.) behind a global singleton, exposed as a
//! process-wide static much like a connection pooler's own client/pool
//! stats tables.

pub mod connection;
pub mod histogram;
pub mod snapshot;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use self::connection::ConnectionDetail;
use self::histogram::Histogram;
use self::snapshot::{QueryKind, QueryStatus, SlowQueryEntry, Stats};
use crate::utils::clock::now_ms;

const DEFAULT_SLOW_QUERY_CAPACITY: usize = 100;
const DEFAULT_SLOW_THRESHOLD_MS: f64 = 100.0;
const CLEANUP_MAX_AGE_MS: i64 = 3_600_000;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One occurrence pushed to stats event subscribers (spec §4.7, §9). The
/// channel is bounded and drop-oldest: a subscriber that falls behind
/// observes a gap (`RecvError::Lagged`) rather than back-pressuring the
/// protocol path that emits these.
#[derive(Debug, Clone)]
pub enum StatsEvent {
    ConnectionCreated { connection_id: u64 },
    ConnectionDestroyed { connection_id: u64, bytes_in: u64, bytes_out: u64 },
    ConnectionError,
    ConnectionTimeout,
    ProtocolMessage { kind: char, extended: bool },
    PreparedStatementHit,
    PreparedStatementMiss,
    Query { connection_id: u64, kind: QueryKind, status: QueryStatus, duration_ms: f64 },
}

/// Process-wide stats collector, backed by a global static. Construct via
/// [`Collector::global`].
pub struct Collector {
    enabled: std::sync::atomic::AtomicBool,

    connections_total: AtomicU64,
    connections_destroyed_total: AtomicU64,
    connection_errors_total: AtomicU64,
    connection_timeouts_total: AtomicU64,
    bytes_received_total: AtomicU64,
    bytes_sent_total: AtomicU64,

    queries_total: DashMap<(QueryKind, QueryStatus), AtomicU64>,
    query_duration: Histogram,

    protocol_messages_total: DashMap<char, AtomicU64>,
    protocol_extended_usage_total: AtomicU64,
    protocol_simple_usage_total: AtomicU64,

    prepared_statement_hits_total: AtomicU64,
    prepared_statement_misses_total: AtomicU64,

    connections: DashMap<u64, Arc<ConnectionDetail>>,
    slow_queries: Mutex<VecDeque<SlowQueryEntry>>,
    slow_threshold_ms: std::sync::atomic::AtomicU64,

    next_connection_id: AtomicU64,
    events: broadcast::Sender<StatsEvent>,
}

static COLLECTOR: Lazy<Collector> = Lazy::new(Collector::new);

impl Collector {
    pub fn new() -> Self {
        Collector {
            enabled: std::sync::atomic::AtomicBool::new(true),
            connections_total: AtomicU64::new(0),
            connections_destroyed_total: AtomicU64::new(0),
            connection_errors_total: AtomicU64::new(0),
            connection_timeouts_total: AtomicU64::new(0),
            bytes_received_total: AtomicU64::new(0),
            bytes_sent_total: AtomicU64::new(0),
            queries_total: DashMap::new(),
            query_duration: Histogram::default(),
            protocol_messages_total: DashMap::new(),
            protocol_extended_usage_total: AtomicU64::new(0),
            protocol_simple_usage_total: AtomicU64::new(0),
            prepared_statement_hits_total: AtomicU64::new(0),
            prepared_statement_misses_total: AtomicU64::new(0),
            connections: DashMap::new(),
            slow_queries: Mutex::new(VecDeque::with_capacity(DEFAULT_SLOW_QUERY_CAPACITY)),
            slow_threshold_ms: std::sync::atomic::AtomicU64::new(DEFAULT_SLOW_THRESHOLD_MS as u64),
            next_connection_id: AtomicU64::new(1),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribes to the raw event stream. Lagging receivers miss older
    /// events rather than stalling the sender (spec §9).
    pub fn subscribe(&self) -> broadcast::Receiver<StatsEvent> {
        self.events.subscribe()
    }

    /// Registers `handler` to run on a dedicated task for every event,
    /// skipping over gaps left by a lagging subscription (spec §4.7's
    /// `on(event, handler)`).
    pub fn on<F>(&self, mut handler: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(StatsEvent) + Send + 'static,
    {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn emit(&self, event: StatsEvent) {
        let _ = self.events.send(event);
    }

    pub fn global() -> &'static Collector {
        &COLLECTOR
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_slow_threshold_ms(&self, ms: u64) {
        self.slow_threshold_ms.store(ms, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_connection_created(&self, id: u64, remote_addr: String) -> Arc<ConnectionDetail> {
        let detail = Arc::new(ConnectionDetail::new(id, remote_addr));
        if self.is_enabled() {
            self.connections_total.fetch_add(1, Ordering::Relaxed);
            self.connections.insert(id, detail.clone());
            self.emit(StatsEvent::ConnectionCreated { connection_id: id });
        }
        detail
    }

    pub fn record_connection_destroyed(&self, id: u64, bytes_in: u64, bytes_out: u64) {
        if !self.is_enabled() {
            return;
        }
        self.connections_destroyed_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_received_total.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_sent_total.fetch_add(bytes_out, Ordering::Relaxed);
        self.connections.remove(&id);
        self.emit(StatsEvent::ConnectionDestroyed { connection_id: id, bytes_in, bytes_out });
    }

    pub fn record_connection_error(&self) {
        if self.is_enabled() {
            self.connection_errors_total.fetch_add(1, Ordering::Relaxed);
            self.emit(StatsEvent::ConnectionError);
        }
    }

    pub fn record_connection_timeout(&self) {
        if self.is_enabled() {
            self.connection_timeouts_total.fetch_add(1, Ordering::Relaxed);
            self.emit(StatsEvent::ConnectionTimeout);
        }
    }

    pub fn record_protocol_message(&self, kind: char, extended: bool) {
        if !self.is_enabled() {
            return;
        }
        self.protocol_messages_total
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        if extended {
            self.protocol_extended_usage_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.protocol_simple_usage_total.fetch_add(1, Ordering::Relaxed);
        }
        self.emit(StatsEvent::ProtocolMessage { kind, extended });
    }

    pub fn record_prepared_statement_hit(&self) {
        if self.is_enabled() {
            self.prepared_statement_hits_total.fetch_add(1, Ordering::Relaxed);
            self.emit(StatsEvent::PreparedStatementHit);
        }
    }

    pub fn record_prepared_statement_miss(&self) {
        if self.is_enabled() {
            self.prepared_statement_misses_total.fetch_add(1, Ordering::Relaxed);
            self.emit(StatsEvent::PreparedStatementMiss);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_query(
        &self,
        connection_id: u64,
        sql: &str,
        duration_ms: f64,
        kind: QueryKind,
        ok: bool,
    ) {
        if !self.is_enabled() {
            return;
        }
        let status = if ok { QueryStatus::Ok } else { QueryStatus::Error };
        self.queries_total
            .entry((kind, status))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.query_duration.observe(duration_ms);
        self.emit(StatsEvent::Query { connection_id, kind, status, duration_ms });

        let threshold = self.slow_threshold_ms.load(Ordering::Relaxed) as f64;
        if duration_ms >= threshold {
            let mut ring = self.slow_queries.lock();
            if ring.len() == DEFAULT_SLOW_QUERY_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(SlowQueryEntry {
                connection_id,
                sql: sql.to_string(),
                duration_ms,
                recorded_at_ms: now_ms(),
            });
        }
    }

    pub fn connection_detail(&self, id: u64) -> Option<Arc<ConnectionDetail>> {
        self.connections.get(&id).map(|e| e.clone())
    }

    /// Removes per-connection detail entries whose last activity is older
    /// than `CLEANUP_MAX_AGE_MS`, bounding memory if a disconnect's cleanup
    /// was missed (spec §4.7).
    pub fn sweep_stale_connections(&self) {
        let cutoff = now_ms() - CLEANUP_MAX_AGE_MS;
        self.connections.retain(|_, detail| detail.last_activity_ms() >= cutoff);
    }

    pub fn snapshot(&self) -> Stats {
        if !self.is_enabled() {
            return Stats::disabled();
        }

        let mut active = 0u64;
        let mut idle = 0u64;
        for entry in self.connections.iter() {
            if entry.value().is_active() {
                active += 1;
            } else {
                idle += 1;
            }
        }

        let mut queries_total = HashMap::new();
        for kind in QueryKind::ALL {
            for status in [QueryStatus::Ok, QueryStatus::Error] {
                let count = self
                    .queries_total
                    .get(&(kind, status))
                    .map(|v| v.load(Ordering::Relaxed))
                    .unwrap_or(0);
                queries_total.insert((kind, status), count);
            }
        }

        let mut protocol_messages_total = HashMap::new();
        for entry in self.protocol_messages_total.iter() {
            protocol_messages_total.insert(*entry.key(), entry.value().load(Ordering::Relaxed));
        }

        Stats {
            enabled: true,
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: active,
            connections_idle: idle,
            connections_destroyed_total: self.connections_destroyed_total.load(Ordering::Relaxed),
            connection_errors_total: self.connection_errors_total.load(Ordering::Relaxed),
            connection_timeouts_total: self.connection_timeouts_total.load(Ordering::Relaxed),
            bytes_received_total: self.bytes_received_total.load(Ordering::Relaxed),
            bytes_sent_total: self.bytes_sent_total.load(Ordering::Relaxed),
            queries_total,
            query_duration: self.query_duration.snapshot(),
            protocol_messages_total,
            protocol_extended_usage_total: self.protocol_extended_usage_total.load(Ordering::Relaxed),
            protocol_simple_usage_total: self.protocol_simple_usage_total.load(Ordering::Relaxed),
            prepared_statement_hits_total: self.prepared_statement_hits_total.load(Ordering::Relaxed),
            prepared_statement_misses_total: self.prepared_statement_misses_total.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.lock().iter().cloned().collect(),
        }
    }
}

/// Spawns the periodic sweeper task described in spec §4.7.
pub fn spawn_sweeper(interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            Collector::global().sweep_stale_connections();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_snapshot_has_full_key_shape() {
        let collector = Collector::new();
        collector.set_enabled(false);
        let snap = collector.snapshot();
        assert!(!snap.enabled);
        assert_eq!(snap.queries_total.len(), QueryKind::ALL.len() * 2);
    }

    #[test]
    fn record_query_updates_counters_and_histogram() {
        let collector = Collector::new();
        collector.record_query(1, "SELECT 1", 12.0, QueryKind::Select, true);
        let snap = collector.snapshot();
        assert_eq!(snap.queries_total[&(QueryKind::Select, QueryStatus::Ok)], 1);
        assert_eq!(snap.query_duration.count, 1);
    }

    #[test]
    fn slow_query_ring_bounds_capacity() {
        let collector = Collector::new();
        collector.set_slow_threshold_ms(1);
        for i in 0..(DEFAULT_SLOW_QUERY_CAPACITY + 10) {
            collector.record_query(1, &format!("SELECT {i}"), 5.0, QueryKind::Select, true);
        }
        let snap = collector.snapshot();
        assert_eq!(snap.slow_queries.len(), DEFAULT_SLOW_QUERY_CAPACITY);
    }

    #[test]
    fn connection_lifecycle_updates_active_counts() {
        let collector = Collector::new();
        let id = collector.next_connection_id();
        collector.record_connection_created(id, "127.0.0.1:1".into());
        assert_eq!(collector.snapshot().connections_total, 1);
        collector.record_connection_destroyed(id, 10, 20);
        assert_eq!(collector.snapshot().connections_destroyed_total, 1);
        assert_eq!(collector.snapshot().bytes_received_total, 10);
    }

    #[tokio::test]
    async fn subscribers_observe_emitted_events() {
        let collector = Collector::new();
        let mut rx = collector.subscribe();
        let id = collector.next_connection_id();
        collector.record_connection_created(id, "127.0.0.1:1".into());
        match rx.recv().await.unwrap() {
            StatsEvent::ConnectionCreated { connection_id } => assert_eq!(connection_id, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn disabled_collector_does_not_emit() {
        let collector = Collector::new();
        collector.set_enabled(false);
        let mut rx = collector.subscribe();
        collector.record_connection_error();
        assert!(rx.try_recv().is_err());
    }
}
