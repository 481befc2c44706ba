//! The stats snapshot contract consumed by the Prometheus exporter
//! (spec §3, §6) — field names mirror the metric names the exporter must
//! render so the mapping from snapshot to scrape text is mechanical.

use std::collections::HashMap;

use super::histogram::HistogramSnapshot;

/// The recognised demo-dialect query kinds, used as the `query_type`
/// label on `pgwire_queries_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Show,
    Begin,
    Commit,
    Rollback,
    Other,
}

impl QueryKind {
    pub fn label(self) -> &'static str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
            QueryKind::Show => "SHOW",
            QueryKind::Begin => "BEGIN",
            QueryKind::Commit => "COMMIT",
            QueryKind::Rollback => "ROLLBACK",
            QueryKind::Other => "OTHER",
        }
    }

    pub const ALL: [QueryKind; 9] = [
        QueryKind::Select,
        QueryKind::Insert,
        QueryKind::Update,
        QueryKind::Delete,
        QueryKind::Show,
        QueryKind::Begin,
        QueryKind::Commit,
        QueryKind::Rollback,
        QueryKind::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Ok,
    Error,
}

impl QueryStatus {
    pub fn label(self) -> &'static str {
        match self {
            QueryStatus::Ok => "ok",
            QueryStatus::Error => "error",
        }
    }
}

/// One entry of the slow-query ring (spec §4.7).
#[derive(Debug, Clone)]
pub struct SlowQueryEntry {
    pub connection_id: u64,
    pub sql: String,
    pub duration_ms: f64,
    pub recorded_at_ms: i64,
}

/// A point-in-time read of every counter/gauge/histogram the core
/// maintains. `enabled = false` still produces a fully-shaped zero
/// snapshot so scrape output stays stable.
#[derive(Debug, Clone)]
pub struct Stats {
    pub enabled: bool,

    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_idle: u64,
    pub connections_destroyed_total: u64,
    pub connection_errors_total: u64,
    pub connection_timeouts_total: u64,

    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,

    pub queries_total: HashMap<(QueryKind, QueryStatus), u64>,
    pub query_duration: HistogramSnapshot,

    pub protocol_messages_total: HashMap<char, u64>,
    pub protocol_extended_usage_total: u64,
    pub protocol_simple_usage_total: u64,

    pub prepared_statement_hits_total: u64,
    pub prepared_statement_misses_total: u64,

    pub slow_queries: Vec<SlowQueryEntry>,
}

impl Stats {
    /// A fully-shaped, all-zero snapshot, returned when the collector is
    /// disabled (spec §4.7).
    pub fn disabled() -> Self {
        let mut queries_total = HashMap::new();
        for kind in QueryKind::ALL {
            queries_total.insert((kind, QueryStatus::Ok), 0);
            queries_total.insert((kind, QueryStatus::Error), 0);
        }
        Stats {
            enabled: false,
            connections_total: 0,
            connections_active: 0,
            connections_idle: 0,
            connections_destroyed_total: 0,
            connection_errors_total: 0,
            connection_timeouts_total: 0,
            bytes_received_total: 0,
            bytes_sent_total: 0,
            queries_total,
            query_duration: HistogramSnapshot {
                cumulative_counts: vec![0; super::histogram::BUCKET_EDGES_MS.len() + 1],
                sum_ms: 0.0,
                count: 0,
            },
            protocol_messages_total: HashMap::new(),
            protocol_extended_usage_total: 0,
            protocol_simple_usage_total: 0,
            prepared_statement_hits_total: 0,
            prepared_statement_misses_total: 0,
            slow_queries: Vec::new(),
        }
    }
}
