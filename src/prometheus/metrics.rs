//! Maps a [`Stats`] snapshot onto the exact Prometheus metric names the
//! data contract requires (spec §6), building a fresh [`Registry`] per
//! scrape rather than keeping long-lived gauges in sync — the snapshot is
//! already the source of truth, so there's nothing to drift.

use prometheus::{
    register_gauge_vec_with_registry, register_histogram_with_registry,
    register_int_gauge_with_registry, Encoder, Registry, TextEncoder,
};

use crate::stats::histogram::BUCKET_EDGES_MS;
use crate::stats::snapshot::Stats;

/// Renders a snapshot as Prometheus text-exposition-format bytes.
pub fn encode(stats: &Stats) -> Vec<u8> {
    let registry = Registry::new();
    populate(&registry, stats);
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let families = registry.gather();
    encoder.encode(&families, &mut buf).expect("encoding metrics never fails for well-formed families");
    buf
}

fn populate(registry: &Registry, stats: &Stats) {
    macro_rules! gauge {
        ($name:expr, $help:expr, $value:expr) => {{
            let g = register_int_gauge_with_registry!($name, $help, registry.clone()).unwrap();
            g.set($value as i64);
        }};
    }

    gauge!("pgwire_connections_total", "Total connections accepted", stats.connections_total);
    gauge!("pgwire_connections_active", "Connections currently executing a query", stats.connections_active);
    gauge!("pgwire_connections_idle", "Connections currently idle", stats.connections_idle);
    gauge!("pgwire_connections_destroyed_total", "Total connections closed", stats.connections_destroyed_total);
    gauge!("pgwire_connection_errors_total", "Total connection-level errors", stats.connection_errors_total);
    gauge!("pgwire_connection_timeouts_total", "Total idle/lifetime timeouts", stats.connection_timeouts_total);
    gauge!("pgwire_bytes_received_total", "Total bytes read from clients", stats.bytes_received_total);
    gauge!("pgwire_bytes_sent_total", "Total bytes written to clients", stats.bytes_sent_total);
    gauge!("pgwire_prepared_statement_hits_total", "Prepared statements reused by name", stats.prepared_statement_hits_total);
    gauge!("pgwire_prepared_statement_misses_total", "Bind/Describe against an unknown statement", stats.prepared_statement_misses_total);
    gauge!("pgwire_protocol_extended_usage_total", "Extended-query messages processed", stats.protocol_extended_usage_total);
    gauge!("pgwire_protocol_simple_usage_total", "Simple-query messages processed", stats.protocol_simple_usage_total);

    let queries = register_gauge_vec_with_registry!(
        "pgwire_queries_total",
        "Completed queries by demo-dialect kind and outcome",
        &["query_type", "status"],
        registry.clone()
    )
    .unwrap();
    for ((kind, status), count) in &stats.queries_total {
        queries
            .with_label_values(&[kind.label(), status.label()])
            .set(*count as f64);
    }

    let messages = register_gauge_vec_with_registry!(
        "pgwire_protocol_messages_total",
        "Frontend messages processed by type byte",
        &["message_type"],
        registry.clone()
    )
    .unwrap();
    for (kind, count) in &stats.protocol_messages_total {
        messages
            .with_label_values(&[&kind.to_string()])
            .set(*count as f64);
    }

    let buckets_seconds: Vec<f64> = BUCKET_EDGES_MS.iter().map(|ms| ms / 1000.0).collect();
    let histogram = register_histogram_with_registry!(
        "pgwire_query_duration_seconds",
        "Query execution latency",
        buckets_seconds,
        registry.clone()
    )
    .unwrap();
    // The snapshot only stores cumulative bucket counts, sum and count, not
    // individual observations; replay the already-cumulative distribution by
    // observing each bucket edge the appropriate number of times so the
    // exported series reflects the real cumulative shape.
    let mut previous = 0u64;
    for (edge, cumulative) in buckets_seconds.iter().zip(stats.query_duration.cumulative_counts.iter()) {
        let in_bucket = cumulative.saturating_sub(previous);
        for _ in 0..in_bucket {
            histogram.observe(*edge);
        }
        previous = *cumulative;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Collector;
    use crate::stats::snapshot::QueryKind;

    #[test]
    fn encodes_known_metric_names() {
        let collector = Collector::new();
        collector.record_query(1, "SELECT 1", 3.0, QueryKind::Select, true);
        let text = String::from_utf8(encode(&collector.snapshot())).unwrap();
        assert!(text.contains("pgwire_connections_total"));
        assert!(text.contains("pgwire_queries_total"));
        assert!(text.contains("pgwire_query_duration_seconds"));
    }
}
