//! Prometheus metrics sink: maps the stats snapshot contract onto the
//! exact metric names spec §6 requires, and a small scrape endpoint.

pub mod metrics;
pub mod server;

pub use metrics::encode;
