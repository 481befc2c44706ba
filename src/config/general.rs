//! The `[general]` config section: all tunables the core recognises.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::byte_size::ByteSize;
use super::duration::MsDuration;
use super::user::AuthMethod;

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    5433
}

fn default_max_connections() -> usize {
    100
}

fn default_idle_timeout_ms() -> MsDuration {
    MsDuration(300_000)
}

fn default_shutdown_grace_ms() -> MsDuration {
    MsDuration(30_000)
}

fn default_max_message_bytes() -> ByteSize {
    ByteSize(1024 * 1024)
}

fn default_server_version_string() -> String {
    "16.0 (pg_wire_mock)".to_string()
}

fn default_slow_query_threshold_ms() -> MsDuration {
    MsDuration(1_000)
}

fn default_stats_enabled() -> bool {
    true
}

fn default_max_lifetime_ms() -> Option<MsDuration> {
    None
}

fn default_log_client_connections() -> bool {
    true
}

/// Recognised configuration keys, spec §6. Every field is optional in the
/// TOML file; missing keys fall back to the defaults below.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct General {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: MsDuration,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: MsDuration,

    #[serde(default)]
    pub max_lifetime_ms: Option<MsDuration>,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: ByteSize,

    #[serde(default)]
    pub auth_method: AuthMethod,

    #[serde(default)]
    pub users: HashMap<String, String>,

    #[serde(default = "default_server_version_string")]
    pub server_version_string: String,

    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: MsDuration,

    #[serde(default = "default_stats_enabled")]
    pub stats_enabled: bool,

    #[serde(default)]
    pub prometheus_listen: Option<String>,

    #[serde(default = "default_log_client_connections")]
    pub log_client_connections: bool,
}

impl General {
    /// Whether connection establishment should log at `info` (`true`) or
    /// `debug` (`false`).
    pub fn log_client_connections_default(&self) -> bool {
        self.log_client_connections
    }
}

impl Default for General {
    fn default() -> Self {
        General {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
            max_message_bytes: default_max_message_bytes(),
            auth_method: AuthMethod::default(),
            users: HashMap::new(),
            server_version_string: default_server_version_string(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
            stats_enabled: default_stats_enabled(),
            prometheus_listen: None,
            log_client_connections: default_log_client_connections(),
        }
    }
}
