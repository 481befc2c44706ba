//! Per-connection stats detail: last activity, byte counters and the
//! in-flight statement text, kept as packed atomic state built with the
//! `iota!` macro.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::utils::clock::now_ms;

iota::iota! {
    pub const CONN_STATE_IDLE: u8 = iota;
        , CONN_STATE_ACTIVE
        , CONN_STATE_IDLE_IN_TRANSACTION
}

/// Live detail for one open connection, held in the collector's connection
/// map and removed on disconnect (or by the periodic sweeper as a
/// backstop if disconnect cleanup was missed).
pub struct ConnectionDetail {
    pub connection_id: u64,
    pub remote_addr: String,
    pub created_at_ms: i64,
    last_activity_ms: AtomicI64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    state: std::sync::atomic::AtomicU8,
    current_statement: Mutex<String>,
}

impl ConnectionDetail {
    pub fn new(connection_id: u64, remote_addr: String) -> Self {
        let now = now_ms();
        ConnectionDetail {
            connection_id,
            remote_addr,
            created_at_ms: now,
            last_activity_ms: AtomicI64::new(now),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            state: std::sync::atomic::AtomicU8::new(CONN_STATE_IDLE),
            current_statement: Mutex::new(String::new()),
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn add_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
        self.touch();
    }

    pub fn add_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Relaxed) == CONN_STATE_ACTIVE
    }

    pub fn set_current_statement(&self, sql: &str) {
        let mut guard = self.current_statement.lock();
        guard.clear();
        guard.push_str(sql);
    }

    pub fn current_statement(&self) -> String {
        self.current_statement.lock().clone()
    }
}
