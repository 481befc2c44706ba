//! Per-connection authoritative state (spec §3): phase, transaction
//! status, negotiated parameters and the object tables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use ahash::AHashMap;

use super::objects::{Portal, PreparedStatement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    FailedTransaction,
}

impl TransactionStatus {
    pub fn status_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => crate::messages::constants::STATUS_IDLE,
            TransactionStatus::InTransaction => crate::messages::constants::STATUS_IN_TRANSACTION,
            TransactionStatus::FailedTransaction => crate::messages::constants::STATUS_FAILED_TRANSACTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingStartup,
    Authenticating,
    Ready,
    InSimpleQuery,
    InExtendedQuery,
    Terminating,
    Closed,
}

/// Negotiated session identity and GUC-like parameters, shared with the
/// dispatcher so `current_user`/`current_database`/`SHOW` have something
/// to read.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user: String,
    pub database: String,
    pub application_name: String,
    pub server_version: String,
    pub params: HashMap<String, String>,
}

pub struct ConnectionState {
    pub connection_id: u64,
    pub remote_addr: SocketAddr,
    pub created_at: Instant,

    pub protocol_major: i16,
    pub protocol_minor: i16,
    pub session: SessionInfo,

    pub backend_pid: i32,
    pub backend_secret: i32,
    pub transaction_status: TransactionStatus,
    pub phase: Phase,

    pub prepared_statements: AHashMap<String, PreparedStatement>,
    pub portals: AHashMap<String, Portal>,

    /// Set once an extended-query sequence hits an error; every subsequent
    /// message is discarded until the next Sync (spec §4.5 "poisoning").
    pub poisoned: bool,

    pub bytes_in: u64,
    pub bytes_out: u64,
    pub last_activity: Instant,
}

impl ConnectionState {
    pub fn new(
        connection_id: u64,
        remote_addr: SocketAddr,
        backend_pid: i32,
        backend_secret: i32,
        session: SessionInfo,
    ) -> Self {
        let now = Instant::now();
        ConnectionState {
            connection_id,
            remote_addr,
            created_at: now,
            protocol_major: 3,
            protocol_minor: 0,
            session,
            backend_pid,
            backend_secret,
            transaction_status: TransactionStatus::Idle,
            phase: Phase::AwaitingStartup,
            prepared_statements: AHashMap::new(),
            portals: AHashMap::new(),
            poisoned: false,
            bytes_in: 0,
            bytes_out: 0,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Closes a named prepared statement and every portal derived from it
    /// (spec §3 invariant iii).
    pub fn close_statement(&mut self, name: &str) {
        self.prepared_statements.remove(name);
        self.portals.retain(|_, portal| portal.statement_name != name);
    }

    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// Destroys the unnamed statement and portal, run at every Sync
    /// (spec §3 invariant iv).
    pub fn discard_unnamed(&mut self) {
        self.prepared_statements.remove("");
        self.portals.remove("");
    }
}
