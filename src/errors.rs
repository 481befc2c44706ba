//! Error taxonomy for the wire-protocol engine.
//!
//! Every variant that can reach a client carries (or derives) a SQLSTATE
//! code via [`Error::sqlstate`], mirroring the `ErrorResponse` fields a
//! real backend would send.

use std::io;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid startup packet: {0}")]
    InvalidStartup(String),

    #[error("authentication failed for user \"{0}\"")]
    AuthenticationFailed(String),

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("{kind} \"{name}\" does not exist")]
    MissingObject { kind: &'static str, name: String },

    #[error("canceling statement due to user request")]
    QueryCanceled,

    #[error("terminating connection due to administrator command")]
    AdminShutdown,

    #[error("sorry, too many clients already")]
    TooManyConnections,

    #[error("message of length {0} exceeds the maximum allowed")]
    MessageTooLarge(usize),

    #[error("client closed connection")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Maps this error to the SQLSTATE five-character code a real backend
    /// would place in the `ErrorResponse`'s `C` field.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Error::ProtocolViolation(_) => "08P01",
            Error::InvalidStartup(_) => "0A000",
            Error::AuthenticationFailed(_) => "28P01",
            Error::SyntaxError(_) => "42601",
            Error::InvalidTransactionState(_) => "25P02",
            Error::MissingObject { .. } => "26000",
            Error::QueryCanceled => "57014",
            Error::AdminShutdown => "57P01",
            Error::TooManyConnections => "53300",
            Error::MessageTooLarge(_) => "08P01",
            Error::ConnectionClosed => "08006",
            Error::Io(_) => "08006",
            Error::Config(_) => "XX000",
            Error::Internal(_) => "XX000",
        }
    }

    /// Severity as it would appear in the `ErrorResponse`'s `S`/`V` fields.
    pub fn severity(&self) -> &'static str {
        match self {
            Error::QueryCanceled
            | Error::SyntaxError(_)
            | Error::InvalidTransactionState(_)
            | Error::MissingObject { .. } => "ERROR",
            Error::AdminShutdown | Error::TooManyConnections | Error::Internal(_) => "FATAL",
            _ => "ERROR",
        }
    }

    /// True if this error should terminate the connection rather than just
    /// abort the current statement/extended-query cycle. The message loop
    /// checks this before deciding whether a caught error also ends the
    /// connection (spec §4.2, §7).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProtocolViolation(_)
                | Error::InvalidStartup(_)
                | Error::AuthenticationFailed(_)
                | Error::AdminShutdown
                | Error::TooManyConnections
                | Error::MessageTooLarge(_)
                | Error::ConnectionClosed
                | Error::Io(_)
                | Error::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
