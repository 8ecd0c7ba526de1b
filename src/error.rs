// Error taxonomy for the protocol and control layer
// Every failure path returns one of these; nothing here is fatal to the owning task

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced while decoding an inbound wire line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer than the five mandatory fields were present
    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },

    /// Field 0 did not name a known message type
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// A coordinate or timestamp field was not a valid number
    #[error("field {field} is not a valid number: '{value}'")]
    BadNumber { field: &'static str, value: String },

    /// No terminator arrived before the receive buffer limit
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },
}

/// Errors that block an outgoing message before any codec or transport work
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,

    /// Content would break line framing (contains `|`, CR or LF)
    #[error("message content contains a reserved character: {0:?}")]
    ContainsDelimiter(char),
}

/// Errors reported by the location provider facade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission not granted")]
    Permission,

    #[error("no location source is enabled")]
    HardwareDisabled,

    #[error("no location fix within {0:?}")]
    Timeout(std::time::Duration),

    /// A single source failed; only surfaced when every source failed
    #[error("location source failed: {0}")]
    Source(String),
}

/// Errors raised by the connection state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to open transport: {0}")]
    TransportConnect(String),

    #[error("transport I/O failure: {0}")]
    TransportIo(String),

    #[error("not connected")]
    NotConnected,

    /// `connect()` was called while a session is already connecting or connected
    #[error("connect requested while {0:?}")]
    AlreadyActive(ConnectionState),
}

/// Umbrella error for terminal-level operations
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The owning task has shut down and no longer accepts commands
    #[error("terminal task is no longer running")]
    Closed,
}
