// ABOUTME: STOMP client error types covering connection, protocol, and handler failures
// ABOUTME: Mirrors the propagation policy in the design doc: connection errors stay local, protocol errors surface at the client scope

use crate::transport::{ServerAddr, TransportError};
use std::io;
use thiserror::Error;

/// Comprehensive error type for STOMP client operations.
///
/// Connection-level failures are handled internally by the connection
/// manager (reconnect, resubscribe) and only ever reach the caller as
/// [`StompError::FailedAllConnectAttempts`]. Protocol-level failures that
/// can't be recovered from surface at the client scope boundary.
#[derive(Debug, Error)]
pub enum StompError {
    /// The connect loop exhausted every server, every retry attempt.
    #[error("failed to connect to any server: {issues:?}")]
    FailedAllConnectAttempts { issues: Vec<(ServerAddr, String)> },

    /// CONNECT was sent but no CONNECTED arrived within the configured timeout.
    #[error("timed out waiting for CONNECTED")]
    ConnectionConfirmationTimeout,

    /// The broker advertised a protocol version other than 1.2.
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    /// A frame arrived where the protocol forbids it (e.g. CONNECTED mid-stream).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The active connection was lost; recoverable by reconnecting.
    #[error("connection lost: {0}")]
    ConnectionLost(#[from] TransportError),

    /// I/O failure not otherwise classified.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// A subscription handler's error was outside its suppressed set and
    /// propagated out of the listener loop.
    #[error("subscription handler error: {0}")]
    Handler(String),

    /// The client was asked to do something that doesn't make sense in
    /// its current state (e.g. send before connect).
    #[error("invalid client state: {0}")]
    InvalidState(String),
}

/// Result type alias for STOMP client operations.
pub type StompResult<T> = Result<T, StompError>;
