//! The byte-stream abstraction the connection manager talks to.
//!
//! Everything above this layer (connection manager, heartbeat, listener)
//! is transport-agnostic; it only ever calls [`Transport`] methods. The
//! TCP binding in [`tcp`] is the reference implementation exercised by
//! this crate's tests. The WebSocket binding in [`websocket`] sits behind
//! the `websocket` feature and frames the same STOMP bytes as text
//! messages.

pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::codec::CodecError;
use crate::frame::Frame;
#[cfg(feature = "tls")]
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use tcp::TcpTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// How a transport should secure its byte stream. `Disabled` (the
/// default) speaks plaintext; `Default` negotiates TLS with the
/// platform's native root store; `Custom` hands the transport a
/// pre-built `rustls` client config for callers who need mutual TLS or a
/// private CA.
#[derive(Clone, Default)]
pub enum SslMode {
    #[default]
    Disabled,
    Default,
    #[cfg(feature = "tls")]
    Custom(Arc<tokio_rustls::rustls::ClientConfig>),
}

impl std::fmt::Debug for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disabled => f.write_str("Disabled"),
            SslMode::Default => f.write_str("Default"),
            #[cfg(feature = "tls")]
            SslMode::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Bundles the per-attempt parameters a [`Transport::connect`] needs, so
/// adding a new knob doesn't mean touching every binding's call site.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub read_max_chunk_size: usize,
    pub ssl: SslMode,
    pub strict_unknown_commands: bool,
}

/// A candidate broker endpoint. `path` is only meaningful to transports
/// that speak an upper-layer protocol over the byte stream, like the
/// WebSocket binding's URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: ServerAddr, reason: String },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: ServerAddr },

    #[error("connection lost: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection lost: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed by peer")]
    ClosedByPeer,

    #[cfg(feature = "websocket")]
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// The contract the connection manager relies on. Implemented once for
/// TCP and once (behind a feature flag) for WebSocket; the manager is
/// generic over `T: Transport` and never needs to know which.
///
/// A freshly connected `Transport` is used unsplit only for the CONNECT /
/// CONNECTED handshake, which needs one write and one read on the same
/// object before anything else can happen. Once the handshake succeeds,
/// [`Self::split`] hands the connection manager an independent
/// [`Self::Writer`] and [`Self::Reader`] - the writer is shared by every
/// caller that sends a frame, the reader is owned outright by the
/// listener loop, and neither ever waits on a lock the other is holding.
/// This is what lets a pending read on an idle broker coexist with a
/// concurrent `send`/`subscribe`/ack/heartbeat.
pub trait Transport: Sized + Send {
    type Reader: TransportReader + Send;
    type Writer: TransportWriter + Send;

    /// Establishes a fresh transport to `addr`, failing after
    /// `options.timeout`. A transport is always created anew per
    /// connection attempt - there is no reconnect-in-place, which keeps
    /// "at most one active connection" trivially true.
    fn connect(
        addr: &ServerAddr,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<Self, TransportError>> + Send;

    /// Closes both directions. Best-effort; errors are not actionable.
    /// Only used to tear down a transport that failed its handshake,
    /// before it has been split.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Handshake-only write, used to send CONNECT before the transport is split.
    fn write_frame(&mut self, frame: &Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Handshake-only read, used to await CONNECTED before the transport is split.
    fn read_frame(&mut self) -> impl Future<Output = Result<Frame, TransportError>> + Send;

    /// Splits a handshake-complete transport into an independent reader
    /// and writer half.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The read half of a split [`Transport`]. Owned exclusively by the
/// listener loop for the lifetime of one connection; never shared, so a
/// read parked waiting for the next frame never blocks a writer.
pub trait TransportReader: Send {
    fn read_frame(&mut self) -> impl Future<Output = Result<Frame, TransportError>> + Send;
}

/// The write half of a split [`Transport`]. Shared by every caller that
/// puts a frame on the wire - sends, subscribes, acks, heartbeats - and
/// serialized by the connection manager's writer lock.
pub trait TransportWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Writes a bare heartbeat.
    fn write_heartbeat(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection. Best-effort; errors are not actionable.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
