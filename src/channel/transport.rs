//! Transport seam between the channel driver and the network.
//!
//! The driver never touches sockets directly. A [`Connector`] turns an
//! endpoint into a handshake future; the handshake yields a write half
//! ([`FrameSink`]) and a read half ([`FrameStream`]) that the driver polls
//! from its `tokio::select!` loop.
//!
//! Construction and handshake are deliberately split: [`Connector::open`]
//! is synchronous and fails only when the endpoint itself is unusable,
//! which the driver reports without retrying. Failures of the returned
//! future are network failures and go through the reconnection policy.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

/// Write and read halves of an established connection.
pub type TransportPair = (Box<dyn FrameSink>, Box<dyn FrameStream>);

/// Pending handshake produced by [`Connector::open`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<TransportPair, TransportError>> + Send>>;

/// Builds connections to the control backend.
pub trait Connector: Send + Sync {
    /// Validate `endpoint` and start a handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidEndpoint`] if no connection can be
    /// constructed for `endpoint`.
    fn open(&self, endpoint: &str) -> Result<ConnectFuture, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame with `code` and flush.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next event, or `None` once the stream has ended without a close frame.
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>>;
}

/// Something the backend did on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame. The pendant protocol is text-only.
    Binary(Vec<u8>),
    /// Close frame.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Connection-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint cannot be turned into a connection request.
    InvalidEndpoint(String),
    /// The handshake did not complete.
    ConnectFailed(String),
    /// Read or write failed on an established connection.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {msg}"),
            Self::ConnectFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::Io(msg) => write!(f, "Transport I/O error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}
