//! Resilient command/telemetry channel to the control backend.
//!
//! A [`ChannelManager`] owns one logical connection. The host subscribes to
//! telemetry, sends commands, and reads a status view for its connection
//! banner. Network loss is reconciled by an exponential-backoff
//! [`ReconnectPolicy`]; an intentional [`ChannelManager::close`] uses the
//! clean close code so it never triggers a retry.
//!
//! # Architecture
//!
//! ```text
//! ChannelManager (handle, host side)
//!     │  commands: connect / send / subscribe / close
//!     ▼
//! driver task (tokio::select! loop, one event at a time)
//!     ├── ConnectionState + ReconnectPolicy
//!     ├── Subscriptions (fan-out in registration order)
//!     └── Connector → FrameSink / FrameStream (ws.rs in production)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let manager = ChannelManager::new(ChannelConfig::new("ws://localhost:8080/ws"));
//! manager.subscribe_type("position_update", |msg| {
//!     log::info!("{:?}", msg.payload());
//!     Ok(())
//! });
//! manager.connect();
//!
//! manager.send(OutboundMessage::try_from(&Command::JogStop)?).await?;
//! manager.close().await;
//! ```

mod driver;
pub mod manager;
pub mod message;
pub mod policy;
pub mod subscriptions;
pub mod transport;

#[cfg(test)]
mod mock;

use std::time::Duration;

use crate::constants::{DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS};

/// Configuration for a channel manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// WebSocket URL of the backend, e.g. `ws://localhost:8080/ws`.
    pub endpoint: String,
    /// Automatic reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt.
    pub base_backoff: Duration,
    /// Upper bound on any single reconnection delay. `None` = unbounded doubling.
    pub max_backoff: Option<Duration>,
}

impl ChannelConfig {
    /// Config for `endpoint` with default reconnection settings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: None,
        }
    }

    /// Fresh reconnection policy for this config.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_reconnect_attempts, self.base_backoff, self.max_backoff)
    }
}

/// Connection state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Connected and ready.
    Open,
    /// Intentional close in progress.
    Closing,
    /// Waiting for the retry timer.
    Reconnecting {
        /// Reconnection attempt number (1-based).
        attempt: u32,
        /// Milliseconds until the retry.
        next_retry_ms: u64,
    },
}

impl ConnectionState {
    /// Whether the channel can send right now.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Connected"),
            Self::Closing => write!(f, "Closing"),
            Self::Reconnecting {
                attempt,
                next_retry_ms,
            } => write!(
                f,
                "Reconnecting (attempt {attempt}, in {:.1}s)",
                *next_retry_ms as f64 / 1000.0
            ),
        }
    }
}

/// Snapshot of the channel for a status badge and error banner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Latest human-readable error. Cleared by `connect()`, `close()` and a
    /// successful open.
    pub error: Option<String>,
    /// Reconnection attempts consumed since the last open.
    pub attempts: u32,
    /// Set once the retry budget is spent; cleared by the next `connect()`.
    pub exhausted: bool,
}

impl ChannelStatus {
    /// Whether the channel is open.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state.is_open()
    }
}

/// Lifecycle notification published by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The connection opened.
    Connected,
    /// The connection closed.
    Disconnected {
        /// Close code (1000 = clean).
        code: u16,
        /// Whether the close was clean.
        clean: bool,
    },
    /// A retry was scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Retry budget.
        max_attempts: u32,
        /// Delay until the attempt.
        delay: Duration,
    },
    /// The retry budget is spent. Terminal until an explicit `connect()`.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// A transport error occurred. Always followed by a state change.
    Error(String),
    /// One inbound message could not be dispatched.
    DispatchFailed(String),
}

/// Error categories, for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure; handled by the reconnection policy.
    TransportError,
    /// Send attempted while not open.
    NotConnected,
    /// Payload could not be interpreted.
    MalformedMessage,
    /// Retry budget spent.
    ReconnectExhausted,
    /// The driver task has stopped.
    Closed,
}

/// Errors that can occur during channel operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Connection-level failure.
    Transport(TransportError),
    /// Send attempted while the channel is not open. The message was dropped.
    NotConnected,
    /// A payload could not be interpreted.
    MalformedMessage(String),
    /// The retry budget is spent.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The driver task has stopped.
    Closed,
}

impl ChannelError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::TransportError,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Self::Closed => ErrorKind::Closed,
        }
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::NotConnected => write!(f, "{}", crate::constants::NOT_CONNECTED_TEXT),
            Self::MalformedMessage(msg) => write!(f, "Malformed message: {msg}"),
            Self::ReconnectExhausted { attempts } => write!(
                f,
                "{} ({attempts} attempts)",
                crate::constants::RECONNECT_EXHAUSTED_TEXT
            ),
            Self::Closed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// Re-exports
pub use manager::ChannelManager;
pub use message::{InboundMessage, OutboundMessage};
pub use policy::ReconnectPolicy;
pub use subscriptions::SubscriptionId;
pub use transport::{Connector, FrameSink, FrameStream, TransportError, TransportEvent};
