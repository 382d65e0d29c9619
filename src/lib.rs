//! pendant-link - resilient command/telemetry link to a robot-arm control backend.
//!
//! A teach pendant sends jog and motion commands to the backend and renders
//! the telemetry it pushes back. This crate provides the connection layer
//! for that exchange.
//!
//! # Architecture
//!
//! - **Channel** - one logical WebSocket connection with automatic
//!   exponential-backoff reconnection and subscriber fan-out
//! - **Protocol** - typed views of the pendant's JSON messages
//! - **Backend** - REST client for one-shot actions and position queries
//! - **Commands** - CLI subcommands built on the above
//!
//! # Modules
//!
//! - [`channel`] - Channel manager, reconnection policy, transport seam
//! - [`ws`] - WebSocket transport
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod backend;
pub mod channel;
pub mod commands;
pub mod protocol;
pub mod ws;

pub mod config;
pub mod constants;

// Re-export commonly used types
pub use backend::BackendClient;
pub use channel::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelManager, ChannelStatus, ConnectionState,
};
pub use config::Config;
pub use protocol::{Command, Telemetry};
