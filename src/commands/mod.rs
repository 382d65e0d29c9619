//! CLI subcommand implementations for pendant-link.
//!
//! Commands are organized into submodules by the surface they use:
//!
//! - [`live`] - WebSocket channel commands (watch, jog, stop)
//! - [`rest`] - One-shot REST commands (position, estop, home, programs, run-program)
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use pendant_link::commands;
//!
//! commands::live::watch(&config, &["position_update".into()]).await?;
//! commands::rest::position(&config).await?;
//! ```

pub mod live;
pub mod rest;

// Re-export commonly used functions for convenience
#[doc(inline)]
pub use live::{jog, stop as jog_stop, watch};
#[doc(inline)]
pub use rest::{emergency_stop, home, list_programs, position, run_program, show_program};
