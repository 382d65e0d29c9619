//! Application-wide constants for pendant-link.
//!
//! This module centralizes the magic numbers and user-facing strings shared
//! by the channel, the REST client and the CLI.
//!
//! # Categories
//!
//! - **Close codes**: WebSocket status codes the channel reasons about
//! - **Reconnection**: retry budget and backoff defaults
//! - **Timeouts**: network operation timeouts
//! - **Status text**: banner strings surfaced to the operator

use std::time::Duration;

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure. The only code that suppresses reconnection.
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Abnormal closure: the connection dropped without a close frame.
///
/// Also reported for handshake failures.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Reason string sent with an intentional client-side close.
pub const CLIENT_CLOSE_REASON: &str = "client closing";

// ============================================================================
// Reconnection
// ============================================================================

/// Default number of automatic reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnection attempt, in milliseconds.
///
/// Subsequent attempts double it: 1s, 2s, 4s, 8s, 16s.
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for REST calls to the backend.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the CLI waits for the channel to open before giving up on a
/// one-shot command.
pub const COMMAND_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Backend defaults
// ============================================================================

/// Default backend HTTP base URL.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Default WebSocket path on the backend.
pub const DEFAULT_WS_PATH: &str = "/ws";

// ============================================================================
// Status text
// ============================================================================

/// Banner text when a send is attempted while the channel is not open.
pub const NOT_CONNECTED_TEXT: &str = "WebSocket is not connected";

/// Banner text when a connection attempt fails.
pub const CONNECT_FAILED_TEXT: &str = "Failed to connect to the robot control server";

/// Banner text once the retry budget is spent.
pub const RECONNECT_EXHAUSTED_TEXT: &str = "Maximum reconnection attempts reached";
