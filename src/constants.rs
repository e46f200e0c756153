//! Application-wide constants for jobwire.
//!
//! Centralizes the timing and protocol constants used by the connection
//! registry and its consumers. Runtime-tunable values (cooldown, keepalive,
//! reconnect policy) are only defaults here; [`crate::config::Config`] can
//! override them.
//!
//! # Categories
//!
//! - **Connection lifecycle**: debounce and keepalive timing
//! - **Reconnection**: default backoff bounds
//! - **Close codes**: WebSocket close codes the registry interprets
//! - **Endpoints**: default addresses used when nothing is configured

use std::time::Duration;

// ============================================================================
// Connection lifecycle
// ============================================================================

/// Minimum time between two connection attempts for the same subject id.
///
/// A second `obtain` inside this window is refused with `None`, which stops
/// open/close storms when several callers ask for the same subject at once.
pub const CONNECT_COOLDOWN: Duration = Duration::from_millis(500);

/// Interval between outbound keepalive probes on an open connection.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest keepalive interval a registry accepts.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Reconnection
// ============================================================================

/// Delay before the first reconnection attempt after an abnormal close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the exponential reconnection delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Consecutive reconnection attempts allowed by the default policy.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ============================================================================
// Close codes
// ============================================================================

/// Normal closure. Only closes carrying this code are treated as intentional.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Abnormal closure (no close frame received).
///
/// Reported when the stream ends without a close frame, on transport errors,
/// and when a connection attempt fails before opening.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Reason sent with the normal-closure frame on caller-initiated close.
pub const CLIENT_CLOSE_REASON: &str = "Connection closed by client";

// ============================================================================
// Endpoints
// ============================================================================

/// WebSocket gateway used when neither config nor env provide one.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";

/// HTTP API base used for the status polling fallback.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// HTTP client request timeout for API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
