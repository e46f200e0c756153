//! Errors delivered to `Error` subscribers.
//!
//! The registry never returns these from its public operations. They travel
//! through the event fan-out instead, so they are `Clone` and carry plain
//! strings rather than source errors.

/// Failure conditions reported for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// An inbound frame was not valid JSON. The frame is dropped and the
    /// connection stays open.
    MalformedFrame(String),
    /// The underlying socket reported an error.
    Transport(String),
    /// The transport could not be created at all (bad address, no runtime).
    CreateFailed(String),
    /// The reconnect policy ran out of attempts.
    ReconnectExhausted {
        /// Number of reconnection attempts made before giving up.
        attempts: u32,
    },
    /// A frame could not be queued because the transport task has exited.
    SendFailed(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedFrame(msg) => write!(f, "Failed to parse WebSocket message: {msg}"),
            Self::Transport(msg) => write!(f, "WebSocket connection error: {msg}"),
            Self::CreateFailed(msg) => write!(f, "Failed to create WebSocket: {msg}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {attempts} attempts")
            }
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {}
