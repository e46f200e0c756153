//! Transport seam between the registry and a concrete socket.
//!
//! The registry only needs three things from a socket: open it, read frames,
//! and write text or a close. Those are the [`Connector`], [`FrameSource`] and
//! [`FrameSink`] traits. Production uses [`crate::ws::TungsteniteConnector`];
//! tests plug in channel-backed fakes.
//!
//! ```text
//!   ConnectionRegistry ──obtain()──► Connector::connect(address)
//!                                          │
//!                          ┌───────────────┴───────────────┐
//!                          ▼                               ▼
//!                   Box<dyn FrameSink>             Box<dyn FrameSource>
//!                   (pong, ping, close)            (text, binary, close)
//! ```

// Rust guideline compliant 2026-02

use anyhow::Result;
use async_trait::async_trait;

pub use crate::ws::WsMessage;

/// Write half of an open transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the write fails.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send a close frame with the given code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame cannot be written.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Read half of an open transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame, returning `None` when the stream ends.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}

/// Both halves of an open transport.
pub type TransportPair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens transports to caller-supplied addresses.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Synchronous pre-flight check run inside `obtain`.
    ///
    /// A failure here is a construction-time failure: the registry reports it
    /// to `Error` subscribers and `obtain` returns `None` without spawning
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the address can never be connected to.
    fn check_address(&self, _address: &str) -> Result<()> {
        Ok(())
    }

    /// Perform the handshake and return the split transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, address: &str) -> Result<TransportPair>;
}
