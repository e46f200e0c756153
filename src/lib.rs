//! jobwire - real-time event delivery for long-running backend jobs.
//!
//! This crate keeps one WebSocket per job or collection ("subject id"),
//! keeps it alive and self-healing, and fans inbound events out to any
//! number of independent listeners.
//!
//! # Architecture
//!
//! - **Registry** - owns subject → connection, subscriber sets, cooldown
//!   and reconnect bookkeeping, keepalive timers
//! - **Transport** - trait seam over the socket; `tokio-tungstenite` in
//!   production
//! - **Watchers** - registry consumers folding events into job/script state
//! - **API** - HTTP status fallback
//!
//! # Modules
//!
//! - [`registry`] - [`ConnectionRegistry`] and its event types
//! - [`frame`] - inbound frame classification
//! - [`watcher`] - job and collection watchers
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod reconnect;
pub mod registry;
pub mod transport;
pub mod watcher;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use error::ConnectionError;
pub use frame::{Frame, FrameBody};
pub use reconnect::ReconnectPolicy;
pub use registry::{
    handler, Category, ConnectionHandle, ConnectionRegistry, ConnectionState, Handler,
    RegistryConfig, SubjectEvent,
};
pub use ws::TungsteniteConnector;
