//! Script generation tracking for a collection.

use std::sync::Arc;

use tokio::sync::watch;

use super::{collection_address, Subscriptions};
use crate::frame::FrameBody;
use crate::registry::{handler, Category, ConnectionHandle, ConnectionRegistry, SubjectEvent};

/// Status label after the transport opened.
pub const STATUS_CONNECTED: &str = "connected";
/// Status label after the transport closed.
pub const STATUS_DISCONNECTED: &str = "disconnected";
/// Status label after an error.
pub const STATUS_ERROR: &str = "error";
/// Status label once a script id arrived.
pub const STATUS_SCRIPT_GENERATED: &str = "script_generated";

/// Everything known about one collection's script generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptProgress {
    /// Generated script, once announced.
    pub script_id: Option<String>,
    /// Transport currently open.
    pub connected: bool,
    /// Last reported error, cleared on reconnect.
    pub error: Option<String>,
    /// Connection label or the last `collection_status` reported.
    pub status: Option<String>,
}

/// Watches one collection over the shared registry.
#[derive(Debug)]
pub struct ScriptWatcher {
    collection_id: String,
    progress: Arc<watch::Sender<ScriptProgress>>,
    subscriptions: Subscriptions,
}

impl ScriptWatcher {
    /// Subscribe to `collection_id` and make sure a connection exists.
    pub fn start(registry: &ConnectionRegistry, ws_base: &str, collection_id: &str) -> Self {
        log::debug!("[ScriptWatcher] Setting up handlers for collection: {}", collection_id);
        let progress = Arc::new(watch::Sender::new(ScriptProgress::default()));
        let mut subscriptions = Subscriptions::new(
            registry.clone(),
            collection_id,
            collection_address(ws_base, collection_id),
        );

        let tx = Arc::clone(&progress);
        subscriptions.add(
            Category::Status,
            handler(move |event| {
                if let SubjectEvent::Status(connected) = event {
                    tx.send_modify(|p| {
                        p.connected = *connected;
                        let label = if *connected {
                            STATUS_CONNECTED
                        } else {
                            STATUS_DISCONNECTED
                        };
                        p.status = Some(label.to_string());
                        if *connected {
                            p.error = None;
                        }
                    });
                }
            }),
        );

        let tx = Arc::clone(&progress);
        subscriptions.add(
            Category::Error,
            handler(move |event| {
                if let SubjectEvent::Error(err) = event {
                    tx.send_modify(|p| {
                        p.error = Some(err.to_string());
                        p.status = Some(STATUS_ERROR.to_string());
                    });
                }
            }),
        );

        let tx = Arc::clone(&progress);
        let id = collection_id.to_string();
        subscriptions.add(
            Category::ScriptGenerated,
            handler(move |event| {
                if let SubjectEvent::ScriptGenerated { script_id } = event {
                    log::info!("[ScriptWatcher] Script {} generated for collection {}", script_id, id);
                    tx.send_modify(|p| {
                        p.script_id = Some(script_id.clone());
                        p.status = Some(STATUS_SCRIPT_GENERATED.to_string());
                    });
                }
            }),
        );

        let tx = Arc::clone(&progress);
        let id = collection_id.to_string();
        subscriptions.add(
            Category::Message,
            handler(move |event| {
                let SubjectEvent::Message(frame) = event else {
                    return;
                };
                match frame.body() {
                    FrameBody::CollectionStatus { status, progress } => {
                        log::debug!(
                            "[ScriptWatcher] Collection {} status: {:?}, progress: {}%",
                            id,
                            status,
                            progress.unwrap_or(0.0)
                        );
                        tx.send_modify(|p| p.status.clone_from(status));
                    }
                    FrameBody::Pong => {
                        log::debug!("[ScriptWatcher] Received pong for collection {}", id);
                    }
                    _ => {}
                }
            }),
        );

        if let Some(handle) = subscriptions.connect() {
            if handle.is_open() {
                progress.send_modify(|p| {
                    p.connected = true;
                    p.status = Some(STATUS_CONNECTED.to_string());
                });
            }
        }

        Self {
            collection_id: collection_id.to_string(),
            progress,
            subscriptions,
        }
    }

    /// Collection being watched.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> ScriptProgress {
        self.progress.borrow().clone()
    }

    /// Receiver that sees every progress change.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<ScriptProgress> {
        self.progress.subscribe()
    }

    /// Close the collection's transport and open a fresh one.
    pub fn reconnect(&self) -> Option<ConnectionHandle> {
        self.subscriptions.reconnect()
    }
}
