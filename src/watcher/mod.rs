//! Registry consumers that fold a subject's events into observable state.
//!
//! - [`JobWatcher`]: one job's status, artifacts and completion, with an
//!   HTTP status fallback.
//! - [`ScriptWatcher`]: one collection's script generation.
//!
//! Each watcher registers its handlers on start and removes exactly those
//! handlers when dropped. The connection itself is left to the registry,
//! since other callers may share it.

mod job;
mod script;

pub use job::{JobProgress, JobWatcher};
pub use script::{ScriptProgress, ScriptWatcher};

use crate::registry::{Category, ConnectionHandle, ConnectionRegistry, Handler};

/// Gateway address for a job subscription.
#[must_use]
pub fn job_address(ws_base: &str, job_id: &str) -> String {
    format!("{ws_base}?job_id={job_id}")
}

/// Gateway address for a collection subscription.
#[must_use]
pub fn collection_address(ws_base: &str, collection_id: &str) -> String {
    format!("{ws_base}?collection_id={collection_id}")
}

/// Handlers one watcher registered for one subject.
///
/// Dropping it unsubscribes every handler it holds.
struct Subscriptions {
    registry: ConnectionRegistry,
    subject_id: String,
    address: String,
    handlers: Vec<(Category, Handler)>,
}

impl Subscriptions {
    fn new(registry: ConnectionRegistry, subject_id: &str, address: String) -> Self {
        Self {
            registry,
            subject_id: subject_id.to_string(),
            address,
            handlers: Vec::new(),
        }
    }

    fn add(&mut self, category: Category, handler: Handler) {
        self.registry
            .subscribe(&self.subject_id, category, std::sync::Arc::clone(&handler));
        self.handlers.push((category, handler));
    }

    fn connect(&self) -> Option<ConnectionHandle> {
        self.registry.obtain(&self.subject_id, &self.address)
    }

    /// Tear down the current transport and ask for a fresh one.
    ///
    /// Returns `None` if the new attempt lands inside the cooldown window.
    fn reconnect(&self) -> Option<ConnectionHandle> {
        self.registry.close_connection(&self.subject_id);
        self.connect()
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (category, handler) in &self.handlers {
            self.registry.unsubscribe(&self.subject_id, *category, handler);
        }
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("subject_id", &self.subject_id)
            .field("address", &self.address)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
