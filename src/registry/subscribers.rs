//! Per-subject subscriber sets.
//!
//! Handlers are reference-counted closures compared by pointer identity, so
//! the same `Arc` can be registered once per category and removed exactly.
//! Order of registration is order of invocation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConnectionError;
use crate::frame::Frame;

/// Event categories a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Every successfully parsed inbound frame.
    Message,
    /// Connected (`true`) / disconnected (`false`) transitions.
    Status,
    /// Failure conditions.
    Error,
    /// `script_generated` frames that carry a `script_id`.
    ScriptGenerated,
    /// `job_complete` frames that carry a `job_id`.
    JobComplete,
}

impl Category {
    /// Every category, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Message,
        Self::Status,
        Self::Error,
        Self::ScriptGenerated,
        Self::JobComplete,
    ];

    /// Wire-style name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Status => "status",
            Self::Error => "error",
            Self::ScriptGenerated => "script_generated",
            Self::JobComplete => "job_complete",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event handed to subscribers. The variant always matches the category it
/// was delivered under.
#[derive(Debug, Clone)]
pub enum SubjectEvent {
    /// Full parsed frame.
    Message(Arc<Frame>),
    /// Connection up or down.
    Status(bool),
    /// Something went wrong.
    Error(ConnectionError),
    /// A script was generated.
    ScriptGenerated {
        /// Identifier taken from the frame's `script_id` field.
        script_id: String,
    },
    /// A job completed; carries the full frame.
    JobComplete(Arc<Frame>),
}

impl SubjectEvent {
    /// Category this event is delivered under.
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Message(_) => Category::Message,
            Self::Status(_) => Category::Status,
            Self::Error(_) => Category::Error,
            Self::ScriptGenerated { .. } => Category::ScriptGenerated,
            Self::JobComplete(_) => Category::JobComplete,
        }
    }
}

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&SubjectEvent) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
///
/// Keep the returned `Arc` around; it is the key for `unsubscribe`.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&SubjectEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Handlers for one subject, grouped by category.
#[derive(Default)]
pub(crate) struct SubscriberSet {
    handlers: HashMap<Category, Vec<Handler>>,
}

impl SubscriberSet {
    /// Add `handler` under `category`. Returns `false` if it was already there.
    pub(crate) fn add(&mut self, category: Category, handler: Handler) -> bool {
        let list = self.handlers.entry(category).or_default();
        if list.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        list.push(handler);
        true
    }

    /// Remove `handler` from `category`. Returns `false` if it was not there.
    pub(crate) fn remove(&mut self, category: Category, handler: &Handler) -> bool {
        let Some(list) = self.handlers.get_mut(&category) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !same_handler(h, handler));
        before != list.len()
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Clone the handler list so it can be invoked without holding a lock.
    pub(crate) fn snapshot(&self, category: Category) -> Vec<Handler> {
        self.handlers.get(&category).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, category: Category) -> usize {
        self.handlers.get(&category).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for category in Category::ALL {
            map.entry(&category.as_str(), &self.count(category));
        }
        map.finish()
    }
}
