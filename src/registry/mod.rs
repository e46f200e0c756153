//! Connection registry: one live transport per subject id, fan-out of
//! inbound events to any number of subscribers.
//!
//! A *subject id* is an opaque correlation key (a collection id or a job id).
//! Callers ask the registry for a connection with [`ConnectionRegistry::obtain`]
//! and register interest with [`ConnectionRegistry::subscribe`]. The registry
//! keeps the transport alive with keepalive probes and re-opens it after an
//! abnormal close. Subscribers survive reconnects.
//!
//! # Architecture
//!
//! ```text
//!   caller ──obtain(S, addr)──► ConnectionRegistry ──spawn──► transport task (S)
//!   caller ──subscribe(S, …)──►   ├── connections: S → record      │
//!                                 ├── subscribers: S → categories  │ open / frame /
//!                                 ├── last_attempt: S → Instant    │ error / close
//!                                 └── reconnects:  S → attempts  ◄─┘
//! ```
//!
//! # Deadlock Prevention
//!
//! All state sits behind one mutex. Handlers are collected under the lock,
//! then the lock is released before any handler runs, so a handler may call
//! back into the registry (`obtain`, `unsubscribe`, `close_connection`, ...).
//!
//! # Runtime
//!
//! Transports are driven by tokio tasks. `obtain` must run inside a tokio
//! runtime; outside one it reports [`ConnectionError::CreateFailed`] and
//! returns `None`.

// Rust guideline compliant 2026-02

pub mod connection;
pub mod subscribers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use connection::{ConnectionHandle, ConnectionState};
pub use subscribers::{handler, Category, Handler, SubjectEvent};

use crate::constants::{
    CONNECT_COOLDOWN, KEEPALIVE_INTERVAL, MIN_KEEPALIVE_INTERVAL, NORMAL_CLOSURE,
};
use crate::error::ConnectionError;
use crate::frame::{self, Frame, FrameBody};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, FrameSink};
use connection::ConnectionContext;
use subscribers::SubscriberSet;

/// Timing knobs for a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Minimum time between connection attempts for one subject.
    pub cooldown: Duration,
    /// Interval between keepalive probes on an open transport.
    pub keepalive_interval: Duration,
    /// What to do after an abnormal close.
    pub reconnect: ReconnectPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cooldown: CONNECT_COOLDOWN,
            keepalive_interval: KEEPALIVE_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Bookkeeping for one subject's current transport.
struct ConnectionRecord {
    handle: ConnectionHandle,
    state: Arc<watch::Sender<ConnectionState>>,
    attempted_at: Instant,
    /// Present iff the transport is open.
    keepalive: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    fn cancel_keepalive(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}

/// Consecutive reconnect attempts for one subject.
#[derive(Default)]
struct ReconnectState {
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionRecord>,
    last_attempt: HashMap<String, Instant>,
    subscribers: HashMap<String, SubscriberSet>,
    reconnects: HashMap<String, ReconnectState>,
    next_connection_id: u64,
}

impl RegistryState {
    fn handlers(&self, subject_id: &str, category: Category) -> Vec<Handler> {
        self.subscribers
            .get(subject_id)
            .map(|set| set.snapshot(category))
            .unwrap_or_default()
    }

    /// Forget attempts older than `cooldown`; they no longer refuse anything.
    fn prune_attempts(&mut self, now: Instant, cooldown: Duration) {
        self.last_attempt
            .retain(|_, attempted| now.duration_since(*attempted) < cooldown);
    }

    fn cancel_reconnect(&mut self, subject_id: &str) {
        if let Some(ReconnectState {
            pending: Some(task),
            ..
        }) = self.reconnects.remove(subject_id)
        {
            task.abort();
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

/// Who asked for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Reconnect,
}

/// Outcome of an abnormal close.
enum ReconnectPlan {
    None,
    Scheduled { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Process-wide connection manager, constructed once by the composition
/// root and passed to whoever needs it.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &state.connections.len())
            .field("subjects_with_subscribers", &state.subscribers.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Create a registry that opens transports through `connector`.
    ///
    /// A keepalive interval below [`MIN_KEEPALIVE_INTERVAL`] is raised to it.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, mut config: RegistryConfig) -> Self {
        if config.keepalive_interval < MIN_KEEPALIVE_INTERVAL {
            log::warn!(
                "[Registry] Keepalive interval {:?} too short, using {:?}",
                config.keepalive_interval,
                MIN_KEEPALIVE_INTERVAL
            );
            config.keepalive_interval = MIN_KEEPALIVE_INTERVAL;
        }
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Timing configuration in use.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Get the live connection for `subject_id`, or open one to `address`.
    ///
    /// - An existing `Connecting`/`Open` transport is returned unchanged.
    /// - Within the cooldown window after the previous attempt, returns
    ///   `None`; try again later.
    /// - Otherwise a new transport is started and its handle returned.
    ///   `Status(true)` is delivered later, when it actually opens.
    ///
    /// Construction failures are reported to `Error` subscribers and yield
    /// `None`.
    pub fn obtain(&self, subject_id: &str, address: &str) -> Option<ConnectionHandle> {
        self.obtain_from(subject_id, address, Origin::Caller)
    }

    fn obtain_from(
        &self,
        subject_id: &str,
        address: &str,
        origin: Origin,
    ) -> Option<ConnectionHandle> {
        if subject_id.is_empty() {
            log::warn!("[Registry] obtain() called with an empty subject id");
            return None;
        }

        let now = Instant::now();
        let created = {
            let mut state = self.lock();

            if let Some(record) = state.connections.get(subject_id) {
                if record.handle.state().is_live() {
                    log::debug!(
                        "[Registry] Reusing existing connection for {} ({})",
                        subject_id,
                        record.handle.state()
                    );
                    return Some(record.handle.clone());
                }
            }

            state.prune_attempts(now, self.shared.config.cooldown);
            if state.last_attempt.contains_key(subject_id) {
                log::info!(
                    "[Registry] Connection attempt for {} rejected - in cooldown period",
                    subject_id
                );
                return None;
            }

            if origin == Origin::Caller {
                // A deliberate request starts a fresh reconnect budget
                state.cancel_reconnect(subject_id);
            }

            log::info!("[Registry] Creating new connection for {}", subject_id);
            state.last_attempt.insert(subject_id.to_string(), now);
            self.create_connection(&mut state, subject_id, address, now)
        };

        match created {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("[Registry] Error creating connection for {}: {}", subject_id, err);
                self.emit(subject_id, &SubjectEvent::Error(err));
                None
            }
        }
    }

    fn create_connection(
        &self,
        state: &mut RegistryState,
        subject_id: &str,
        address: &str,
        now: Instant,
    ) -> Result<ConnectionHandle, ConnectionError> {
        self.shared
            .connector
            .check_address(address)
            .map_err(|e| ConnectionError::CreateFailed(format!("{e:#}")))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConnectionError::CreateFailed(format!("no async runtime: {e}")))?;

        let id = state.next_connection_id;
        state.next_connection_id += 1;

        let subject: Arc<str> = Arc::from(subject_id);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let handle = ConnectionHandle::new(Arc::clone(&subject), id, outgoing_tx, state_rx);

        let record = ConnectionRecord {
            handle: handle.clone(),
            state: Arc::clone(&state_tx),
            attempted_at: now,
            keepalive: None,
        };
        if let Some(mut superseded) = state.connections.insert(subject_id.to_string(), record) {
            log::debug!(
                "[Registry] Connection {} for {} superseded by {}",
                superseded.handle.id(),
                subject_id,
                id
            );
            superseded.cancel_keepalive();
        }

        let ctx = ConnectionContext {
            subject_id: subject,
            address: Arc::from(address),
            id,
            state: state_tx,
        };
        runtime.spawn(connection::run_connection(self.clone(), ctx, outgoing_rx));

        Ok(handle)
    }

    /// Register `handler` for `category` events on `subject_id`.
    ///
    /// Every registered handler runs for every matching event. Registering
    /// the same `Arc` twice under one category has no effect.
    pub fn subscribe(&self, subject_id: &str, category: Category, handler: Handler) {
        let mut state = self.lock();
        let added = state
            .subscribers
            .entry(subject_id.to_string())
            .or_default()
            .add(category, handler);
        if !added {
            log::debug!(
                "[Registry] Handler already subscribed to {} for {}",
                category,
                subject_id
            );
        }
    }

    /// Remove exactly `handler` from `category` on `subject_id`.
    ///
    /// No-op if it is not registered. The connection is left alone.
    pub fn unsubscribe(&self, subject_id: &str, category: Category, handler: &Handler) {
        let mut state = self.lock();
        if let Some(set) = state.subscribers.get_mut(subject_id) {
            set.remove(category, handler);
        }
    }

    /// Drop every handler in every category for `subject_id`, leaving the
    /// transport untouched.
    pub fn clear_subscribers(&self, subject_id: &str) {
        let mut state = self.lock();
        if let Some(set) = state.subscribers.get_mut(subject_id) {
            set.clear();
        }
    }

    /// Intentionally close `subject_id`'s transport.
    ///
    /// Sends a normal-closure frame, removes the record and cancels the
    /// keepalive timer. Any pending reconnect is cancelled and the resulting
    /// close never schedules a new one.
    pub fn close_connection(&self, subject_id: &str) {
        let mut state = self.lock();
        state.cancel_reconnect(subject_id);
        state.prune_attempts(Instant::now(), self.shared.config.cooldown);

        let Some(mut record) = state.connections.remove(subject_id) else {
            return;
        };
        record.cancel_keepalive();

        if record.handle.state().is_live() {
            log::info!("[Registry] Manually closing connection for {}", subject_id);
            record.state.send_replace(ConnectionState::Closing);
            record.handle.request_close();
        }
    }

    /// Current `(subject id, state)` of every connection record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ConnectionState)> {
        let state = self.lock();
        let mut entries: Vec<(String, ConnectionState)> = state
            .connections
            .iter()
            .map(|(subject, record)| (subject.clone(), record.handle.state()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Log every connection record at debug level.
    pub fn debug_connections(&self) {
        let state = self.lock();
        log::debug!("--- Current connections ({}) ---", state.connections.len());
        for (subject, record) in &state.connections {
            log::debug!(
                "ID: {}, State: {}, connection {}, attempted {:?} ago",
                subject,
                record.handle.state(),
                record.handle.id(),
                record.attempted_at.elapsed()
            );
        }
        log::debug!("--- End connection list ---");
    }

    /// Number of handlers registered for `category` on `subject_id`.
    #[must_use]
    pub fn subscriber_count(&self, subject_id: &str, category: Category) -> usize {
        self.lock()
            .subscribers
            .get(subject_id)
            .map_or(0, |set| set.count(category))
    }

    // =========================================================================
    // Transport callbacks
    // =========================================================================

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.shared.connector
    }

    /// Transport finished its handshake.
    ///
    /// Returns `false` if the subject was closed while connecting; the
    /// caller then closes the fresh transport instead of using it.
    pub(crate) fn on_transport_open(&self, ctx: &ConnectionContext) -> bool {
        let status_handlers = {
            let mut state = self.lock();
            if ctx.state() != ConnectionState::Connecting {
                return false;
            }
            ctx.state.send_replace(ConnectionState::Open);
            state.reconnects.remove(&*ctx.subject_id);

            let interval = self.shared.config.keepalive_interval;
            if let Some(record) = state
                .connections
                .get_mut(&*ctx.subject_id)
                .filter(|record| record.handle.id() == ctx.id)
            {
                record.cancel_keepalive();
                record.keepalive = Some(connection::spawn_keepalive(
                    Arc::clone(&ctx.subject_id),
                    interval,
                    record.handle.clone(),
                ));
            }

            state.handlers(&ctx.subject_id, Category::Status)
        };

        log::info!(
            "[Registry] Connected successfully for {} (connection {})",
            ctx.subject_id,
            ctx.id
        );
        let event = SubjectEvent::Status(true);
        for handler in status_handlers {
            handler(&event);
        }
        true
    }

    /// Transport reported an error. A close report follows.
    pub(crate) fn on_transport_error(&self, ctx: &ConnectionContext, message: String) {
        log::error!("[Registry] WebSocket error for {}: {}", ctx.subject_id, message);
        self.emit(&ctx.subject_id, &SubjectEvent::Error(ConnectionError::Transport(message)));
        self.emit(&ctx.subject_id, &SubjectEvent::Status(false));
    }

    /// Transport is gone.
    pub(crate) fn on_transport_closed(&self, ctx: &ConnectionContext, code: u16, reason: &str) {
        log::info!(
            "[Registry] Connection for {} closed with code: {}, reason: {}",
            ctx.subject_id,
            code,
            reason
        );

        let (status_handlers, plan) = {
            let mut state = self.lock();
            let intentional =
                code == NORMAL_CLOSURE || ctx.state() == ConnectionState::Closing;
            ctx.state.send_replace(ConnectionState::Closed);

            let current = state
                .connections
                .get(&*ctx.subject_id)
                .is_some_and(|record| record.handle.id() == ctx.id);
            if current {
                if let Some(mut record) = state.connections.remove(&*ctx.subject_id) {
                    record.cancel_keepalive();
                }
            }

            let plan = if intentional {
                ReconnectPlan::None
            } else if !current && state.connections.contains_key(&*ctx.subject_id) {
                log::debug!(
                    "[Registry] Stale connection {} for {} closed; newer one on record",
                    ctx.id,
                    ctx.subject_id
                );
                ReconnectPlan::None
            } else {
                self.plan_reconnect(&mut state, ctx)
            };

            (state.handlers(&ctx.subject_id, Category::Status), plan)
        };

        let event = SubjectEvent::Status(false);
        for handler in status_handlers {
            handler(&event);
        }

        match plan {
            ReconnectPlan::None => {}
            ReconnectPlan::Scheduled { attempt, delay } => {
                log::info!(
                    "[Registry] Attempting to reconnect for {} in {:?} (attempt {})",
                    ctx.subject_id,
                    delay,
                    attempt
                );
            }
            ReconnectPlan::Exhausted { attempts } => {
                log::warn!(
                    "[Registry] Giving up on {} after {} reconnect attempts",
                    ctx.subject_id,
                    attempts
                );
                self.emit(
                    &ctx.subject_id,
                    &SubjectEvent::Error(ConnectionError::ReconnectExhausted { attempts }),
                );
            }
        }
    }

    fn plan_reconnect(&self, state: &mut RegistryState, ctx: &ConnectionContext) -> ReconnectPlan {
        let subject_id = ctx.subject_id.to_string();
        let entry = state.reconnects.entry(subject_id.clone()).or_default();
        entry.attempts += 1;
        let attempt = entry.attempts;

        let Some(delay) = self.shared.config.reconnect.delay_for(attempt) else {
            state.reconnects.remove(&subject_id);
            return ReconnectPlan::Exhausted {
                attempts: attempt - 1,
            };
        };
        // A retry inside the cooldown window would just be refused
        let delay = delay.max(self.shared.config.cooldown);

        let registry = self.clone();
        let address = Arc::clone(&ctx.address);
        let retry_subject = subject_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.retry(&retry_subject, &address);
        });
        if let Some(previous) = entry.pending.replace(task) {
            previous.abort();
        }

        ReconnectPlan::Scheduled { attempt, delay }
    }

    fn retry(&self, subject_id: &str, address: &str) {
        {
            let mut state = self.lock();
            if let Some(entry) = state.reconnects.get_mut(subject_id) {
                // This task is the pending one; forget it without aborting
                entry.pending = None;
            }
        }
        if self.obtain_from(subject_id, address, Origin::Reconnect).is_none() {
            log::warn!("[Registry] Reconnect attempt for {} was not started", subject_id);
        }
    }

    /// Run the inbound dispatch algorithm for one text frame.
    pub(crate) async fn dispatch_text(
        &self,
        ctx: &ConnectionContext,
        text: &str,
        sink: &mut dyn FrameSink,
    ) {
        let frame = match Frame::parse(text) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                let preview: String = text.chars().take(100).collect();
                log::error!(
                    "[Registry] Error parsing message for {}: {} ({})",
                    ctx.subject_id,
                    e,
                    preview
                );
                self.emit(
                    &ctx.subject_id,
                    &SubjectEvent::Error(ConnectionError::MalformedFrame(e.to_string())),
                );
                return;
            }
        };
        log::debug!(
            "[Registry] Message received for {}: type={:?}",
            ctx.subject_id,
            frame.kind()
        );

        if frame.is_probe() {
            log::debug!("[Registry] Responding to ping with pong for {}", ctx.subject_id);
            if let Err(e) = sink.send_text(&frame::acknowledgement()).await {
                log::warn!("[Registry] Failed to send pong for {}: {:#}", ctx.subject_id, e);
            }
        }

        match frame.body() {
            FrameBody::ScriptGenerated {
                script_id: Some(script_id),
            } => {
                log::info!(
                    "[Registry] Script generation completed for {}. Script ID: {}",
                    ctx.subject_id,
                    script_id
                );
                self.emit(
                    &ctx.subject_id,
                    &SubjectEvent::ScriptGenerated {
                        script_id: script_id.clone(),
                    },
                );
            }
            FrameBody::ScriptGenerated { script_id: None } => {
                log::warn!(
                    "[Registry] Received script_generated event without script_id for {}: {}",
                    ctx.subject_id,
                    frame.payload()
                );
            }
            FrameBody::JobComplete(job) if job.job_id.is_some() => {
                log::info!("[Registry] Job complete event received for {}", ctx.subject_id);
                self.emit(&ctx.subject_id, &SubjectEvent::JobComplete(Arc::clone(&frame)));
            }
            FrameBody::JobComplete(_) => {
                log::warn!(
                    "[Registry] Received job_complete event without job_id for {}: {}",
                    ctx.subject_id,
                    frame.payload()
                );
            }
            FrameBody::JobStatus { status } => {
                log::debug!("[Registry] Job status update for {}: {:?}", ctx.subject_id, status);
            }
            FrameBody::Ping | FrameBody::Pong | FrameBody::CollectionStatus { .. } | FrameBody::Other => {}
        }

        self.emit(&ctx.subject_id, &SubjectEvent::Message(frame));
    }

    /// Deliver `event` to every handler of its category, outside the lock.
    fn emit(&self, subject_id: &str, event: &SubjectEvent) {
        let handlers = self.lock().handlers(subject_id, event.category());
        for handler in handlers {
            handler(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section leaves the maps consistent, so a panic in
        // another thread does not invalidate them.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
