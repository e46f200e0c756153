//! One transport per subject: the caller-facing handle and the task that
//! drives the socket.
//!
//! # Task lifecycle
//!
//! ```text
//!   Connecting ──connect ok──► Open ──close frame / error / EOF──► Closed
//!       │                       │
//!       │ close_connection()    │ close_connection()
//!       ▼                       ▼
//!    Closing ─────────────► Closing ──sink.close(1000)──► Closed
//! ```
//!
//! The task owns both transport halves. Outgoing text (caller frames,
//! keepalive probes) and the intentional close request reach it through an
//! unbounded channel; every lifecycle transition is reported back to the
//! registry, which does the bookkeeping and fan-out.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::ConnectionRegistry;
use crate::constants::{ABNORMAL_CLOSURE, CLIENT_CLOSE_REASON, NORMAL_CLOSURE};
use crate::error::ConnectionError;
use crate::transport::WsMessage;

/// Lifecycle of a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Open and exchanging frames.
    Open,
    /// Intentional close requested; waiting for the task to finish.
    Closing,
    /// Gone.
    Closed,
}

impl ConnectionState {
    /// `Connecting` or `Open`: a handle in this state is reused by `obtain`.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        })
    }
}

/// Request from a handle or the registry to the transport task.
#[derive(Debug)]
pub(crate) enum Outgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Close with the given code and reason, then exit.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Caller-facing handle to a subject's transport.
///
/// Cheap to clone. Two handles are equal when they refer to the same
/// transport; a reconnect produces a handle with a new [`Self::id`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    subject_id: Arc<str>,
    id: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    state: watch::Receiver<ConnectionState>,
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl ConnectionHandle {
    pub(crate) fn new(
        subject_id: Arc<str>,
        id: u64,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            subject_id,
            id,
            outgoing,
            state,
        }
    }

    /// Subject this transport belongs to.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Per-transport identifier, unique within the registry.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether the transport is open right now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Wait until the transport leaves `Connecting`.
    ///
    /// Returns `true` if it opened, `false` if it closed first.
    pub async fn opened(&self) -> bool {
        let mut rx = self.state.clone();
        let opened = rx
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .is_ok_and(|s| *s == ConnectionState::Open);
        opened
    }

    /// Queue a text frame. Frames queued while connecting go out once the
    /// transport opens.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::SendFailed`] if the transport is closing
    /// or gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        if !self.state().is_live() {
            return Err(ConnectionError::SendFailed(format!(
                "connection for {} is {}",
                self.subject_id,
                self.state()
            )));
        }
        self.outgoing
            .send(Outgoing::Text(text.into()))
            .map_err(|_| {
                ConnectionError::SendFailed("WebSocket connection task has exited".to_string())
            })
    }

    /// Serialize `value` and queue it as a text frame.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send_text`].
    pub fn send_json(&self, value: &serde_json::Value) -> Result<(), ConnectionError> {
        self.send_text(value.to_string())
    }

    pub(crate) fn request_close(&self) {
        let _ = self.outgoing.send(Outgoing::Close {
            code: NORMAL_CLOSURE,
            reason: CLIENT_CLOSE_REASON.to_string(),
        });
    }
}

/// Everything the transport task needs to report back to the registry.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionContext {
    pub(crate) subject_id: Arc<str>,
    pub(crate) address: Arc<str>,
    pub(crate) id: u64,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionContext {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Drive one transport from handshake to close.
pub(crate) async fn run_connection(
    registry: ConnectionRegistry,
    ctx: ConnectionContext,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    log::debug!(
        "[Registry] Connecting {} (connection {}) to {}",
        ctx.subject_id,
        ctx.id,
        ctx.address
    );

    let (mut sink, mut source) = match registry.connector().connect(&ctx.address).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!(
                "[Registry] Connection failed for {}: {:#}",
                ctx.subject_id,
                e
            );
            if ctx.state() == ConnectionState::Closing {
                registry.on_transport_closed(&ctx, NORMAL_CLOSURE, CLIENT_CLOSE_REASON);
            } else {
                registry.on_transport_error(&ctx, format!("{e:#}"));
                registry.on_transport_closed(&ctx, ABNORMAL_CLOSURE, "connection failed");
            }
            return;
        }
    };

    if !registry.on_transport_open(&ctx) {
        // close_connection() ran while the handshake was in flight
        let _ = sink.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await;
        registry.on_transport_closed(&ctx, NORMAL_CLOSURE, CLIENT_CLOSE_REASON);
        return;
    }

    loop {
        tokio::select! {
            frame = source.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        registry.dispatch_text(&ctx, &text, sink.as_mut()).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        // Frames are JSON; decode binary as lossy UTF-8 and treat it the same
                        let text = String::from_utf8_lossy(&data).into_owned();
                        registry.dispatch_text(&ctx, &text, sink.as_mut()).await;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Protocol-level pings are auto-replied by tungstenite
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        registry.on_transport_closed(&ctx, code, &reason);
                        return;
                    }
                    Some(Err(e)) => {
                        registry.on_transport_error(&ctx, format!("{e:#}"));
                        registry.on_transport_closed(&ctx, ABNORMAL_CLOSURE, "transport error");
                        return;
                    }
                    None => {
                        registry.on_transport_closed(&ctx, ABNORMAL_CLOSURE, "stream ended");
                        return;
                    }
                }
            }

            request = outgoing.recv() => {
                match request {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = sink.send_text(&text).await {
                            registry.on_transport_error(&ctx, format!("{e:#}"));
                            registry.on_transport_closed(&ctx, ABNORMAL_CLOSURE, "send failed");
                            return;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        if let Err(e) = sink.close(code, &reason).await {
                            log::debug!("[Registry] Close frame for {} not sent: {:#}", ctx.subject_id, e);
                        }
                        registry.on_transport_closed(&ctx, code, &reason);
                        return;
                    }
                    None => {
                        // Every handle and the registry record are gone
                        let _ = sink.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await;
                        registry.on_transport_closed(&ctx, NORMAL_CLOSURE, CLIENT_CLOSE_REASON);
                        return;
                    }
                }
            }
        }
    }
}

/// Send a keepalive probe every `interval` while the transport stays open.
///
/// The first probe goes out one full interval after open. The task exits on
/// its own once the state leaves `Open`; the registry also aborts it when
/// the record is discarded.
pub(crate) fn spawn_keepalive(
    subject_id: Arc<str>,
    interval: std::time::Duration,
    handle: ConnectionHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !handle.is_open() {
                log::debug!("[Registry] Keepalive for {} stopped: transport not open", subject_id);
                break;
            }
            log::trace!("[Registry] Sending keepalive probe for {}", subject_id);
            if handle.send_text(crate::frame::probe()).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    type Fixture = (
        ConnectionHandle,
        mpsc::UnboundedReceiver<Outgoing>,
        watch::Sender<ConnectionState>,
    );

    fn handle_with_state(state: ConnectionState) -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state);
        (ConnectionHandle::new(Arc::from("s1"), 7, tx, state_rx), rx, state_tx)
    }

    #[test]
    fn test_state_liveness() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(ConnectionState::Open.is_live());
        assert!(!ConnectionState::Closing.is_live());
        assert!(!ConnectionState::Closed.is_live());
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
    }

    #[test]
    fn test_send_text_queues_while_live() {
        let (handle, mut rx, _state) = handle_with_state(ConnectionState::Connecting);
        handle.send_text("hello").expect("queued");
        match rx.try_recv() {
            Ok(Outgoing::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_send_text_fails_when_closed() {
        let (handle, _rx, _state) = handle_with_state(ConnectionState::Closed);
        let err = handle.send_text("hello").unwrap_err();
        assert!(matches!(err, ConnectionError::SendFailed(_)));
    }

    #[test]
    fn test_send_json_serializes() {
        let (handle, mut rx, _state) = handle_with_state(ConnectionState::Open);
        handle
            .send_json(&serde_json::json!({"type": "subscribe"}))
            .expect("queued");
        match rx.try_recv() {
            Ok(Outgoing::Text(text)) => assert_eq!(text, r#"{"type":"subscribe"}"#),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_handles_compare_by_transport_id() {
        let (a, _rx, _state) = handle_with_state(ConnectionState::Open);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(b.subject_id(), "s1");
        assert_eq!(b.id(), 7);
    }

    #[tokio::test]
    async fn test_opened_reports_close_before_open() {
        let (handle, _rx, state) = handle_with_state(ConnectionState::Connecting);
        state.send_replace(ConnectionState::Closed);
        assert!(!handle.opened().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sends_probe_each_interval() {
        let (handle, mut rx, state) = handle_with_state(ConnectionState::Open);
        let task = spawn_keepalive(Arc::from("s1"), std::time::Duration::from_secs(30), handle);

        tokio::time::sleep(std::time::Duration::from_secs(61)).await;
        let mut probes = 0;
        while let Ok(Outgoing::Text(text)) = rx.try_recv() {
            assert_eq!(text, crate::frame::probe());
            probes += 1;
        }
        assert_eq!(probes, 2);

        state.send_replace(ConnectionState::Closed);
        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        assert!(task.is_finished());
        assert!(rx.try_recv().is_err());
    }
}
