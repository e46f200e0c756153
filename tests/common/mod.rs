//! Shared fixtures for integration tests: an in-memory connector and an
//! event recorder.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use jobwire::transport::{Connector, FrameSink, FrameSource, TransportPair, WsMessage};
use jobwire::{handler, ConnectionError, Handler, RegistryConfig, SubjectEvent};
use tokio::sync::mpsc;

/// Let spawned tasks run until they are all idle.
///
/// Under a paused clock this advances time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn fixed_delay_config() -> RegistryConfig {
    RegistryConfig {
        reconnect: jobwire::ReconnectPolicy::fixed(Duration::from_secs(1)),
        ..RegistryConfig::default()
    }
}

// =============================================================================
// Connector
// =============================================================================

#[derive(Default)]
struct ConnectorState {
    addresses: Vec<String>,
    remotes: Vec<MockRemote>,
    connect_delay: Duration,
    fail_connects: bool,
    reject_addresses: bool,
}

/// In-memory [`Connector`]. Every successful connect creates a
/// [`MockRemote`] the test drives.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Delay every handshake by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    /// Make every handshake fail.
    pub fn set_fail_connects(&self, fail: bool) {
        self.state.lock().unwrap().fail_connects = fail;
    }

    /// Make `check_address` reject everything.
    pub fn set_reject_addresses(&self, reject: bool) {
        self.state.lock().unwrap().reject_addresses = reject;
    }

    /// Handshakes attempted so far.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().addresses.len()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.lock().unwrap().addresses.clone()
    }

    /// Remote end of the `index`-th successful connection.
    pub fn remote(&self, index: usize) -> MockRemote {
        self.state
            .lock()
            .unwrap()
            .remotes
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("no remote #{index}"))
    }

    pub fn remote_count(&self) -> usize {
        self.state.lock().unwrap().remotes.len()
    }

    /// Most recent remote.
    pub fn last_remote(&self) -> MockRemote {
        let count = self.remote_count();
        assert!(count > 0, "no connection was made");
        self.remote(count - 1)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn check_address(&self, address: &str) -> Result<()> {
        if self.state.lock().unwrap().reject_addresses {
            anyhow::bail!("invalid WebSocket URL: {address}");
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<TransportPair> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.addresses.push(address.to_string());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_connects {
            anyhow::bail!("connection refused");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let remote = MockRemote {
            inbound: Arc::new(Mutex::new(Some(tx))),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(None)),
        };
        state.remotes.push(remote.clone());

        let sink = MockSink {
            sent: Arc::clone(&remote.sent),
            closed: Arc::clone(&remote.closed),
        };
        let source = MockSource { rx };
        Ok((Box::new(sink), Box::new(source)))
    }
}

/// Server side of one mock connection.
#[derive(Clone)]
pub struct MockRemote {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Result<WsMessage>>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl MockRemote {
    fn push(&self, message: Result<WsMessage>) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            let _ = tx.send(message);
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(WsMessage::Text(text.to_string())));
    }

    pub fn push_binary(&self, data: &[u8]) {
        self.push(Ok(WsMessage::Binary(data.to_vec())));
    }

    pub fn push_close(&self, code: u16, reason: &str) {
        self.push(Ok(WsMessage::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.push(Err(anyhow::anyhow!("{message}")));
    }

    /// Drop the stream without a close frame.
    pub fn drop_stream(&self) {
        self.inbound.lock().unwrap().take();
    }

    /// Text frames the client sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self, text: &str) -> usize {
        self.sent().iter().filter(|s| s.as_str() == text).count()
    }

    /// Close code and reason the client sent, if any.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.closed.lock().unwrap().is_some() {
            anyhow::bail!("sink closed");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        *self.closed.lock().unwrap() = Some((code, reason.to_string()));
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<WsMessage>>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.rx.recv().await
    }
}

// =============================================================================
// Recorder
// =============================================================================

/// Collects every event delivered to its handler.
#[derive(Clone)]
pub struct Recorder {
    events: Arc<Mutex<Vec<SubjectEvent>>>,
    handler: Handler,
}

impl Recorder {
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handler = handler(move |event: &SubjectEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        Self { events, handler }
    }

    pub fn handler(&self) -> Handler {
        Arc::clone(&self.handler)
    }

    pub fn events(&self) -> Vec<SubjectEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn statuses(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SubjectEvent::Status(connected) => Some(connected),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ConnectionError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SubjectEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// `type` tags of recorded `Message`/`JobComplete` frames.
    pub fn frame_kinds(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SubjectEvent::Message(frame) | SubjectEvent::JobComplete(frame) => {
                    Some(frame.kind().unwrap_or("").to_string())
                }
                _ => None,
            })
            .collect()
    }
}
