//! Scripted in-memory connector for driver tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{
    ConnectFuture, Connector, FrameSink, FrameStream, TransportError, TransportEvent,
};

/// How the next handshake resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Handshake succeeds; a [`MockServer`] is handed to the test.
    Accept,
    /// Handshake fails as if the port were closed.
    Refuse,
    /// Handshake never resolves.
    Hang,
}

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockFrame {
    Text(String),
    Close(u16),
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Script>,
    attempts: Vec<Instant>,
}

/// Connector that follows a script. Unscripted attempts are refused.
#[derive(Clone)]
pub(crate) struct MockConnector {
    inner: Arc<Mutex<Inner>>,
    accepted: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            accepted,
        };
        (connector, servers)
    }

    pub(crate) fn push(&self, step: Script) {
        self.inner.lock().unwrap().script.push_back(step);
    }

    /// Number of transports constructed so far.
    pub(crate) fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts.len()
    }

    /// When each transport was constructed.
    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().attempts.clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &str) -> Result<ConnectFuture, TransportError> {
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.attempts.push(Instant::now());
            inner.script.pop_front().unwrap_or(Script::Refuse)
        };

        match step {
            Script::Refuse => Ok(Box::pin(async {
                Err(TransportError::ConnectFailed("connection refused".to_string()))
            })),
            Script::Hang => Ok(Box::pin(std::future::pending())),
            Script::Accept => {
                let (to_client, from_server) = mpsc::unbounded_channel();
                let (to_server, from_client) = mpsc::unbounded_channel();
                let _ = self.accepted.send(MockServer {
                    to_client,
                    from_client,
                });
                Ok(Box::pin(async move {
                    let sink: Box<dyn FrameSink> = Box::new(MockSink { tx: to_server });
                    let stream: Box<dyn FrameStream> = Box::new(MockStream { rx: from_server });
                    Ok((sink, stream))
                }))
            }
        }
    }
}

/// Backend side of an accepted mock connection. Dropping it ends the stream
/// without a close frame.
pub(crate) struct MockServer {
    to_client: mpsc::UnboundedSender<Result<TransportEvent, TransportError>>,
    from_client: mpsc::UnboundedReceiver<MockFrame>,
}

impl MockServer {
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self
            .to_client
            .send(Ok(TransportEvent::Text(text.to_string())));
    }

    pub(crate) fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    pub(crate) fn send_binary(&self, data: &[u8]) {
        let _ = self.to_client.send(Ok(TransportEvent::Binary(data.to_vec())));
    }

    pub(crate) fn close_with(&self, code: u16) {
        let _ = self.to_client.send(Ok(TransportEvent::Close {
            code,
            reason: String::new(),
        }));
    }

    pub(crate) fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .send(Err(TransportError::Io(message.to_string())));
    }

    pub(crate) async fn recv(&mut self) -> Option<MockFrame> {
        self.from_client.recv().await
    }

    pub(crate) fn try_recv(&mut self) -> Option<MockFrame> {
        self.from_client.try_recv().ok()
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<MockFrame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(MockFrame::Text(text))
            .map_err(|_| TransportError::Io("peer gone".to_string()))
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        self.tx
            .send(MockFrame::Close(code))
            .map_err(|_| TransportError::Io("peer gone".to_string()))
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent, TransportError>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>> {
        self.rx.recv().await
    }
}
