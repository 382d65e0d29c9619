//! Host-side handle to the channel driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::driver::{Driver, DriverCommand};
use super::message::{InboundMessage, OutboundMessage};
use super::subscriptions::SubscriptionId;
use super::transport::{Connector, TransportError};
use super::{ChannelConfig, ChannelError, ChannelEvent, ChannelStatus, ConnectionState};
use crate::ws::WsConnector;

/// Capacity of the lifecycle event stream. Slow readers lose the oldest events.
const EVENT_CAPACITY: usize = 64;

/// Owner of one logical connection to the control backend.
///
/// Created once per host session. Every operation is forwarded to a driver
/// task that serializes it with transport events, so the handle can be
/// shared between tasks without extra locking.
///
/// Dropping the manager is teardown: a pending reconnect is cancelled and no
/// new attempt is made, but an open connection is left to run until the
/// backend closes it. Call [`ChannelManager::close`] for an intentional
/// shutdown.
#[derive(Debug)]
pub struct ChannelManager {
    command_tx: mpsc::UnboundedSender<DriverCommand>,
    status_rx: watch::Receiver<ChannelStatus>,
    events_tx: broadcast::Sender<ChannelEvent>,
    next_subscription: AtomicU64,
}

impl ChannelManager {
    /// Create a manager that connects over WebSocket.
    ///
    /// Must be called from within a tokio runtime. Does not connect; call
    /// [`ChannelManager::connect`].
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a manager on top of a custom transport.
    #[must_use]
    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let driver = Driver::new(
            config,
            connector,
            command_rx,
            status_tx,
            events_tx.clone(),
        );
        tokio::spawn(driver.run());

        Self {
            command_tx,
            status_rx,
            events_tx,
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Start connecting. No-op while connecting or open.
    ///
    /// A pending automatic retry is replaced by an immediate attempt with a
    /// fresh retry budget. Construction failures are logged and reported
    /// through [`ChannelManager::events`]; they are not returned.
    pub fn connect(&self) {
        self.command(DriverCommand::Connect);
    }

    /// Send a message to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] if the channel is not open; the
    /// message is dropped and never reaches the transport.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(DriverCommand::Send { message, reply })
            .map_err(|_| ChannelError::Closed)?;
        response.await.map_err(|_| ChannelError::Closed)?
    }

    /// Register `handler` for every inbound message matching `predicate`.
    ///
    /// Handlers run on the driver task in registration order and must not
    /// block. An error or panic in one handler is reported as a
    /// [`ChannelEvent::DispatchFailed`] and does not affect the others.
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionId
    where
        P: Fn(&InboundMessage) -> bool + Send + 'static,
        H: FnMut(&InboundMessage) -> Result<(), ChannelError> + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.command(DriverCommand::Subscribe {
            id,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        });
        id
    }

    /// Register `handler` for messages whose `type` equals `kind`.
    pub fn subscribe_type<H>(&self, kind: impl Into<String>, handler: H) -> SubscriptionId
    where
        H: FnMut(&InboundMessage) -> Result<(), ChannelError> + Send + 'static,
    {
        let kind = kind.into();
        self.subscribe(move |message| message.is(&kind), handler)
    }

    /// Forward matching messages into a queue, for consumers doing slow work.
    pub fn subscribe_channel<P>(
        &self,
        predicate: P,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<InboundMessage>)
    where
        P: Fn(&InboundMessage) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(predicate, move |message| {
            // A dropped receiver just stops consuming.
            let _ = tx.send(message.clone());
            Ok(())
        });
        (id, rx)
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.command(DriverCommand::Unsubscribe { id });
    }

    /// Close intentionally with the clean close code.
    ///
    /// Cancels any pending reconnect and resets the retry budget. Returns
    /// once the driver has processed the close.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.command_tx.send(DriverCommand::Close { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    /// Lifecycle event stream. Only events after this call are delivered.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    /// Wait until the channel is open.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ReconnectExhausted`] if the retry budget runs
    /// out, [`ChannelError::Transport`] if the endpoint is unusable or
    /// `timeout` elapses, and [`ChannelError::Closed`] if the driver stopped.
    pub async fn wait_until_open(&self, timeout: Duration) -> Result<(), ChannelError> {
        // Judge the status only after every command queued so far, a
        // preceding connect() included, has been handled.
        let (reply, synced) = oneshot::channel();
        self.command_tx
            .send(DriverCommand::Barrier { reply })
            .map_err(|_| ChannelError::Closed)?;
        synced.await.map_err(|_| ChannelError::Closed)?;

        let mut status_rx = self.status_rx.clone();
        let settled = async move {
            let status = status_rx
                .wait_for(|s| {
                    s.connected()
                        || s.exhausted
                        || (s.state == ConnectionState::Disconnected && s.error.is_some())
                })
                .await?
                .clone();
            Ok::<_, watch::error::RecvError>(status)
        };

        let status = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => return Err(ChannelError::Closed),
            Err(_) => {
                return Err(ChannelError::Transport(TransportError::ConnectFailed(format!(
                    "not connected after {:.1}s",
                    timeout.as_secs_f32()
                ))))
            }
        };

        if status.connected() {
            Ok(())
        } else if status.exhausted {
            Err(ChannelError::ReconnectExhausted {
                attempts: status.attempts,
            })
        } else {
            Err(ChannelError::Transport(TransportError::ConnectFailed(
                status.error.unwrap_or_default(),
            )))
        }
    }

    fn command(&self, command: DriverCommand) {
        if let Err(e) = self.command_tx.send(command) {
            log::debug!("Channel driver gone, dropping {:?}", e.0);
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let _ = self.command_tx.send(DriverCommand::Teardown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::{MockConnector, MockFrame, MockServer, Script};
    use crate::channel::ErrorKind;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const ENDPOINT: &str = "ws://pendant.test:8080/ws";

    fn manager_with(
        config: ChannelConfig,
    ) -> (ChannelManager, MockConnector, mpsc::UnboundedReceiver<MockServer>) {
        let (connector, servers) = MockConnector::new();
        let manager = ChannelManager::with_connector(config, Arc::new(connector.clone()));
        (manager, connector, servers)
    }

    async fn wait_for_event<F>(events: &mut broadcast::Receiver<ChannelEvent>, pred: F) -> ChannelEvent
    where
        F: Fn(&ChannelEvent) -> bool,
    {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    /// Connect against a scripted Accept and return the backend side.
    async fn open(
        manager: &ChannelManager,
        connector: &MockConnector,
        servers: &mut mpsc::UnboundedReceiver<MockServer>,
    ) -> MockServer {
        connector.push(Script::Accept);
        let mut events = manager.events();
        manager.connect();
        let server = servers.recv().await.unwrap();
        wait_for_event(&mut events, |e| *e == ChannelEvent::Connected).await;
        server
    }

    fn jog_stop() -> OutboundMessage {
        OutboundMessage::try_from(json!({"type": "jog_stop"})).unwrap()
    }

    fn position_update(seq: u64) -> serde_json::Value {
        json!({
            "type": "position_update",
            "timestamp": seq,
            "joint_positions": {"base_rotation": seq},
        })
    }

    /// Test that opening the connection publishes Open with a zero counter.
    #[tokio::test(start_paused = true)]
    async fn test_connect_opens_channel() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let _server = open(&manager, &connector, &mut servers).await;

        let status = manager.status();
        assert!(status.connected());
        assert_eq!(status.attempts, 0);
        assert!(status.error.is_none());
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that connect() while Connecting builds no extra transport.
    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_connecting() {
        let (manager, connector, _servers) = manager_with(ChannelConfig::new(ENDPOINT));
        connector.push(Script::Hang);

        manager.connect();
        manager.connect();
        manager.connect();
        // Round trip through the driver so every connect() has been handled.
        let err = manager.send(jog_stop()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that connect() while Open builds no extra transport.
    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_open() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let mut server = open(&manager, &connector, &mut servers).await;

        manager.connect();
        manager.connect();
        manager.send(jog_stop()).await.unwrap();

        assert_eq!(server.recv().await, Some(MockFrame::Text(r#"{"type":"jog_stop"}"#.into())));
        assert_eq!(connector.attempts(), 1);
        assert!(manager.is_connected());
    }

    /// Test that send() before connecting fails and sets the banner text.
    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_fails() {
        let (manager, connector, _servers) = manager_with(ChannelConfig::new(ENDPOINT));

        let err = manager.send(jog_stop()).await.unwrap_err();

        assert_eq!(err, ChannelError::NotConnected);
        assert_eq!(
            manager.status().error.as_deref(),
            Some(crate::constants::NOT_CONNECTED_TEXT)
        );
        assert_eq!(connector.attempts(), 0);
    }

    /// Test that send() while waiting to reconnect never reaches a transport.
    #[tokio::test(start_paused = true)]
    async fn test_send_while_reconnecting_is_dropped() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let mut server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1006);
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;

        let err = manager.send(jog_stop()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(server.try_recv(), None);
    }

    /// Test the telemetry fan-out scenario: ten updates, one interleaved other type.
    #[tokio::test(start_paused = true)]
    async fn test_type_subscriber_receives_updates_in_order() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let (tx, mut received) = mpsc::unbounded_channel();
        manager.subscribe_type("position_update", move |msg| {
            tx.send(msg.payload().clone()).unwrap();
            Ok(())
        });
        let (_, mut markers) = manager.subscribe_channel(|m| m.is("marker"));

        let server = open(&manager, &connector, &mut servers).await;
        for seq in 0..10 {
            server.send_json(&position_update(seq));
            if seq == 4 {
                server.send_json(&json!({"type": "program_execution", "status": "started"}));
            }
        }
        server.send_json(&json!({"type": "marker"}));
        markers.recv().await.unwrap();

        let mut payloads = Vec::new();
        while let Ok(payload) = received.try_recv() {
            payloads.push(payload);
        }
        let expected: Vec<_> = (0..10).map(position_update).collect();
        assert_eq!(payloads, expected);
    }

    /// Test that subscribers see each message in registration order.
    #[tokio::test(start_paused = true)]
    async fn test_fan_out_order_is_registration_order() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            manager.subscribe(|_| true, move |msg| {
                log.lock().unwrap().push(format!("{tag}:{}", msg.kind()));
                Ok(())
            });
        }
        let (_, mut done) = manager.subscribe_channel(|_| true);

        let server = open(&manager, &connector, &mut servers).await;
        server.send_json(&json!({"type": "jog_stop"}));
        done.recv().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:jog_stop", "second:jog_stop", "third:jog_stop"]
        );
    }

    /// Test that a panicking or failing subscriber leaves the channel and others intact.
    #[tokio::test(start_paused = true)]
    async fn test_subscriber_failures_are_isolated() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        manager.subscribe(|_| true, |_| {
            Err(ChannelError::MalformedMessage("unknown joint".into()))
        });
        manager.subscribe(|_| true, |_| panic!("renderer bug"));
        let (_, mut healthy) = manager.subscribe_channel(|_| true);
        let mut events = manager.events();

        let server = open(&manager, &connector, &mut servers).await;
        server.send_json(&position_update(1));
        server.send_json(&position_update(2));

        assert_eq!(healthy.recv().await.unwrap().payload(), &position_update(1));
        assert_eq!(healthy.recv().await.unwrap().payload(), &position_update(2));
        let failure = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::DispatchFailed(_))).await;
        assert!(matches!(failure, ChannelEvent::DispatchFailed(text) if text.contains("unknown joint")));
        assert!(manager.is_connected());
    }

    /// Test that malformed inbound frames are dropped without closing the channel.
    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_are_isolated() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let (_, mut received) = manager.subscribe_channel(|_| true);
        let mut events = manager.events();

        let server = open(&manager, &connector, &mut servers).await;
        server.send_text("{not json");
        server.send_text(r#"{"no_type": true}"#);
        server.send_binary(&[1, 2, 3]);
        server.send_json(&position_update(3));

        assert_eq!(received.recv().await.unwrap().kind(), "position_update");
        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ChannelEvent::DispatchFailed(_)) {
                failures += 1;
            }
        }
        assert_eq!(failures, 3);
        assert!(manager.is_connected());
    }

    /// Test that unsubscribed handlers stop receiving.
    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let (id, mut removed) = manager.subscribe_channel(|_| true);
        let (_, mut kept) = manager.subscribe_channel(|_| true);
        manager.unsubscribe(id);

        let server = open(&manager, &connector, &mut servers).await;
        server.send_json(&json!({"type": "jog_stop"}));
        kept.recv().await.unwrap();

        assert!(removed.try_recv().is_err());
    }

    /// Test that a clean close from the backend never reconnects.
    #[tokio::test(start_paused = true)]
    async fn test_clean_close_does_not_reconnect() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1000);
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
        assert_eq!(event, ChannelEvent::Disconnected { code: 1000, clean: true });

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    /// Test the backoff schedule 1s, 2s, 4s, 8s, 16s and the fail-stop after it.
    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_until_exhausted() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1006);
        let exhausted =
            wait_for_event(&mut events, |e| matches!(e, ChannelEvent::ReconnectExhausted { .. })).await;
        assert_eq!(exhausted, ChannelEvent::ReconnectExhausted { attempts: 5 });

        let times = connector.attempt_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts(), 6);

        let status = manager.status();
        assert!(status.exhausted);
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(
            status.error.as_deref(),
            Some(crate::constants::RECONNECT_EXHAUSTED_TEXT)
        );
    }

    /// Test that a dropped stream or read error counts as an abnormal close.
    #[tokio::test(start_paused = true)]
    async fn test_stream_end_and_read_error_reconnect() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        connector.push(Script::Accept);
        drop(server);
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
        assert_eq!(event, ChannelEvent::Disconnected { code: 1006, clean: false });

        let server = servers.recv().await.unwrap();
        wait_for_event(&mut events, |e| *e == ChannelEvent::Connected).await;

        server.fail("connection reset by peer");
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
        assert!(matches!(event, ChannelEvent::Reconnecting { attempt: 1, .. }));
    }

    /// Test that reaching Open resets the attempt counter.
    #[tokio::test(start_paused = true)]
    async fn test_open_resets_attempt_counter() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        connector.push(Script::Refuse);
        connector.push(Script::Accept);
        server.close_with(1006);

        let second = servers.recv().await.unwrap();
        wait_for_event(&mut events, |e| *e == ChannelEvent::Connected).await;
        assert_eq!(manager.status().attempts, 0);

        second.close_with(4000);
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
        assert_eq!(
            event,
            ChannelEvent::Reconnecting {
                attempt: 1,
                max_attempts: 5,
                delay: Duration::from_secs(1),
            }
        );
    }

    /// Test that close() with a pending retry timer prevents any further attempt.
    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1006);
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
        manager.close().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.status().attempts, 0);
    }

    /// Test that close() on an open channel sends the clean close code.
    #[tokio::test(start_paused = true)]
    async fn test_close_sends_clean_code() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let mut server = open(&manager, &connector, &mut servers).await;

        manager.close().await;

        assert_eq!(server.recv().await, Some(MockFrame::Close(1000)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that close() aborts a handshake that has not completed.
    #[tokio::test(start_paused = true)]
    async fn test_close_aborts_inflight_attempt() {
        let (manager, connector, _servers) = manager_with(ChannelConfig::new(ENDPOINT));
        connector.push(Script::Hang);
        manager.connect();
        manager.close().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that an unusable endpoint fails silently and is never retried.
    #[tokio::test(start_paused = true)]
    async fn test_invalid_endpoint_is_not_retried() {
        let (manager, connector, _servers) = manager_with(ChannelConfig::new("pendant.test:8080"));
        let mut events = manager.events();

        manager.connect();
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Error(_))).await;
        assert!(matches!(event, ChannelEvent::Error(text) if text.contains("Invalid endpoint")));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.status().error.is_some());
    }

    /// Test that the optional cap bounds the delay.
    #[tokio::test(start_paused = true)]
    async fn test_backoff_cap_is_applied() {
        let mut config = ChannelConfig::new(ENDPOINT);
        config.max_reconnect_attempts = 4;
        config.max_backoff = Some(Duration::from_secs(3));
        let (manager, connector, _servers) = manager_with(config);
        let mut events = manager.events();

        manager.connect();
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::ReconnectExhausted { .. })).await;

        let times = connector.attempt_times();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, [1, 2, 3, 3].map(Duration::from_secs).to_vec());
    }

    /// Test that connect() after exhaustion starts over with a fresh budget.
    #[tokio::test(start_paused = true)]
    async fn test_connect_after_exhaustion_starts_fresh() {
        let mut config = ChannelConfig::new(ENDPOINT);
        config.max_reconnect_attempts = 1;
        let (manager, connector, mut servers) = manager_with(config);
        let mut events = manager.events();

        manager.connect();
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::ReconnectExhausted { .. })).await;
        assert!(manager.status().exhausted);

        let _server = open(&manager, &connector, &mut servers).await;
        let status = manager.status();
        assert!(!status.exhausted);
        assert_eq!(status.attempts, 0);
        assert!(status.error.is_none());
    }

    /// Test that explicit connect() replaces a pending retry immediately.
    #[tokio::test(start_paused = true)]
    async fn test_connect_preempts_retry_timer() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1011);
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
        let before = Instant::now();
        let _server = open(&manager, &connector, &mut servers).await;

        assert_eq!(Instant::now(), before);
        assert_eq!(connector.attempts(), 2);
    }

    /// Test that dropping the manager cancels a pending retry.
    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_reconnect() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let server = open(&manager, &connector, &mut servers).await;
        let mut events = manager.events();

        server.close_with(1006);
        wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
        drop(manager);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that teardown leaves an open connection alone and never reconnects it.
    #[tokio::test(start_paused = true)]
    async fn test_teardown_keeps_open_connection() {
        let (manager, connector, mut servers) = manager_with(ChannelConfig::new(ENDPOINT));
        let mut server = open(&manager, &connector, &mut servers).await;
        let (_, mut received) = manager.subscribe_channel(|_| true);
        let mut events = manager.events();
        drop(manager);

        server.send_json(&position_update(9));
        assert_eq!(received.recv().await.unwrap().payload(), &position_update(9));
        assert_eq!(server.try_recv(), None);

        server.close_with(1006);
        let event = wait_for_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
        assert_eq!(event, ChannelEvent::Disconnected { code: 1006, clean: false });

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 1);
    }

    /// Test that wait_until_open reports exhaustion instead of hanging.
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_open_reports_exhaustion() {
        let mut config = ChannelConfig::new(ENDPOINT);
        config.max_reconnect_attempts = 2;
        let (manager, _connector, _servers) = manager_with(config);

        manager.connect();
        let err = manager
            .wait_until_open(Duration::from_secs(3600))
            .await
            .unwrap_err();

        assert_eq!(err, ChannelError::ReconnectExhausted { attempts: 2 });
    }

    /// Test that waiting after a fresh connect() ignores an earlier exhaustion.
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_open_after_exhaustion_and_reconnect() {
        let mut config = ChannelConfig::new(ENDPOINT);
        config.max_reconnect_attempts = 1;
        let (manager, connector, _servers) = manager_with(config);

        manager.connect();
        let err = manager.wait_until_open(Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(err, ChannelError::ReconnectExhausted { attempts: 1 });

        connector.push(Script::Accept);
        manager.connect();
        manager.wait_until_open(Duration::from_secs(60)).await.unwrap();

        assert!(manager.is_connected());
        assert!(!manager.status().exhausted);
    }

    /// Test that a failed send() before connecting does not fail the next wait.
    #[tokio::test(start_paused = true)]
    async fn test_wait_until_open_after_failed_send() {
        let (manager, connector, _servers) = manager_with(ChannelConfig::new(ENDPOINT));
        manager.send(jog_stop()).await.unwrap_err();
        assert!(manager.status().error.is_some());

        connector.push(Script::Accept);
        manager.connect();
        manager.wait_until_open(Duration::from_secs(60)).await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.status().error.is_none());
    }

    /// Test that an intentional close leaves no error in the banner.
    #[tokio::test(start_paused = true)]
    async fn test_close_clears_error() {
        let mut config = ChannelConfig::new(ENDPOINT);
        config.max_reconnect_attempts = 1;
        let (manager, _connector, _servers) = manager_with(config);

        manager.connect();
        manager.wait_until_open(Duration::from_secs(60)).await.unwrap_err();
        assert_eq!(
            manager.status().error.as_deref(),
            Some(crate::constants::RECONNECT_EXHAUSTED_TEXT)
        );

        manager.close().await;

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.error.is_none());
        assert!(!status.exhausted);
    }
}
