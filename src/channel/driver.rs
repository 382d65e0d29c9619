//! Driver task: the only owner of the transport and the state machine.
//!
//! Host commands, handshake completion, inbound frames and the retry timer
//! are multiplexed by one `tokio::select!` and handled to completion, one at
//! a time. Nothing else mutates connection state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::message::{InboundMessage, OutboundMessage};
use super::policy::ReconnectPolicy;
use super::subscriptions::{Handler, Predicate, SubscriptionId, Subscriptions};
use super::transport::{
    ConnectFuture, Connector, FrameSink, FrameStream, TransportError, TransportEvent,
    TransportPair,
};
use super::{ChannelConfig, ChannelError, ChannelEvent, ChannelStatus, ConnectionState};
use crate::constants::{
    ABNORMAL_CLOSE_CODE, CLEAN_CLOSE_CODE, CLIENT_CLOSE_REASON, CONNECT_FAILED_TEXT,
    NOT_CONNECTED_TEXT, RECONNECT_EXHAUSTED_TEXT,
};

/// Stand-in deadline for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Request from the host side.
pub(super) enum DriverCommand {
    Connect,
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Subscribe {
        id: SubscriptionId,
        predicate: Predicate,
        handler: Handler,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    /// Answered once every earlier command has been handled.
    Barrier {
        reply: oneshot::Sender<()>,
    },
    Teardown,
}

impl std::fmt::Debug for DriverCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "Connect",
            Self::Send { .. } => "Send",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Close { .. } => "Close",
            Self::Barrier { .. } => "Barrier",
            Self::Teardown => "Teardown",
        };
        f.write_str(name)
    }
}

/// One unit of work for the loop.
enum Step {
    Command(Option<DriverCommand>),
    Handshake(Result<TransportPair, TransportError>),
    Frame(Option<Result<TransportEvent, TransportError>>),
    RetryDue,
}

pub(super) struct Driver {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    last_error: Option<String>,
    exhausted: bool,
    subscriptions: Subscriptions,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    connecting: Option<ConnectFuture>,
    writer: Option<Box<dyn FrameSink>>,
    reader: Option<Box<dyn FrameStream>>,
    retry_at: Option<Instant>,
    torn_down: bool,
    status_tx: watch::Sender<ChannelStatus>,
    events_tx: broadcast::Sender<ChannelEvent>,
}

impl Driver {
    pub(super) fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<DriverCommand>,
        status_tx: watch::Sender<ChannelStatus>,
        events_tx: broadcast::Sender<ChannelEvent>,
    ) -> Self {
        let policy = config.policy();
        Self {
            config,
            connector,
            policy,
            state: ConnectionState::Disconnected,
            last_error: None,
            exhausted: false,
            subscriptions: Subscriptions::default(),
            commands,
            connecting: None,
            writer: None,
            reader: None,
            retry_at: None,
            torn_down: false,
            status_tx,
            events_tx,
        }
    }

    /// Run until torn down and no connection is left to drain.
    pub(super) async fn run(mut self) {
        log::debug!("Channel driver started for {}", self.config.endpoint);

        loop {
            if self.torn_down && self.reader.is_none() && self.connecting.is_none() {
                break;
            }

            let step = tokio::select! {
                command = self.commands.recv(), if !self.torn_down => Step::Command(command),
                result = handshake(&mut self.connecting) => Step::Handshake(result),
                event = next_frame(&mut self.reader) => Step::Frame(event),
                () = retry_timer(self.retry_at) => Step::RetryDue,
            };

            match step {
                Step::Command(Some(command)) => self.on_command(command).await,
                Step::Command(None) => self.on_teardown(),
                Step::Handshake(result) => self.on_handshake(result),
                Step::Frame(event) => self.on_frame(event),
                Step::RetryDue => self.on_retry_due(),
            }
        }

        log::debug!("Channel driver for {} stopped", self.config.endpoint);
    }

    async fn on_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Connect => self.on_connect_requested(),
            DriverCommand::Send { message, reply } => {
                let result = self.on_send(message).await;
                let _ = reply.send(result);
            }
            DriverCommand::Subscribe {
                id,
                predicate,
                handler,
            } => {
                self.subscriptions.insert(id, predicate, handler);
                log::debug!("Registered subscriber {} ({} total)", id, self.subscriptions.len());
            }
            DriverCommand::Unsubscribe { id } => {
                if !self.subscriptions.remove(id) {
                    log::debug!("Unsubscribe for unknown subscriber {}", id);
                }
            }
            DriverCommand::Close { reply } => {
                self.on_close().await;
                let _ = reply.send(());
            }
            DriverCommand::Barrier { reply } => {
                let _ = reply.send(());
            }
            DriverCommand::Teardown => self.on_teardown(),
        }
    }

    fn on_connect_requested(&mut self) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing => {
                log::debug!("connect() ignored: channel is {}", self.state);
            }
            ConnectionState::Disconnected | ConnectionState::Reconnecting { .. } => {
                if self.retry_at.take().is_some() {
                    log::info!("Pending reconnect replaced by explicit connect");
                }
                self.policy.reset();
                self.exhausted = false;
                self.last_error = None;
                self.start_attempt();
            }
        }
    }

    /// Construct a transport for the endpoint and start its handshake.
    fn start_attempt(&mut self) {
        let endpoint = &self.config.endpoint;
        match self.connector.open(endpoint) {
            Ok(handshake) => {
                log::info!("Connecting to {}", endpoint);
                self.connecting = Some(handshake);
                self.state = ConnectionState::Connecting;
                self.publish();
            }
            Err(e) => {
                log::error!("Cannot open transport for {}: {}", endpoint, e);
                self.last_error = Some(e.to_string());
                self.state = ConnectionState::Disconnected;
                self.publish();
                self.emit(ChannelEvent::Error(e.to_string()));
            }
        }
    }

    fn on_handshake(&mut self, result: Result<TransportPair, TransportError>) {
        self.connecting = None;

        match result {
            Ok((writer, reader)) => {
                log::info!("Connected to {}", self.config.endpoint);
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.policy.reset();
                self.exhausted = false;
                self.last_error = None;
                self.state = ConnectionState::Open;
                self.publish();
                self.emit(ChannelEvent::Connected);
            }
            Err(e) => {
                log::warn!("Failed to connect to {}: {}", self.config.endpoint, e);
                self.last_error = Some(CONNECT_FAILED_TEXT.to_string());
                self.emit(ChannelEvent::Error(e.to_string()));
                self.on_transport_closed(ABNORMAL_CLOSE_CODE);
            }
        }
    }

    fn on_frame(&mut self, event: Option<Result<TransportEvent, TransportError>>) {
        match event {
            Some(Ok(TransportEvent::Text(text))) => self.dispatch_text(&text),
            Some(Ok(TransportEvent::Binary(data))) => {
                let error = ChannelError::MalformedMessage(format!(
                    "unexpected {}-byte binary frame",
                    data.len()
                ));
                log::warn!("Dropping inbound frame: {}", error);
                self.emit(ChannelEvent::DispatchFailed(error.to_string()));
            }
            Some(Ok(TransportEvent::Close { code, reason })) => {
                log::info!("Connection closed by backend (code {}): {}", code, reason);
                self.on_transport_closed(code);
            }
            Some(Err(e)) => {
                log::error!("Transport error: {}", e);
                self.last_error = Some(e.to_string());
                self.emit(ChannelEvent::Error(e.to_string()));
                self.on_transport_closed(ABNORMAL_CLOSE_CODE);
            }
            None => {
                log::warn!("Connection dropped without a close frame");
                self.on_transport_closed(ABNORMAL_CLOSE_CODE);
            }
        }
    }

    fn dispatch_text(&mut self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping inbound frame: {}", e);
                self.emit(ChannelEvent::DispatchFailed(e.to_string()));
                return;
            }
        };

        log::trace!("Dispatching `{}` message", message.kind());
        for failure in self.subscriptions.dispatch(&message) {
            self.emit(ChannelEvent::DispatchFailed(format!(
                "{}: {}",
                failure.subscription, failure.error
            )));
        }
    }

    /// The connection is gone; decide between idle, retry and exhaustion.
    fn on_transport_closed(&mut self, code: u16) {
        self.writer = None;
        self.reader = None;
        self.connecting = None;

        let clean = code == CLEAN_CLOSE_CODE;
        self.emit(ChannelEvent::Disconnected { code, clean });

        if clean {
            log::info!("Connection closed cleanly, not reconnecting");
            self.state = ConnectionState::Disconnected;
            self.publish();
        } else if self.torn_down {
            log::info!("Connection closed after teardown, not reconnecting");
            self.state = ConnectionState::Disconnected;
            self.publish();
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let max_attempts = self.policy.max_attempts();

        if let Some((attempt, delay)) = self.policy.next_attempt() {
            log::info!(
                "Attempting to reconnect ({}/{}) in {:.1}s",
                attempt,
                max_attempts,
                delay.as_secs_f32()
            );
            let now = Instant::now();
            self.retry_at = Some(now.checked_add(delay).unwrap_or(now + FAR_FUTURE));
            self.state = ConnectionState::Reconnecting {
                attempt,
                next_retry_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            };
            self.publish();
            self.emit(ChannelEvent::Reconnecting {
                attempt,
                max_attempts,
                delay,
            });
        } else {
            let attempts = self.policy.attempts();
            log::error!("{} after {} attempts", RECONNECT_EXHAUSTED_TEXT, attempts);
            self.exhausted = true;
            self.last_error = Some(RECONNECT_EXHAUSTED_TEXT.to_string());
            self.state = ConnectionState::Disconnected;
            self.publish();
            self.emit(ChannelEvent::ReconnectExhausted { attempts });
        }
    }

    fn on_retry_due(&mut self) {
        self.retry_at = None;
        log::debug!("Reconnect timer fired (attempt {})", self.policy.attempts());
        self.start_attempt();
    }

    async fn on_send(&mut self, message: OutboundMessage) -> Result<(), ChannelError> {
        if !self.state.is_open() || self.writer.is_none() {
            log::warn!(
                "Dropping `{}` message: channel is {}",
                message.kind(),
                self.state
            );
            self.last_error = Some(NOT_CONNECTED_TEXT.to_string());
            self.publish();
            return Err(ChannelError::NotConnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(ChannelError::NotConnected);
        };

        log::debug!("Sending `{}` message", message.kind());
        writer.send_text(message.to_text()).await.map_err(|e| {
            log::error!("Failed to send `{}` message: {}", message.kind(), e);
            ChannelError::Transport(e)
        })
    }

    async fn on_close(&mut self) {
        if self.retry_at.take().is_some() {
            log::info!("Cancelled pending reconnect");
        }
        if self.connecting.take().is_some() {
            log::info!("Aborted in-flight connection attempt");
        }
        self.policy.reset();
        self.exhausted = false;
        self.last_error = None;

        if let Some(mut writer) = self.writer.take() {
            self.state = ConnectionState::Closing;
            self.publish();

            if let Err(e) = writer.close(CLEAN_CLOSE_CODE, CLIENT_CLOSE_REASON).await {
                log::warn!("Close handshake failed: {}", e);
            }
            self.reader = None;
            log::info!("Closed connection to {}", self.config.endpoint);
            self.emit(ChannelEvent::Disconnected {
                code: CLEAN_CLOSE_CODE,
                clean: true,
            });
        }

        self.state = ConnectionState::Disconnected;
        self.publish();
    }

    /// Host went away: cancel retries, leave an open connection alone.
    fn on_teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.retry_at.take().is_some() {
            log::info!("Cancelled pending reconnect on teardown");
        }
        if self.connecting.take().is_some() {
            log::info!("Aborted in-flight connection attempt on teardown");
        }
        if self.reader.is_some() {
            log::debug!("Leaving open connection to {} running", self.config.endpoint);
        } else {
            self.state = ConnectionState::Disconnected;
            self.publish();
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(ChannelStatus {
            state: self.state,
            error: self.last_error.clone(),
            attempts: self.policy.attempts(),
            exhausted: self.exhausted,
        });
    }

    fn emit(&self, event: ChannelEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }
}

async fn handshake(connecting: &mut Option<ConnectFuture>) -> Result<TransportPair, TransportError> {
    match connecting.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    reader: &mut Option<Box<dyn FrameStream>>,
) -> Option<Result<TransportEvent, TransportError>> {
    match reader.as_mut() {
        Some(reader) => reader.next_event().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
