//! Commands that talk to the backend over the WebSocket channel.
//!
//! # Examples
//!
//! ```bash
//! # Stream position updates until Ctrl-C
//! pendant-link watch --type position_update
//!
//! # Nudge the base joint 5 degrees counter-clockwise
//! pendant-link jog --joint base_rotation --direction -1 --increment 5
//! ```

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use crate::channel::{
    ChannelEvent, ChannelManager, ChannelStatus, ConnectionState, InboundMessage, OutboundMessage,
};
use crate::config::Config;
use crate::constants::COMMAND_CONNECT_TIMEOUT;
use crate::protocol::{Command, Telemetry};

/// Prints telemetry lines to stdout until Ctrl-C or reconnect exhaustion.
///
/// `kinds` filters by message `type`; empty means everything.
///
/// # Errors
///
/// Returns an error if the retry budget is exhausted or the endpoint is unusable.
pub async fn watch(config: &Config, kinds: &[String]) -> Result<()> {
    let manager = ChannelManager::new(config.channel_config());
    let filter = kinds.to_vec();
    let (_, mut messages) =
        manager.subscribe_channel(move |m| filter.is_empty() || filter.iter().any(|k| m.is(k)));
    let mut events = manager.events();

    manager.connect();
    log::info!("Watching {}", config.endpoint());

    loop {
        tokio::select! {
            Some(message) = messages.recv() => println!("{}", render(&message)),
            event = events.recv() => match event {
                Ok(ChannelEvent::ReconnectExhausted { attempts }) => {
                    anyhow::bail!("Gave up after {} reconnection attempts", attempts);
                }
                Ok(ChannelEvent::Disconnected { clean: true, .. }) => {
                    log::info!("Backend closed the connection");
                    return Ok(());
                }
                Ok(ChannelEvent::Error(text)) if gave_up(&manager.status()) => {
                    anyhow::bail!("Cannot connect: {}", text);
                }
                Ok(event) => log::debug!("Channel event: {:?}", event),
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} channel events", missed),
                Err(RecvError::Closed) => anyhow::bail!("Channel driver stopped"),
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, closing channel");
                manager.close().await;
                return Ok(());
            }
        }
    }
}

/// Sends one `jog_increment` once the channel is open.
///
/// Exactly one of `joint` and `axis` is expected; the CLI enforces this.
pub async fn jog(
    config: &Config,
    joint: Option<&str>,
    axis: Option<&str>,
    direction: i8,
    increment: f64,
) -> Result<()> {
    let command = match (joint, axis) {
        (Some(joint), None) => Command::jog_joint(joint, direction, increment),
        (None, Some(axis)) => Command::jog_axis(axis, direction, increment),
        _ => anyhow::bail!("Specify exactly one of --joint or --axis"),
    };
    send_once(config, &command).await
}

/// Sends `jog_stop` once the channel is open.
pub async fn stop(config: &Config) -> Result<()> {
    send_once(config, &Command::JogStop).await
}

async fn send_once(config: &Config, command: &Command) -> Result<()> {
    let message = OutboundMessage::try_from(command)?;
    let manager = ChannelManager::new(config.channel_config());

    manager.connect();
    manager
        .wait_until_open(COMMAND_CONNECT_TIMEOUT)
        .await
        .with_context(|| format!("Could not reach {}", config.endpoint()))?;

    let kind = message.kind().to_string();
    let result = manager.send(message).await;
    manager.close().await;
    result.with_context(|| format!("Failed to send {kind}"))?;

    println!("Sent {kind}");
    Ok(())
}

/// Idle with an error and budget left: the endpoint itself was rejected.
fn gave_up(status: &ChannelStatus) -> bool {
    status.state == ConnectionState::Disconnected && status.error.is_some() && !status.exhausted
}

/// One line per message: typed summary when known, raw JSON otherwise.
fn render(message: &InboundMessage) -> String {
    let time = message.received_at().format("%H:%M:%S%.3f");
    match Telemetry::try_from(message) {
        Ok(telemetry) => format!("{time} {telemetry}"),
        Err(_) => format!("{time} {}", message.payload()),
    }
}
