//! Subscriber registry and fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::message::InboundMessage;
use super::ChannelError;

/// Decides whether a subscriber wants a message.
pub type Predicate = Box<dyn Fn(&InboundMessage) -> bool + Send>;

/// Receives matching messages. Runs on the driver task; must not block.
pub type Handler = Box<dyn FnMut(&InboundMessage) -> Result<(), ChannelError> + Send>;

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    predicate: Predicate,
    handler: Handler,
}

/// One subscriber that failed while handling a message.
#[derive(Debug)]
pub struct DispatchFailure {
    /// Failing subscriber.
    pub subscription: SubscriptionId,
    /// What went wrong.
    pub error: ChannelError,
}

/// Registered subscribers in registration order.
#[derive(Default)]
pub struct Subscriptions {
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("count", &self.subscribers.len())
            .finish()
    }
}

impl Subscriptions {
    /// Append a subscriber. Later subscribers see each message after earlier ones.
    pub fn insert(&mut self, id: SubscriptionId, predicate: Predicate, handler: Handler) {
        self.subscribers.push(Subscriber {
            id,
            predicate,
            handler,
        });
    }

    /// Remove a subscriber. Returns `false` if the id was unknown.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Hand `message` to every matching subscriber.
    ///
    /// A subscriber that errors or panics is reported in the returned list
    /// and does not stop delivery to the rest.
    pub fn dispatch(&mut self, message: &InboundMessage) -> Vec<DispatchFailure> {
        let mut failures = Vec::new();

        for subscriber in &mut self.subscribers {
            let predicate = &subscriber.predicate;
            let handler = &mut subscriber.handler;

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if predicate(message) {
                    handler(message)
                } else {
                    Ok(())
                }
            }));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => ChannelError::MalformedMessage(format!(
                    "subscriber panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };

            log::warn!(
                "Subscriber {} failed on `{}` message: {}",
                subscriber.id,
                message.kind(),
                error
            );
            failures.push(DispatchFailure {
                subscription: subscriber.id,
                error,
            });
        }

        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
