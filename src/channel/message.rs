//! Opaque channel payloads.
//!
//! The channel only looks at the `type` discriminator of a message. Typed
//! views live in [`crate::protocol`] and are reached through
//! [`InboundMessage::decode`] and `OutboundMessage::try_from`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::ChannelError;

/// Field that carries the discriminator in both directions.
pub const DISCRIMINATOR_FIELD: &str = "type";

/// Extract the discriminator, rejecting anything that is not a tagged object.
fn discriminator(value: &Value) -> Result<String, ChannelError> {
    let Some(object) = value.as_object() else {
        return Err(ChannelError::MalformedMessage(
            "payload is not a JSON object".to_string(),
        ));
    };
    match object.get(DISCRIMINATOR_FIELD) {
        Some(Value::String(kind)) => Ok(kind.clone()),
        Some(_) => Err(ChannelError::MalformedMessage(format!(
            "`{DISCRIMINATOR_FIELD}` is not a string"
        ))),
        None => Err(ChannelError::MalformedMessage(format!(
            "missing `{DISCRIMINATOR_FIELD}` field"
        ))),
    }
}

/// A message received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    kind: String,
    payload: Value,
    received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MalformedMessage`] if the text is not a JSON
    /// object with a string `type` field.
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        let payload: Value = serde_json::from_str(text)
            .map_err(|e| ChannelError::MalformedMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(payload)
    }

    /// Wrap an already-parsed payload.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MalformedMessage`] if the payload has no
    /// string discriminator.
    pub fn from_value(payload: Value) -> Result<Self, ChannelError> {
        let kind = discriminator(&payload)?;
        Ok(Self {
            kind,
            payload,
            received_at: Utc::now(),
        })
    }

    /// Discriminator value, e.g. `position_update`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the discriminator equals `kind`.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Raw JSON payload, discriminator included.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Local time the frame was parsed.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Decode into a typed view.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MalformedMessage`] if the payload does not
    /// match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        T::deserialize(&self.payload).map_err(|e| {
            ChannelError::MalformedMessage(format!("cannot decode `{}` message: {e}", self.kind))
        })
    }
}

/// A message submitted by the host for delivery to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    kind: String,
    payload: Value,
}

impl OutboundMessage {
    /// Serialize any tagged value into an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::MalformedMessage`] if serialization fails or
    /// the result carries no string `type`.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ChannelError> {
        let payload = serde_json::to_value(value)
            .map_err(|e| ChannelError::MalformedMessage(format!("cannot serialize: {e}")))?;
        Self::try_from(payload)
    }

    /// Discriminator value.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Raw JSON payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Wire text of this message.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.payload.to_string()
    }
}

impl TryFrom<Value> for OutboundMessage {
    type Error = ChannelError;

    fn try_from(payload: Value) -> Result<Self, Self::Error> {
        let kind = discriminator(&payload)?;
        Ok(Self { kind, payload })
    }
}
