//! Cross-context message bridge.
//!
//! Code in the page's own script context can't reach the engine directly.
//! It talks to it through [`Envelope`]s sent over a [`MessageChannel`]; the
//! engine decodes them into the closed [`BridgeMessage`] enum and processes
//! them one at a time, in emission order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::BridgeError;

/// Wire form of a bridge message: `{ "kind": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Serialize for string-based transports.
    pub fn to_wire(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    /// Decode a string received from a transport.
    pub fn from_wire(wire: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(wire).map_err(|e| BridgeError::Malformed(e.to_string()))
    }
}

/// Message kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SetFeatures,
    Refresh,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetFeatures => "setFeatures",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setFeatures" => Ok(Self::SetFeatures),
            "refresh" => Ok(Self::Refresh),
            other => Err(BridgeError::UnknownKind(other.to_string())),
        }
    }
}

/// Decoded bridge message.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Merge these preferences and re-resolve.
    SetFeatures(IndexMap<String, Value>),
    /// Re-resolve, optionally for another URL.
    Refresh { url: Option<String> },
}

impl BridgeMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SetFeatures(_) => MessageKind::SetFeatures,
            Self::Refresh { .. } => MessageKind::Refresh,
        }
    }
}

impl TryFrom<Envelope> for BridgeMessage {
    type Error = BridgeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let kind: MessageKind = envelope.kind.parse()?;
        let invalid = |message: &str| BridgeError::InvalidPayload {
            kind: kind.to_string(),
            message: message.to_string(),
        };

        match kind {
            MessageKind::SetFeatures => match envelope.payload {
                Value::Object(map) => Ok(Self::SetFeatures(map.into_iter().collect())),
                _ => Err(invalid("expected an object of feature values")),
            },
            MessageKind::Refresh => match envelope.payload {
                Value::Null => Ok(Self::Refresh { url: None }),
                Value::String(url) => Ok(Self::Refresh { url: Some(url) }),
                Value::Object(map) => match map.get("url") {
                    None | Some(Value::Null) => Ok(Self::Refresh { url: None }),
                    Some(Value::String(url)) => Ok(Self::Refresh {
                        url: Some(url.clone()),
                    }),
                    Some(_) => Err(invalid("url must be a string")),
                },
                _ => Err(invalid("expected null, a URL string or {\"url\": ...}")),
            },
        }
    }
}

impl From<BridgeMessage> for Envelope {
    fn from(message: BridgeMessage) -> Self {
        let kind = message.kind();
        let payload = match message {
            BridgeMessage::SetFeatures(map) => Value::Object(map.into_iter().collect()),
            BridgeMessage::Refresh { url } => serde_json::json!({ "url": url }),
        };
        Envelope::new(kind.as_str(), payload)
    }
}

/// Receiving end of a channel subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Next envelope, or `None` when the channel is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

/// Broadcast transport visible to both script contexts.
pub trait MessageChannel: Send + Sync {
    /// Deliver to every current subscriber, preserving send order.
    fn send(&self, envelope: Envelope) -> Result<(), BridgeError>;

    fn subscribe(&self) -> Subscription;
}

/// In-process fan-out channel.
#[derive(Debug, Default)]
pub struct LocalChannel {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl MessageChannel for LocalChannel {
    fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        if subscribers.is_empty() {
            return Err(BridgeError::Closed);
        }
        trace!(kind = %envelope.kind, receivers = subscribers.len(), "Envelope sent");
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }
}

/// Channel that passes every envelope through its JSON wire form, so
/// receivers never share data with the sender.
pub struct JsonChannel<C> {
    inner: C,
}

impl<C: MessageChannel> JsonChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: MessageChannel> MessageChannel for JsonChannel<C> {
    fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        let wire = envelope.to_wire()?;
        self.inner.send(Envelope::from_wire(&wire)?)
    }

    fn subscribe(&self) -> Subscription {
        self.inner.subscribe()
    }
}

/// The surface handed to the sandboxed context.
#[derive(Clone)]
pub struct BridgeClient {
    channel: Arc<dyn MessageChannel>,
}

impl BridgeClient {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self { channel }
    }

    /// Send a raw message. Kinds are validated by the receiving engine.
    pub fn dispatch(&self, kind: &str, payload: Value) -> Result<(), BridgeError> {
        self.channel.send(Envelope::new(kind, payload))
    }

    pub fn set_features<K>(&self, partial: impl IntoIterator<Item = (K, Value)>) -> Result<(), BridgeError>
    where
        K: Into<String>,
    {
        let map = partial.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.channel.send(BridgeMessage::SetFeatures(map).into())
    }

    pub fn refresh(&self, url: Option<&str>) -> Result<(), BridgeError> {
        self.channel.send(
            BridgeMessage::Refresh {
                url: url.map(str::to_string),
            }
            .into(),
        )
    }
}
