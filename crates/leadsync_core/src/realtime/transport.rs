//! Wire-level change-notification protocol.
//!
//! # Responsibility
//! - Define the raw `{eventType, new, old}` event and subscription filter.
//! - Define the transport contract that channel adapters subscribe through.
//!
//! # Invariants
//! - `unsubscribe` is idempotent.
//! - Subscribing an already-live channel id replaces the previous stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;

/// Kind of row mutation carried by one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

impl ChangeEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Which mutations a subscription wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    Insert,
    Update,
    Delete,
    /// Wire form `*`.
    Any,
}

impl EventFilter {
    pub fn matches(self, event_type: ChangeEventType) -> bool {
        match self {
            Self::Any => true,
            Self::Insert => event_type == ChangeEventType::Insert,
            Self::Update => event_type == ChangeEventType::Update,
            Self::Delete => event_type == ChangeEventType::Delete,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Any => "*",
        }
    }
}

/// Subscription parameters sent with `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionSpec {
    pub event: EventFilter,
    pub schema: String,
    pub table: String,
}

/// One change notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    #[serde(rename = "eventType")]
    pub event_type: ChangeEventType,
    pub schema: String,
    pub table: String,
    /// New row image; `Null` for deletes.
    #[serde(default)]
    pub new: Value,
    /// Old row image; usually key columns only.
    #[serde(default)]
    pub old: Value,
}

/// Receiving side of one live subscription.
pub type ChangeStream = mpsc::UnboundedReceiver<RawChangeEvent>;

/// Subscription failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Transport is offline or refused the connection.
    Unavailable(String),
    /// Channel id or subscription parameters were rejected.
    Rejected { channel_id: String, reason: String },
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(message) => write!(f, "change transport unavailable: {message}"),
            Self::Rejected { channel_id, reason } => {
                write!(f, "subscription `{channel_id}` rejected: {reason}")
            }
        }
    }
}

impl Error for ChannelError {}

/// Push channel transport.
pub trait ChangeTransport: Send + Sync {
    /// Opens a subscription and returns its event stream.
    fn subscribe(
        &self,
        channel_id: &str,
        spec: &SubscriptionSpec,
    ) -> Result<ChangeStream, ChannelError>;

    /// Closes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, channel_id: &str);
}
