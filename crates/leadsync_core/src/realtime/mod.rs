//! Push-based change notification plumbing.
//!
//! # Responsibility
//! - `transport`: wire protocol and transport contract.
//! - `hub`: in-process transport used by the embedded backend.
//! - `channel`: typed adapter that owns channel lifecycle and dispatch.

pub mod channel;
pub mod hub;
pub mod transport;

pub use channel::{
    ChangeChannelAdapter, ChangeHandlers, ChangePayload, ChannelHandle, ChannelKey,
    ChannelStatus, RowKey,
};
pub use hub::LocalChangeHub;
pub use transport::{
    ChangeEventType, ChangeStream, ChangeTransport, ChannelError, EventFilter, RawChangeEvent,
    SubscriptionSpec,
};
