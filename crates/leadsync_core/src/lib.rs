//! Real-time lead synchronization core.
//! Keeps a client-side lead list consistent with the backend through
//! access-aware fetches and push-based change events.

pub mod backend;
pub mod binder;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod realtime;
pub mod store;

pub use backend::{BackendError, BackendResult, LeadBackend, RawRow, SqliteLeadBackend};
pub use binder::{Binding, SubscriptionBinder};
pub use config::{ConfigError, SyncConfig};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use model::caller::{CallerRole, OwnerScope};
pub use model::lead::{DetailId, DetailPatch, Lead, LeadDetail, LeadId, LeadRecord};
pub use pipeline::{FetchError, FetchPipeline, FetchStage};
pub use realtime::{
    ChangeChannelAdapter, ChangeEventType, ChangeHandlers, ChangeTransport, ChannelError,
    ChannelStatus, EventFilter, LocalChangeHub, RawChangeEvent,
};
pub use store::{ErrorNotifier, FetchMode, FetchOutcome, LeadStore, LeadsView, LogNotifier};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
