//! In-memory lead synchronization store.
//!
//! # Responsibility
//! - Hold the composite lead list a UI scope renders.
//! - Run visible and silent refetches through the fetch pipeline.
//! - Apply event-driven patches and removals in place.
//!
//! # Invariants
//! - At most one pipeline run is active per store; overlapping requests are
//!   dropped, not queued.
//! - No two records share a lead id.
//! - A removed lead stays removed even if a fetch that started earlier
//!   completes afterwards.
//! - The empty-first-load retry fires at most once per store.

pub mod notify;
mod sync_store;

pub use notify::{ErrorNotifier, LogNotifier};
pub use sync_store::{FetchMode, FetchOutcome, LeadStore, LeadsView};
