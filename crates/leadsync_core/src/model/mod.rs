//! Typed lead records shared by the fetch pipeline, store and binder.
//!
//! # Responsibility
//! - Define the identity row, detail row and composite view of a lead.
//! - Define the caller scope that drives access-path selection.
//!
//! # Invariants
//! - Backend rows are decoded into these types at the pipeline/channel boundary;
//!   untyped JSON never reaches the store.
//! - A `Lead` is keyed by its `LeadRecord` id.

pub mod caller;
pub mod lead;
