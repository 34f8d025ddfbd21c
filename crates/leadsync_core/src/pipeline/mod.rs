//! Lead fetch pipeline.
//!
//! # Responsibility
//! - `fetch`: access-path fallback, batched detail join, error classification.
//! - `compose`: flattening, display name derivation, redaction masking.
//!
//! # Invariants
//! - Raw backend rows are decoded here and nowhere later.

pub mod compose;
pub mod fetch;

pub use compose::{apply_detail_patch, compose_lead, compose_leads, display_name, mask_redacted};
pub use fetch::{FetchError, FetchPipeline, FetchStage};
