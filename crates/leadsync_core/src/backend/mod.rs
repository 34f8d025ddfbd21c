//! Backend access contracts for lead reads.
//!
//! # Responsibility
//! - Define the three read operations the fetch pipeline depends on.
//! - Classify failures into access vs transport errors so the pipeline can
//!   decide between falling back and failing.
//!
//! # Invariants
//! - Reads return raw JSON rows; typing happens in the pipeline.
//! - The privileged procedure returns an empty vector, never a null body,
//!   when the caller can see no rows.

use crate::db::DbError;
use crate::model::caller::OwnerScope;
use crate::model::lead::DetailId;
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod sqlite;

pub use sqlite::SqliteLeadBackend;

/// Raw row as returned by the backend wire format.
pub type RawRow = Value;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure of one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Caller is not (yet) allowed to use this access path.
    Access(String),
    /// Network, database or protocol failure.
    Transport(String),
    /// Response body could not be read as rows.
    InvalidRow(String),
}

impl BackendError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Access(_) => "access_denied",
            Self::Transport(_) => "transport_failed",
            Self::InvalidRow(_) => "invalid_row",
        }
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access(message) => write!(f, "access denied: {message}"),
            Self::Transport(message) => write!(f, "backend unavailable: {message}"),
            Self::InvalidRow(message) => write!(f, "invalid backend row: {message}"),
        }
    }
}

impl Error for BackendError {}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Read operations over the lead and detail collections.
#[async_trait]
pub trait LeadBackend: Send + Sync {
    /// Privileged procedure: every lead row the caller may see through
    /// ownership or role grants. Order is unspecified.
    async fn accessible_leads(&self, caller: &OwnerScope) -> BackendResult<Vec<RawRow>>;

    /// Direct read of the lead table, newest first.
    ///
    /// `owner_filter = None` reads unfiltered.
    async fn select_leads(&self, owner_filter: Option<Uuid>) -> BackendResult<Vec<RawRow>>;

    /// Batched read of detail rows whose id is in `ids`.
    async fn select_details(&self, ids: &[DetailId]) -> BackendResult<Vec<RawRow>>;
}

#[async_trait]
impl<B: LeadBackend + ?Sized> LeadBackend for std::sync::Arc<B> {
    async fn accessible_leads(&self, caller: &OwnerScope) -> BackendResult<Vec<RawRow>> {
        (**self).accessible_leads(caller).await
    }

    async fn select_leads(&self, owner_filter: Option<Uuid>) -> BackendResult<Vec<RawRow>> {
        (**self).select_leads(owner_filter).await
    }

    async fn select_details(&self, ids: &[DetailId]) -> BackendResult<Vec<RawRow>> {
        (**self).select_details(ids).await
    }
}
