//! Lead fetch pipeline with privileged/direct fallback and batched join.
//!
//! # Responsibility
//! - Resolve the caller's visible lead rows, preferring the privileged
//!   procedure and falling back to a direct table read.
//! - Join detail rows in one batched request and compose `Lead`s.
//!
//! # Invariants
//! - The direct path runs only when the privileged path failed; an empty but
//!   successful privileged result is final.
//! - At most one detail request per fetch, never one per lead.
//! - Detail-join failures degrade to blank detail fields; only a direct-path
//!   failure fails the pipeline.

use crate::backend::{BackendError, LeadBackend, RawRow};
use crate::model::caller::OwnerScope;
use crate::model::lead::{DetailId, Lead, LeadDetail, LeadRecord};
use crate::pipeline::compose::compose_leads;
use log::{info, warn};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Privileged,
    Direct,
    DetailJoin,
}

impl FetchStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Privileged => "privileged",
            Self::Direct => "direct",
            Self::DetailJoin => "detail_join",
        }
    }
}

/// Fatal pipeline failure: every access path was exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub stage: FetchStage,
    pub cause: BackendError,
}

impl FetchError {
    /// Human-readable text for user-facing notifications.
    pub fn user_message(&self) -> String {
        match &self.cause {
            BackendError::Access(_) => {
                "You do not have access to these leads yet. Please try again shortly.".to_string()
            }
            BackendError::Transport(_) => {
                "Leads could not be loaded. Check your connection and try again.".to_string()
            }
            BackendError::InvalidRow(_) => {
                "Leads could not be loaded because the server sent unexpected data.".to_string()
            }
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "lead fetch failed at {} stage: {}", self.stage.as_str(), self.cause)
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}

/// Composite lead loader over a `LeadBackend`.
pub struct FetchPipeline<B> {
    backend: B,
}

impl<B: LeadBackend> FetchPipeline<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Loads the caller's composite leads.
    ///
    /// # Errors
    /// - Returns `FetchError { stage: Direct, .. }` when both the privileged
    ///   and the direct path fail.
    pub async fn load_composite(&self, scope: &OwnerScope) -> Result<Vec<Lead>, FetchError> {
        let started_at = Instant::now();
        let (path, records) = match self.load_privileged(scope).await {
            Ok(records) => (FetchStage::Privileged, records),
            Err(err) => {
                warn!(
                    "event=lead_fetch module=pipeline status=fallback path=privileged error_code={} error={}",
                    err.code(),
                    err
                );
                (FetchStage::Direct, self.load_direct(scope).await?)
            }
        };

        let details = self.load_details(&records).await;
        let leads = compose_leads(&records, &details);
        info!(
            "event=lead_fetch module=pipeline status=ok path={} count={} detail_count={} duration_ms={}",
            path.as_str(),
            leads.len(),
            details.len(),
            started_at.elapsed().as_millis()
        );
        Ok(leads)
    }

    async fn load_privileged(&self, scope: &OwnerScope) -> Result<Vec<LeadRecord>, BackendError> {
        let rows = self.backend.accessible_leads(scope).await?;
        let mut records = decode_rows::<LeadRecord>(rows)?;
        // The procedure does not order its rows.
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.lead_number.cmp(&a.lead_number))
        });
        Ok(records)
    }

    async fn load_direct(&self, scope: &OwnerScope) -> Result<Vec<LeadRecord>, FetchError> {
        let fail = |cause: BackendError| {
            warn!(
                "event=lead_fetch module=pipeline status=error path=direct error_code={} error={}",
                cause.code(),
                cause
            );
            FetchError {
                stage: FetchStage::Direct,
                cause,
            }
        };

        let rows = self
            .backend
            .select_leads(scope.owner_filter())
            .await
            .map_err(fail)?;
        decode_rows::<LeadRecord>(rows).map_err(fail)
    }

    async fn load_details(&self, records: &[LeadRecord]) -> HashMap<DetailId, LeadDetail> {
        let ids = distinct_detail_ids(records);
        if ids.is_empty() {
            return HashMap::new();
        }

        let rows = match self.backend.select_details(&ids).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    "event=lead_fetch module=pipeline status=degraded path={} requested={} error_code={} error={}",
                    FetchStage::DetailJoin.as_str(),
                    ids.len(),
                    err.code(),
                    err
                );
                return HashMap::new();
            }
        };

        let mut details = HashMap::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<LeadDetail>(row) {
                Ok(detail) => {
                    details.insert(detail.id, detail);
                }
                Err(err) => warn!(
                    "event=lead_fetch module=pipeline status=degraded path={} error_code=detail_row_invalid error={}",
                    FetchStage::DetailJoin.as_str(),
                    err
                ),
            }
        }
        details
    }
}

/// Distinct non-null detail ids in first-seen order.
pub fn distinct_detail_ids(records: &[LeadRecord]) -> Vec<DetailId> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.detail_id)
        .filter(|detail_id| seen.insert(*detail_id))
        .collect()
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<RawRow>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row).map_err(|err| BackendError::InvalidRow(err.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::distinct_detail_ids;
    use crate::model::lead::LeadRecord;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(detail_id: Option<Uuid>) -> LeadRecord {
        LeadRecord {
            id: Uuid::new_v4(),
            lead_number: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            owner_id: Uuid::new_v4(),
            detail_id,
        }
    }

    #[test]
    fn distinct_ids_skip_nulls_and_duplicates() {
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let records = vec![record(Some(s1)), record(None), record(Some(s2)), record(Some(s1))];
        assert_eq!(distinct_detail_ids(&records), vec![s1, s2]);
    }
}
