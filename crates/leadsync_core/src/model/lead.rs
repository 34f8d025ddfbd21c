//! Lead identity, detail and composite records.
//!
//! # Responsibility
//! - Mirror the two backend tables (`leads`, `contact_entities`) as typed DTOs.
//! - Define the flattened `Lead` the UI consumes and the partial `DetailPatch`
//!   carried by detail update events.
//!
//! # Invariants
//! - `LeadRecord` is read-only for this crate; it is written upstream.
//! - `Lead` detail fields are never optional: a missing detail row yields blank
//!   strings and zero amounts, never a dropped lead.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Stable id of a lead identity row.
pub type LeadId = Uuid;

/// Stable id of a contact/detail row.
pub type DetailId = Uuid;

/// Thin identity/ownership row from the `leads` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: LeadId,
    /// Human-facing sequence number, unique per backend.
    pub lead_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Serialized as `user_id` to match the backend column.
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,
    /// Serialized as `contact_entity_id`; `None` when the lead has no detail yet.
    #[serde(rename = "contact_entity_id", default)]
    pub detail_id: Option<DetailId>,
}

/// Detail row from the `contact_entities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadDetail {
    pub id: DetailId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Legacy single-field name, used when first/last are blank.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub loan_amount: Option<Decimal>,
    #[serde(default)]
    pub annual_revenue: Option<Decimal>,
    #[serde(default)]
    pub loan_type: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Field names the backend withheld from this caller.
    #[serde(default)]
    pub redacted_fields: Vec<String>,
}

impl LeadDetail {
    /// Creates an empty detail row with the given id.
    pub fn new(id: DetailId) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            name: None,
            email: None,
            phone: None,
            business_name: None,
            loan_amount: None,
            annual_revenue: None,
            loan_type: None,
            stage: None,
            priority: None,
            redacted_fields: Vec::new(),
        }
    }
}

/// Partial detail update keyed by detail id.
///
/// Each field distinguishes "absent" (`None`, keep current value) from an
/// explicit JSON `null` (`Some(None)`, clear the value).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailPatch {
    pub id: DetailId,
    #[serde(default, deserialize_with = "present")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub business_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub loan_amount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "present")]
    pub annual_revenue: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "present")]
    pub loan_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub stage: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub priority: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub redacted_fields: Option<Option<Vec<String>>>,
}

impl DetailPatch {
    /// Creates a patch that changes nothing.
    pub fn new(id: DetailId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Builder helper for stage-only updates.
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(Some(stage.into()));
        self
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Composite lead consumed by the UI: identity plus flattened detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lead {
    pub id: LeadId,
    pub lead_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_id: Uuid,
    pub detail_id: Option<DetailId>,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    /// Derived from name parts; recomputed whenever a name field changes.
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub business_name: String,
    pub loan_amount: Decimal,
    pub annual_revenue: Decimal,
    pub loan_type: String,
    pub stage: String,
    pub priority: String,
    pub redacted_fields: Vec<String>,
}
