//! Composition of identity rows and detail rows into `Lead`s.
//!
//! # Invariants
//! - Every `LeadRecord` yields exactly one `Lead`, with or without a detail row.
//! - Redacted fields never carry the backend value; they hold a fixed placeholder.
//! - `display_name` always reflects the current (possibly masked) name parts.

use crate::model::lead::{DetailId, DetailPatch, Lead, LeadDetail, LeadRecord};
use log::debug;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub const REDACTED_EMAIL: &str = "***@***.***";
pub const REDACTED_PHONE: &str = "***-***-****";
pub const REDACTED_TEXT: &str = "[redacted]";

/// Joins records with their detail rows, preserving record order.
pub fn compose_leads(
    records: &[LeadRecord],
    details: &HashMap<DetailId, LeadDetail>,
) -> Vec<Lead> {
    records
        .iter()
        .map(|record| {
            let detail = record.detail_id.and_then(|detail_id| details.get(&detail_id));
            compose_lead(record, detail)
        })
        .collect()
}

/// Builds one `Lead`; a missing detail row yields blank detail fields.
pub fn compose_lead(record: &LeadRecord, detail: Option<&LeadDetail>) -> Lead {
    let text = |value: Option<&Option<String>>| {
        value
            .and_then(|inner| inner.as_deref())
            .unwrap_or_default()
            .to_string()
    };

    let mut lead = Lead {
        id: record.id,
        lead_number: record.lead_number,
        created_at: record.created_at,
        updated_at: record.updated_at,
        owner_id: record.owner_id,
        detail_id: record.detail_id,
        first_name: text(detail.map(|d| &d.first_name)),
        last_name: text(detail.map(|d| &d.last_name)),
        name: text(detail.map(|d| &d.name)),
        display_name: String::new(),
        email: text(detail.map(|d| &d.email)),
        phone: text(detail.map(|d| &d.phone)),
        business_name: text(detail.map(|d| &d.business_name)),
        loan_amount: detail.and_then(|d| d.loan_amount).unwrap_or(Decimal::ZERO),
        annual_revenue: detail.and_then(|d| d.annual_revenue).unwrap_or(Decimal::ZERO),
        loan_type: text(detail.map(|d| &d.loan_type)),
        stage: text(detail.map(|d| &d.stage)),
        priority: text(detail.map(|d| &d.priority)),
        redacted_fields: detail.map(|d| d.redacted_fields.clone()).unwrap_or_default(),
    };
    mask_redacted(&mut lead);
    lead.display_name = display_name(&lead.first_name, &lead.last_name, &lead.name);
    lead
}

/// Applies a partial detail update in place.
///
/// Absent patch fields are kept, explicit nulls clear to blank/zero. Masking
/// and the display name are recomputed afterwards.
pub fn apply_detail_patch(lead: &mut Lead, patch: &DetailPatch) {
    fn set_text(slot: &mut String, value: &Option<Option<String>>) {
        if let Some(inner) = value {
            *slot = inner.clone().unwrap_or_default();
        }
    }
    fn set_amount(slot: &mut Decimal, value: &Option<Option<Decimal>>) {
        if let Some(inner) = value {
            *slot = inner.unwrap_or(Decimal::ZERO);
        }
    }

    set_text(&mut lead.first_name, &patch.first_name);
    set_text(&mut lead.last_name, &patch.last_name);
    set_text(&mut lead.name, &patch.name);
    set_text(&mut lead.email, &patch.email);
    set_text(&mut lead.phone, &patch.phone);
    set_text(&mut lead.business_name, &patch.business_name);
    set_amount(&mut lead.loan_amount, &patch.loan_amount);
    set_amount(&mut lead.annual_revenue, &patch.annual_revenue);
    set_text(&mut lead.loan_type, &patch.loan_type);
    set_text(&mut lead.stage, &patch.stage);
    set_text(&mut lead.priority, &patch.priority);
    if let Some(redacted) = &patch.redacted_fields {
        lead.redacted_fields = redacted.clone().unwrap_or_default();
    }

    mask_redacted(lead);
    lead.display_name = display_name(&lead.first_name, &lead.last_name, &lead.name);
}

/// Display name: trimmed "first last", else the raw name, else empty.
pub fn display_name(first_name: &str, last_name: &str, name: &str) -> String {
    let joined = format!("{first_name} {last_name}");
    let joined = joined.trim();
    if !joined.is_empty() {
        return joined.to_string();
    }
    name.trim().to_string()
}

/// Replaces every field listed in `redacted_fields` with its placeholder.
pub fn mask_redacted(lead: &mut Lead) {
    for field in lead.redacted_fields.clone() {
        match field.trim() {
            "email" => lead.email = REDACTED_EMAIL.to_string(),
            "phone" => lead.phone = REDACTED_PHONE.to_string(),
            "first_name" => lead.first_name = REDACTED_TEXT.to_string(),
            "last_name" => lead.last_name = REDACTED_TEXT.to_string(),
            "name" => lead.name = REDACTED_TEXT.to_string(),
            "business_name" => lead.business_name = REDACTED_TEXT.to_string(),
            "loan_amount" => lead.loan_amount = Decimal::ZERO,
            "annual_revenue" => lead.annual_revenue = Decimal::ZERO,
            other => debug!(
                "event=lead_mask module=pipeline status=skipped field={other} reason=not_maskable"
            ),
        }
    }
}
