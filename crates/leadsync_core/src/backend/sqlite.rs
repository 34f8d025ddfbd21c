//! Embedded SQLite lead backend.
//!
//! # Responsibility
//! - Serve the privileged procedure and direct reads over local tables.
//! - Act as the upstream writer: commit lead/detail mutations and publish
//!   the matching change events to an attached `LocalChangeHub`.
//!
//! # Invariants
//! - The privileged procedure trusts only the provisioned `user_roles` row,
//!   never the role the client claims; an unprovisioned caller is an access
//!   error.
//! - Events are published after the write commits, with the full new row on
//!   insert/update and the key-only old row on delete.
//! - Events carry the schema and table names of the attached `SyncConfig`,
//!   so subscribers built from the same config receive them.
//! - Rows leave this module as JSON objects shaped like the remote backend's.

use crate::backend::{BackendError, BackendResult, LeadBackend, RawRow};
use crate::config::{SyncConfig, DEFAULT_PRIMARY_TABLE, DEFAULT_SCHEMA, DEFAULT_SECONDARY_TABLE};
use crate::db::{open_db, open_db_in_memory};
use crate::model::caller::{CallerRole, OwnerScope};
use crate::model::lead::{DetailId, DetailPatch, LeadDetail, LeadId, LeadRecord};
use crate::realtime::hub::LocalChangeHub;
use crate::realtime::transport::{ChangeEventType, RawChangeEvent};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const LEAD_SELECT_SQL: &str = "SELECT
    id,
    lead_number,
    user_id,
    contact_entity_id,
    created_at,
    updated_at
FROM leads";

const DETAIL_SELECT_SQL: &str = "SELECT
    id,
    first_name,
    last_name,
    name,
    email,
    phone,
    business_name,
    loan_amount,
    annual_revenue,
    loan_type,
    stage,
    priority,
    redacted_fields
FROM contact_entities";

#[derive(Clone, Copy)]
enum EventTable {
    Primary,
    Secondary,
}

/// `LeadBackend` over a local SQLite database.
pub struct SqliteLeadBackend {
    conn: Mutex<Connection>,
    hub: Option<Arc<LocalChangeHub>>,
    schema: String,
    primary_table: String,
    secondary_table: String,
}

impl SqliteLeadBackend {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            hub: None,
            schema: DEFAULT_SCHEMA.to_string(),
            primary_table: DEFAULT_PRIMARY_TABLE.to_string(),
            secondary_table: DEFAULT_SECONDARY_TABLE.to_string(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> BackendResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Publishes every committed write to `hub`, addressed with the schema
    /// and table names of `config`.
    pub fn with_change_hub(mut self, hub: Arc<LocalChangeHub>, config: &SyncConfig) -> Self {
        self.hub = Some(hub);
        self.schema = config.schema.clone();
        self.primary_table = config.primary_table.clone();
        self.secondary_table = config.secondary_table.clone();
        self
    }

    /// Records the role the backend enforces for `user_id`.
    pub fn provision_role(&self, user_id: Uuid, role: CallerRole) -> BackendResult<()> {
        self.lock().execute(
            "INSERT INTO user_roles (user_id, role) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET role = excluded.role;",
            params![user_id.to_string(), role.as_str()],
        )?;
        Ok(())
    }

    /// Shares one lead with another user.
    pub fn grant_access(&self, lead_id: LeadId, user_id: Uuid) -> BackendResult<()> {
        self.lock().execute(
            "INSERT OR IGNORE INTO lead_access_grants (lead_id, user_id) VALUES (?1, ?2);",
            params![lead_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }

    /// Inserts a lead owned by `owner_id`, creating `detail` first when given.
    ///
    /// An existing detail row with the same id is reused, not overwritten.
    pub fn insert_lead(
        &self,
        owner_id: Uuid,
        detail: Option<&LeadDetail>,
    ) -> BackendResult<LeadRecord> {
        let (record, lead_row, detail_row) = {
            let mut conn = self.lock();
            let tx = conn.transaction()?;

            let mut detail_row = None;
            if let Some(detail) = detail {
                let created = tx.execute(
                    "INSERT OR IGNORE INTO contact_entities (
                        id, first_name, last_name, name, email, phone, business_name,
                        loan_amount, annual_revenue, loan_type, stage, priority, redacted_fields
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
                    params![
                        detail.id.to_string(),
                        detail.first_name.as_deref(),
                        detail.last_name.as_deref(),
                        detail.name.as_deref(),
                        detail.email.as_deref(),
                        detail.phone.as_deref(),
                        detail.business_name.as_deref(),
                        detail.loan_amount.map(|amount| amount.to_string()),
                        detail.annual_revenue.map(|amount| amount.to_string()),
                        detail.loan_type.as_deref(),
                        detail.stage.as_deref(),
                        detail.priority.as_deref(),
                        encode_redacted(&detail.redacted_fields)?,
                    ],
                )?;
                if created > 0 {
                    detail_row = Some(query_detail_row(&tx, detail.id)?.ok_or_else(|| {
                        BackendError::Transport("inserted detail not found in read-back".to_string())
                    })?);
                }
            }

            let lead_id = Uuid::new_v4();
            let now = timestamp_now();
            tx.execute(
                "INSERT INTO leads (id, lead_number, user_id, contact_entity_id, created_at, updated_at)
                 VALUES (
                    ?1,
                    (SELECT COALESCE(MAX(lead_number), 0) + 1 FROM leads),
                    ?2, ?3, ?4, ?4
                 );",
                params![
                    lead_id.to_string(),
                    owner_id.to_string(),
                    detail.map(|detail| detail.id.to_string()),
                    now,
                ],
            )?;
            let lead_row = query_lead_row(&tx, lead_id)?.ok_or_else(|| {
                BackendError::Transport("inserted lead not found in read-back".to_string())
            })?;
            tx.commit()?;

            (decode_record(&lead_row)?, lead_row, detail_row)
        };

        if let Some(row) = detail_row {
            self.publish(EventTable::Secondary, ChangeEventType::Insert, row, Value::Null);
        }
        self.publish(EventTable::Primary, ChangeEventType::Insert, lead_row, Value::Null);
        Ok(record)
    }

    /// Applies a partial detail update.
    ///
    /// Returns `None` when no detail row has `patch.id`.
    pub fn update_detail(&self, patch: &DetailPatch) -> BackendResult<Option<LeadDetail>> {
        let mut assignments = Vec::new();
        let mut bind_values: Vec<SqlValue> = Vec::new();
        let mut push = |column: &str, value: Option<Option<String>>| {
            if let Some(inner) = value {
                assignments.push(format!("{column} = ?"));
                bind_values.push(inner.map_or(SqlValue::Null, SqlValue::Text));
            }
        };
        let amount = |value: &Option<Option<Decimal>>| {
            value
                .as_ref()
                .map(|inner| inner.map(|amount| amount.to_string()))
        };
        push("first_name", patch.first_name.clone());
        push("last_name", patch.last_name.clone());
        push("name", patch.name.clone());
        push("email", patch.email.clone());
        push("phone", patch.phone.clone());
        push("business_name", patch.business_name.clone());
        push("loan_amount", amount(&patch.loan_amount));
        push("annual_revenue", amount(&patch.annual_revenue));
        push("loan_type", patch.loan_type.clone());
        push("stage", patch.stage.clone());
        push("priority", patch.priority.clone());
        if let Some(redacted) = &patch.redacted_fields {
            let fields = redacted.clone().unwrap_or_default();
            push("redacted_fields", Some(Some(encode_redacted(&fields)?)));
        }

        let row = {
            let conn = self.lock();
            if !assignments.is_empty() {
                let sql = format!(
                    "UPDATE contact_entities SET {} WHERE id = ?;",
                    assignments.join(", ")
                );
                bind_values.push(SqlValue::Text(patch.id.to_string()));
                conn.execute(&sql, params_from_iter(bind_values))?;
            }
            query_detail_row(&conn, patch.id)?
        };

        let Some(row) = row else {
            return Ok(None);
        };
        let detail = serde_json::from_value::<LeadDetail>(row.clone())
            .map_err(|err| BackendError::InvalidRow(err.to_string()))?;
        self.publish(
            EventTable::Secondary,
            ChangeEventType::Update,
            row,
            json!({ "id": patch.id }),
        );
        Ok(Some(detail))
    }

    /// Bumps `updated_at` of one lead.
    pub fn touch_lead(&self, lead_id: LeadId) -> BackendResult<Option<LeadRecord>> {
        let row = {
            let conn = self.lock();
            let changed = conn.execute(
                "UPDATE leads SET updated_at = ?1 WHERE id = ?2;",
                params![timestamp_now(), lead_id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_lead_row(&conn, lead_id)?
        };

        let Some(row) = row else {
            return Ok(None);
        };
        let record = decode_record(&row)?;
        self.publish(
            EventTable::Primary,
            ChangeEventType::Update,
            row,
            json!({ "id": lead_id }),
        );
        Ok(Some(record))
    }

    /// Deletes one lead; its detail row is kept. Returns whether it existed.
    pub fn delete_lead(&self, lead_id: LeadId) -> BackendResult<bool> {
        let changed = self
            .lock()
            .execute("DELETE FROM leads WHERE id = ?1;", [lead_id.to_string()])?;
        if changed == 0 {
            return Ok(false);
        }
        self.publish(
            EventTable::Primary,
            ChangeEventType::Delete,
            Value::Null,
            json!({ "id": lead_id }),
        );
        Ok(true)
    }

    fn publish(&self, table: EventTable, event_type: ChangeEventType, new: Value, old: Value) {
        let Some(hub) = &self.hub else {
            return;
        };
        let table = match table {
            EventTable::Primary => self.primary_table.as_str(),
            EventTable::Secondary => self.secondary_table.as_str(),
        };
        let delivered = hub.publish(RawChangeEvent {
            event_type,
            schema: self.schema.clone(),
            table: table.to_string(),
            new,
            old,
        });
        debug!(
            "event=backend_publish module=backend status=ok table={} event_type={} delivered={}",
            table,
            event_type.as_str(),
            delivered
        );
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LeadBackend for SqliteLeadBackend {
    async fn accessible_leads(&self, caller: &OwnerScope) -> BackendResult<Vec<RawRow>> {
        let conn = self.lock();
        let provisioned: Option<String> = conn
            .query_row(
                "SELECT role FROM user_roles WHERE user_id = ?1;",
                [caller.user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(role_text) = provisioned else {
            return Err(BackendError::Access(format!(
                "no role provisioned for caller {}",
                caller.user_id
            )));
        };
        let role = CallerRole::parse(&role_text).ok_or_else(|| {
            BackendError::InvalidRow(format!("unknown role `{role_text}` in user_roles.role"))
        })?;

        let mut stmt = conn.prepare(&format!(
            "{LEAD_SELECT_SQL}
             WHERE ?2 = 1
                OR user_id = ?1
                OR EXISTS (
                    SELECT 1 FROM lead_access_grants g
                    WHERE g.lead_id = leads.id AND g.user_id = ?1
                );"
        ))?;
        let mut rows = stmt.query(params![
            caller.user_id.to_string(),
            i64::from(role.is_elevated())
        ])?;
        let mut leads = Vec::new();
        while let Some(row) = rows.next()? {
            leads.push(lead_row_json(row)?);
        }
        Ok(leads)
    }

    async fn select_leads(&self, owner_filter: Option<Uuid>) -> BackendResult<Vec<RawRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{LEAD_SELECT_SQL}
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY created_at DESC, lead_number DESC;"
        ))?;
        let mut rows = stmt.query([owner_filter.map(|owner| owner.to_string())])?;
        let mut leads = Vec::new();
        while let Some(row) = rows.next()? {
            leads.push(lead_row_json(row)?);
        }
        Ok(leads)
    }

    async fn select_details(&self, ids: &[DetailId]) -> BackendResult<Vec<RawRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{DETAIL_SELECT_SQL} WHERE id IN ({placeholders});"
        ))?;
        let mut rows = stmt.query(params_from_iter(ids.iter().map(Uuid::to_string)))?;
        let mut details = Vec::new();
        while let Some(row) = rows.next()? {
            details.push(detail_row_json(row)?);
        }
        Ok(details)
    }
}

fn query_lead_row(conn: &Connection, lead_id: LeadId) -> BackendResult<Option<Value>> {
    let mut stmt = conn.prepare(&format!("{LEAD_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([lead_id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(lead_row_json(row)?)),
        None => Ok(None),
    }
}

fn query_detail_row(conn: &Connection, detail_id: DetailId) -> BackendResult<Option<Value>> {
    let mut stmt = conn.prepare(&format!("{DETAIL_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([detail_id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(detail_row_json(row)?)),
        None => Ok(None),
    }
}

fn lead_row_json(row: &Row<'_>) -> BackendResult<Value> {
    Ok(json!({
        "id": row.get::<_, String>("id")?,
        "lead_number": row.get::<_, i64>("lead_number")?,
        "user_id": row.get::<_, String>("user_id")?,
        "contact_entity_id": row.get::<_, Option<String>>("contact_entity_id")?,
        "created_at": row.get::<_, String>("created_at")?,
        "updated_at": row.get::<_, String>("updated_at")?,
    }))
}

fn detail_row_json(row: &Row<'_>) -> BackendResult<Value> {
    let redacted_text: String = row.get("redacted_fields")?;
    let redacted: Vec<String> = serde_json::from_str(&redacted_text).map_err(|err| {
        BackendError::InvalidRow(format!(
            "invalid redacted_fields `{redacted_text}` in contact_entities: {err}"
        ))
    })?;
    Ok(json!({
        "id": row.get::<_, String>("id")?,
        "first_name": row.get::<_, Option<String>>("first_name")?,
        "last_name": row.get::<_, Option<String>>("last_name")?,
        "name": row.get::<_, Option<String>>("name")?,
        "email": row.get::<_, Option<String>>("email")?,
        "phone": row.get::<_, Option<String>>("phone")?,
        "business_name": row.get::<_, Option<String>>("business_name")?,
        "loan_amount": row.get::<_, Option<String>>("loan_amount")?,
        "annual_revenue": row.get::<_, Option<String>>("annual_revenue")?,
        "loan_type": row.get::<_, Option<String>>("loan_type")?,
        "stage": row.get::<_, Option<String>>("stage")?,
        "priority": row.get::<_, Option<String>>("priority")?,
        "redacted_fields": redacted,
    }))
}

fn decode_record(row: &Value) -> BackendResult<LeadRecord> {
    serde_json::from_value(row.clone()).map_err(|err| BackendError::InvalidRow(err.to_string()))
}

fn encode_redacted(fields: &[String]) -> BackendResult<String> {
    serde_json::to_string(fields).map_err(|err| BackendError::InvalidRow(err.to_string()))
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
