#![allow(dead_code)]

use async_trait::async_trait;
use leadsync_core::model::lead::DetailId;
use leadsync_core::{
    BackendError, BackendResult, ErrorNotifier, LeadBackend, OwnerScope, RawRow,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Replayable responses for one backend operation.
///
/// Results are consumed front to back; the last one repeats forever.
struct Script(Mutex<VecDeque<BackendResult<Vec<RawRow>>>>);

impl Script {
    fn new() -> Self {
        Self(Mutex::new(VecDeque::from([Ok(Vec::new())])))
    }

    fn set(&self, results: Vec<BackendResult<Vec<RawRow>>>) {
        *self.0.lock().unwrap() = results.into();
    }

    fn next(&self) -> BackendResult<Vec<RawRow>> {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}

/// In-memory backend with scripted responses and call recording.
pub struct ScriptedBackend {
    privileged: Script,
    direct: Script,
    details: Script,
    privileged_calls: AtomicUsize,
    direct_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    owner_filters: Mutex<Vec<Option<Uuid>>>,
    detail_requests: Mutex<Vec<Vec<DetailId>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            privileged: Script::new(),
            direct: Script::new(),
            details: Script::new(),
            privileged_calls: AtomicUsize::new(0),
            direct_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            owner_filters: Mutex::new(Vec::new()),
            detail_requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        })
    }

    pub fn set_privileged(&self, result: BackendResult<Vec<RawRow>>) {
        self.privileged.set(vec![result]);
    }

    pub fn set_privileged_sequence(&self, results: Vec<BackendResult<Vec<RawRow>>>) {
        self.privileged.set(results);
    }

    pub fn set_direct(&self, result: BackendResult<Vec<RawRow>>) {
        self.direct.set(vec![result]);
    }

    pub fn set_details(&self, result: BackendResult<Vec<RawRow>>) {
        self.details.set(vec![result]);
    }

    /// Blocks privileged calls until permits are added to the returned gate.
    pub fn hold_privileged(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn privileged_calls(&self) -> usize {
        self.privileged_calls.load(Ordering::SeqCst)
    }

    pub fn direct_calls(&self) -> usize {
        self.direct_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn owner_filters(&self) -> Vec<Option<Uuid>> {
        self.owner_filters.lock().unwrap().clone()
    }

    pub fn detail_requests(&self) -> Vec<Vec<DetailId>> {
        self.detail_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeadBackend for ScriptedBackend {
    async fn accessible_leads(&self, _caller: &OwnerScope) -> BackendResult<Vec<RawRow>> {
        self.privileged_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.privileged.next()
    }

    async fn select_leads(&self, owner_filter: Option<Uuid>) -> BackendResult<Vec<RawRow>> {
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        self.owner_filters.lock().unwrap().push(owner_filter);
        self.direct.next()
    }

    async fn select_details(&self, ids: &[DetailId]) -> BackendResult<Vec<RawRow>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.detail_requests.lock().unwrap().push(ids.to_vec());
        self.details.next()
    }
}

/// Notifier that records every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap().clone()
    }
}

impl ErrorNotifier for RecordingNotifier {
    fn notify_error(&self, title: &str, message: &str) {
        self.notes
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

pub fn lead_row(
    id: Uuid,
    lead_number: i64,
    created_at: &str,
    owner: Uuid,
    detail_id: Option<Uuid>,
) -> Value {
    json!({
        "id": id,
        "lead_number": lead_number,
        "created_at": created_at,
        "updated_at": created_at,
        "user_id": owner,
        "contact_entity_id": detail_id,
    })
}

pub fn detail_row(id: Uuid, first_name: &str, last_name: &str) -> Value {
    json!({
        "id": id,
        "first_name": first_name,
        "last_name": last_name,
        "email": format!("{}@example.com", first_name.to_ascii_lowercase()),
        "phone": "555-0100",
        "business_name": format!("{last_name} Holdings"),
        "loan_amount": "150000.00",
        "annual_revenue": "900000",
        "loan_type": "term",
        "stage": "new",
        "priority": "high",
    })
}

pub fn access_denied() -> BackendError {
    BackendError::Access("role not provisioned".to_string())
}

pub fn transport_failed() -> BackendError {
    BackendError::Transport("connection reset".to_string())
}

/// Lets spawned tasks and channel dispatch run to quiescence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
