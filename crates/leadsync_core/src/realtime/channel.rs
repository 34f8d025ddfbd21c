//! Typed change-channel adapter.
//!
//! # Responsibility
//! - Own the lifecycle of named push channels (open, reopen on key change, close).
//! - Decode raw transport events into typed payloads and demultiplex them into
//!   insert/update/delete callbacks plus a catch-all change callback.
//!
//! # Invariants
//! - At most one live transport subscription exists per channel id; opening a
//!   live id closes the previous handle first.
//! - Callbacks are looked up on every event, so swapping handlers never
//!   reopens the channel. Only a different `ChannelKey` does.
//! - Subscription failures are reported through the status callback and yield
//!   a degraded handle; they never panic or return an error to the caller.

use crate::realtime::transport::{
    ChangeEventType, ChangeStream, ChangeTransport, ChannelError, EventFilter, RawChangeEvent,
    SubscriptionSpec,
};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Key columns of the old row image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RowKey {
    pub id: Uuid,
}

/// Typed view of one change event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePayload<T> {
    pub event_type: ChangeEventType,
    /// Decoded new row; `None` for deletes or undecodable rows.
    pub new: Option<T>,
    pub old: Option<RowKey>,
}

pub type ChangeCallback<T> = Arc<dyn Fn(&ChangePayload<T>) + Send + Sync>;

/// Callback set attached to one channel.
pub struct ChangeHandlers<T> {
    pub on_insert: Option<ChangeCallback<T>>,
    pub on_update: Option<ChangeCallback<T>>,
    pub on_delete: Option<ChangeCallback<T>>,
    /// Invoked for every delivered event, after the typed callback.
    pub on_change: Option<ChangeCallback<T>>,
}

impl<T> Default for ChangeHandlers<T> {
    fn default() -> Self {
        Self {
            on_insert: None,
            on_update: None,
            on_delete: None,
            on_change: None,
        }
    }
}

impl<T> ChangeHandlers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_insert(
        mut self,
        callback: impl Fn(&ChangePayload<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_insert = Some(Arc::new(callback));
        self
    }

    pub fn with_update(
        mut self,
        callback: impl Fn(&ChangePayload<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_update = Some(Arc::new(callback));
        self
    }

    pub fn with_delete(
        mut self,
        callback: impl Fn(&ChangePayload<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_delete = Some(Arc::new(callback));
        self
    }

    pub fn with_change(
        mut self,
        callback: impl Fn(&ChangePayload<T>) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    fn typed(&self, event_type: ChangeEventType) -> Option<&ChangeCallback<T>> {
        match event_type {
            ChangeEventType::Insert => self.on_insert.as_ref(),
            ChangeEventType::Update => self.on_update.as_ref(),
            ChangeEventType::Delete => self.on_delete.as_ref(),
        }
    }
}

/// Subscription lifecycle states reported to the status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Closed,
    Failed(ChannelError),
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }
}

pub type StatusCallback = Arc<dyn Fn(&str, &ChannelStatus) + Send + Sync>;

/// Parameters whose change forces a channel to be reopened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub namespace: String,
    pub resource: String,
    pub filter: EventFilter,
}

impl ChannelKey {
    /// Stable transport id: namespace plus resource name.
    pub fn channel_id(&self) -> String {
        format!("{}:{}", self.namespace, self.resource)
    }
}

type SharedHandlers<T> = Arc<RwLock<Arc<ChangeHandlers<T>>>>;

/// Caller-owned reference to one opened channel.
pub struct ChannelHandle<T> {
    key: ChannelKey,
    channel_id: String,
    generation: u64,
    subscribed: bool,
    handlers: SharedHandlers<T>,
}

impl<T> ChannelHandle<T> {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// `false` when the subscription failed and the handle is degraded.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Replaces the callbacks without touching the transport subscription.
    pub fn set_handlers(&self, handlers: ChangeHandlers<T>) {
        let mut slot = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(handlers);
    }
}

struct LiveChannel {
    generation: u64,
    task: JoinHandle<()>,
}

/// Opens and closes typed channels over one transport.
pub struct ChangeChannelAdapter {
    transport: Arc<dyn ChangeTransport>,
    namespace: String,
    schema: String,
    live: Mutex<HashMap<String, LiveChannel>>,
    next_generation: AtomicU64,
    status_callback: Option<StatusCallback>,
}

impl ChangeChannelAdapter {
    pub fn new(
        transport: Arc<dyn ChangeTransport>,
        namespace: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            namespace: namespace.into(),
            schema: schema.into(),
            live: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            status_callback: None,
        }
    }

    /// Registers an observer for status transitions of every channel.
    pub fn with_status_callback(
        mut self,
        callback: impl Fn(&str, &ChannelStatus) + Send + Sync + 'static,
    ) -> Self {
        self.status_callback = Some(Arc::new(callback));
        self
    }

    /// Number of channels with a live transport subscription.
    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    /// Opens a channel on `resource` (the table name) with `filter`.
    ///
    /// Must be called inside a tokio runtime; event dispatch runs on a spawned
    /// task. A live channel with the same id is closed first.
    pub fn open<T>(
        &self,
        resource: &str,
        filter: EventFilter,
        handlers: ChangeHandlers<T>,
    ) -> ChannelHandle<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = ChannelKey {
            namespace: self.namespace.clone(),
            resource: resource.to_string(),
            filter,
        };
        let channel_id = key.channel_id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let shared: SharedHandlers<T> = Arc::new(RwLock::new(Arc::new(handlers)));

        if let Some(previous) = self.lock_live().remove(&channel_id) {
            self.teardown(&channel_id, previous);
        }

        self.report(&channel_id, &ChannelStatus::Connecting);
        let spec = SubscriptionSpec {
            event: filter,
            schema: self.schema.clone(),
            table: resource.to_string(),
        };
        let stream = match self.transport.subscribe(&channel_id, &spec) {
            Ok(stream) => stream,
            Err(err) => {
                self.report(&channel_id, &ChannelStatus::Failed(err));
                return ChannelHandle {
                    key,
                    channel_id,
                    generation,
                    subscribed: false,
                    handlers: shared,
                };
            }
        };

        let task = tokio::spawn(run_dispatch(
            stream,
            channel_id.clone(),
            filter,
            Arc::clone(&shared),
            self.status_callback.clone(),
        ));
        self.lock_live()
            .insert(channel_id.clone(), LiveChannel { generation, task });
        self.report(&channel_id, &ChannelStatus::Subscribed);

        ChannelHandle {
            key,
            channel_id,
            generation,
            subscribed: true,
            handlers: shared,
        }
    }

    /// Keeps `handle` when `resource`/`filter` still match it (only swapping
    /// handlers); otherwise closes it and opens a fresh channel.
    pub fn reopen<T>(
        &self,
        handle: ChannelHandle<T>,
        resource: &str,
        filter: EventFilter,
        handlers: ChangeHandlers<T>,
    ) -> ChannelHandle<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let unchanged = handle.subscribed
            && handle.key.namespace == self.namespace
            && handle.key.resource == resource
            && handle.key.filter == filter;
        if unchanged {
            handle.set_handlers(handlers);
            return handle;
        }
        self.close(&handle);
        self.open(resource, filter, handlers)
    }

    /// Closes the channel behind `handle`. Closing twice, or closing a handle
    /// superseded by a newer open of the same id, is a no-op.
    pub fn close<T>(&self, handle: &ChannelHandle<T>) {
        let removed = {
            let mut live = self.lock_live();
            match live.get(&handle.channel_id) {
                Some(entry) if entry.generation == handle.generation => {
                    live.remove(&handle.channel_id)
                }
                _ => None,
            }
        };
        if let Some(entry) = removed {
            self.teardown(&handle.channel_id, entry);
        }
    }

    fn teardown(&self, channel_id: &str, entry: LiveChannel) {
        entry.task.abort();
        self.transport.unsubscribe(channel_id);
        self.report(channel_id, &ChannelStatus::Closed);
    }

    fn report(&self, channel_id: &str, status: &ChannelStatus) {
        log_status(channel_id, status);
        if let Some(callback) = &self.status_callback {
            callback(channel_id, status);
        }
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<String, LiveChannel>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChangeChannelAdapter {
    fn drop(&mut self) {
        let live = std::mem::take(&mut *self.lock_live());
        for (channel_id, entry) in live {
            entry.task.abort();
            self.transport.unsubscribe(&channel_id);
        }
    }
}

async fn run_dispatch<T>(
    mut stream: ChangeStream,
    channel_id: String,
    filter: EventFilter,
    handlers: SharedHandlers<T>,
    status_callback: Option<StatusCallback>,
) where
    T: DeserializeOwned,
{
    while let Some(raw) = stream.recv().await {
        dispatch(&channel_id, filter, &handlers, raw);
    }
    // Sender side went away without an explicit close.
    let status = ChannelStatus::Closed;
    log_status(&channel_id, &status);
    if let Some(callback) = status_callback {
        callback(&channel_id, &status);
    }
}

fn dispatch<T>(
    channel_id: &str,
    filter: EventFilter,
    handlers: &SharedHandlers<T>,
    raw: RawChangeEvent,
) where
    T: DeserializeOwned,
{
    let current = Arc::clone(&handlers.read().unwrap_or_else(PoisonError::into_inner));
    let payload = decode_payload::<T>(channel_id, raw);
    debug!(
        "event=channel_event module=realtime status=ok channel_id={} event_type={} decoded={}",
        channel_id,
        payload.event_type.as_str(),
        payload.new.is_some()
    );

    if filter.matches(payload.event_type) {
        if let Some(callback) = current.typed(payload.event_type) {
            callback(&payload);
        }
    }
    if let Some(callback) = &current.on_change {
        callback(&payload);
    }
}

fn decode_payload<T>(channel_id: &str, raw: RawChangeEvent) -> ChangePayload<T>
where
    T: DeserializeOwned,
{
    let new = if is_empty_image(&raw.new) {
        None
    } else {
        match serde_json::from_value::<T>(raw.new) {
            Ok(row) => Some(row),
            Err(err) => {
                warn!(
                    "event=channel_decode module=realtime status=error channel_id={} event_type={} error_code=new_row_invalid error={}",
                    channel_id,
                    raw.event_type.as_str(),
                    err
                );
                None
            }
        }
    };
    let old = if is_empty_image(&raw.old) {
        None
    } else {
        serde_json::from_value::<RowKey>(raw.old).ok()
    };

    ChangePayload {
        event_type: raw.event_type,
        new,
        old,
    }
}

fn is_empty_image(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn log_status(channel_id: &str, status: &ChannelStatus) {
    match status {
        ChannelStatus::Failed(err) => warn!(
            "event=channel_status module=realtime status=failed channel_id={} error={}",
            channel_id, err
        ),
        other => info!(
            "event=channel_status module=realtime status={} channel_id={}",
            other.as_str(),
            channel_id
        ),
    }
}
