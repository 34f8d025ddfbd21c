//! Wiring between a `LeadStore` and its two change channels.
//!
//! # Responsibility
//! - Open the lead channel (`any` events) and the detail channel (`update`
//!   events) for one store, and close both together.
//! - Route lead deletes to immediate removal, every lead event to a silent
//!   refetch, and detail updates to in-place patches.
//!
//! # Invariants
//! - Channel ownership lives in the returned `Binding`; nothing is registered
//!   globally.
//! - Rebinding for the same caller scope keeps the open channels and only
//!   swaps handlers.

use crate::backend::LeadBackend;
use crate::config::SyncConfig;
use crate::model::caller::OwnerScope;
use crate::model::lead::{DetailPatch, LeadRecord};
use crate::realtime::channel::{ChangeChannelAdapter, ChangeHandlers, ChannelHandle};
use crate::realtime::transport::EventFilter;
use crate::store::LeadStore;
use log::{debug, info};
use std::sync::Arc;

/// Open channels belonging to one bound store.
pub struct Binding {
    scope: Option<OwnerScope>,
    leads: Option<ChannelHandle<LeadRecord>>,
    details: Option<ChannelHandle<DetailPatch>>,
}

impl Binding {
    pub fn scope(&self) -> Option<OwnerScope> {
        self.scope
    }

    /// `true` when both channels hold a live subscription.
    pub fn is_live(&self) -> bool {
        let subscribed = |handle: Option<bool>| handle.unwrap_or(false);
        subscribed(self.leads.as_ref().map(ChannelHandle::is_subscribed))
            && subscribed(self.details.as_ref().map(ChannelHandle::is_subscribed))
    }

    pub fn lead_channel(&self) -> Option<&ChannelHandle<LeadRecord>> {
        self.leads.as_ref()
    }

    pub fn detail_channel(&self) -> Option<&ChannelHandle<DetailPatch>> {
        self.details.as_ref()
    }
}

/// Binds stores to lead and detail change channels.
pub struct SubscriptionBinder {
    adapter: Arc<ChangeChannelAdapter>,
    primary_table: String,
    secondary_table: String,
}

impl SubscriptionBinder {
    pub fn new(adapter: Arc<ChangeChannelAdapter>, config: &SyncConfig) -> Self {
        Self {
            adapter,
            primary_table: config.primary_table.clone(),
            secondary_table: config.secondary_table.clone(),
        }
    }

    pub fn adapter(&self) -> &ChangeChannelAdapter {
        &self.adapter
    }

    /// Opens both channels for `store`.
    ///
    /// An unauthenticated store gets an empty binding: there is nothing to
    /// keep in sync.
    pub fn bind<B: LeadBackend + 'static>(&self, store: &LeadStore<B>) -> Binding {
        let scope = store.scope();
        if scope.is_none() {
            debug!("event=binder_bind module=binder status=skipped reason=unauthenticated");
            return Binding {
                scope,
                leads: None,
                details: None,
            };
        }

        let leads = self
            .adapter
            .open(&self.primary_table, EventFilter::Any, lead_handlers(store));
        let details = self.adapter.open(
            &self.secondary_table,
            EventFilter::Update,
            detail_handlers(store),
        );
        let binding = Binding {
            scope,
            leads: Some(leads),
            details: Some(details),
        };
        info!(
            "event=binder_bind module=binder status=ok live={} lead_channel={} detail_channel={}",
            binding.is_live(),
            binding.lead_channel().map_or("-", ChannelHandle::channel_id),
            binding.detail_channel().map_or("-", ChannelHandle::channel_id)
        );
        binding
    }

    /// Binds `store`, then runs the initial visible load.
    pub async fn mount<B: LeadBackend + 'static>(&self, store: &LeadStore<B>) -> Binding {
        let binding = self.bind(store);
        store.refetch().await;
        binding
    }

    /// Closes both channels of `binding`.
    pub fn unbind(&self, binding: Binding) {
        if let Some(handle) = &binding.leads {
            self.adapter.close(handle);
        }
        if let Some(handle) = &binding.details {
            self.adapter.close(handle);
        }
        info!("event=binder_unbind module=binder status=ok");
    }

    /// Re-targets `binding` at `store`.
    ///
    /// Same caller scope: channels stay open and only the handlers move to
    /// the new store. Different scope: full unbind and bind.
    pub fn rebind<B: LeadBackend + 'static>(
        &self,
        binding: Binding,
        store: &LeadStore<B>,
    ) -> Binding {
        if binding.scope != store.scope() || !binding.is_live() {
            info!("event=binder_rebind module=binder status=ok mode=reopen");
            self.unbind(binding);
            return self.bind(store);
        }

        if let Some(handle) = &binding.leads {
            handle.set_handlers(lead_handlers(store));
        }
        if let Some(handle) = &binding.details {
            handle.set_handlers(detail_handlers(store));
        }
        debug!("event=binder_rebind module=binder status=ok mode=handlers_only");
        binding
    }
}

fn lead_handlers<B>(store: &LeadStore<B>) -> ChangeHandlers<LeadRecord>
where
    B: LeadBackend + 'static,
{
    let on_delete_store = store.clone();
    let on_change_store = store.clone();
    ChangeHandlers::<LeadRecord>::new()
        .with_delete(move |payload| {
            if let Some(key) = payload.old {
                on_delete_store.remove_by_id(key.id);
            }
        })
        .with_change(move |_| {
            let _ = on_change_store.spawn_refetch_silent();
        })
}

fn detail_handlers<B>(store: &LeadStore<B>) -> ChangeHandlers<DetailPatch>
where
    B: LeadBackend + 'static,
{
    let store = store.clone();
    ChangeHandlers::<DetailPatch>::new().with_update(move |payload| {
        if let Some(patch) = &payload.new {
            store.apply_detail_update(patch);
        }
    })
}
