use crate::backend::LeadBackend;
use crate::config::SyncConfig;
use crate::model::caller::OwnerScope;
use crate::model::lead::{DetailPatch, Lead, LeadId};
use crate::pipeline::compose::apply_detail_patch;
use crate::pipeline::fetch::{FetchError, FetchPipeline};
use crate::store::notify::ErrorNotifier;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const FETCH_FAILED_TITLE: &str = "Failed to load leads";

/// Whether a fetch drives the loading indicator and user notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// User-initiated: toggles `loading`, failures are notified.
    Visible,
    /// Event-driven: no loading state, failures are only logged.
    Silent,
}

impl FetchMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Silent => "silent",
        }
    }
}

/// Result of one refetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Pipeline ran; the store now holds this many leads.
    Loaded(usize),
    /// Another fetch was already running; this request was dropped.
    Skipped,
    /// No caller identity; the store was emptied without a fetch.
    Unauthenticated,
    Failed(FetchError),
}

/// Consumer-facing snapshot of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadsView {
    pub records: Vec<Lead>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct StoreState {
    records: Vec<Lead>,
    loading: bool,
    error: Option<String>,
    /// Leads removed since the running fetch started.
    removed_during_fetch: HashSet<LeadId>,
}

impl StoreState {
    fn view(&self) -> LeadsView {
        LeadsView {
            records: self.records.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

struct StoreInner<B> {
    pipeline: FetchPipeline<B>,
    scope: Option<OwnerScope>,
    config: SyncConfig,
    notifier: Arc<dyn ErrorNotifier>,
    in_flight: AtomicBool,
    first_load_seen: AtomicBool,
    empty_retry_used: AtomicBool,
    state: Mutex<StoreState>,
    view: watch::Sender<LeadsView>,
}

/// Shared handle to one lead store; clones refer to the same state.
pub struct LeadStore<B> {
    inner: Arc<StoreInner<B>>,
}

impl<B> Clone for LeadStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Held for the duration of one fetch. Releases the in-flight latch on drop;
/// a fetch dropped before it finished also leaves `loading` cleared.
struct FetchGuard<'a, B> {
    inner: &'a StoreInner<B>,
    mode: FetchMode,
    finished: bool,
}

impl<B> FetchGuard<'_, B> {
    fn finish(&mut self) {
        self.finished = true;
    }
}

impl<B> Drop for FetchGuard<'_, B> {
    fn drop(&mut self) {
        if !self.finished {
            let view = {
                let mut state = self
                    .inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                state.loading = false;
                state.removed_during_fetch.clear();
                state.view()
            };
            self.inner.view.send_replace(view);
            warn!(
                "event=store_fetch module=store status=cancelled mode={}",
                self.mode.as_str()
            );
        }
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl<B: LeadBackend + 'static> LeadStore<B> {
    /// Creates an empty store for `scope`; `None` means unauthenticated.
    pub fn new(
        backend: B,
        scope: Option<OwnerScope>,
        config: SyncConfig,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        let (view, _) = watch::channel(LeadsView::default());
        Self {
            inner: Arc::new(StoreInner {
                pipeline: FetchPipeline::new(backend),
                scope,
                config,
                notifier,
                in_flight: AtomicBool::new(false),
                first_load_seen: AtomicBool::new(false),
                empty_retry_used: AtomicBool::new(false),
                state: Mutex::new(StoreState::default()),
                view,
            }),
        }
    }

    pub fn scope(&self) -> Option<OwnerScope> {
        self.inner.scope
    }

    pub fn backend(&self) -> &B {
        self.inner.pipeline.backend()
    }

    /// Current records, loading flag and error.
    pub fn snapshot(&self) -> LeadsView {
        self.lock_state().view()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<LeadsView> {
        self.inner.view.subscribe()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// User-visible reload: sets `loading` and notifies on failure.
    pub async fn refetch(&self) -> FetchOutcome {
        self.run_fetch(FetchMode::Visible).await
    }

    /// Background reload: no loading state, failures are only logged.
    pub async fn refetch_silent(&self) -> FetchOutcome {
        self.run_fetch(FetchMode::Silent).await
    }

    /// Starts a silent refetch on its own task; used by channel handlers,
    /// which must not block.
    pub fn spawn_refetch_silent(&self) -> JoinHandle<FetchOutcome> {
        let store = self.clone();
        tokio::spawn(async move { store.refetch_silent().await })
    }

    /// Patches the lead with `lead_id` in place. Returns whether it exists.
    pub fn apply_patch(&self, lead_id: LeadId, patch: &DetailPatch) -> bool {
        let patched = self.update(|state| {
            match state.records.iter_mut().find(|lead| lead.id == lead_id) {
                Some(lead) => {
                    apply_detail_patch(lead, patch);
                    true
                }
                None => false,
            }
        });
        debug!(
            "event=store_patch module=store status={} target=lead lead_id={}",
            if patched { "ok" } else { "no_match" },
            lead_id
        );
        patched
    }

    /// Patches every lead whose detail id equals `patch.id`.
    ///
    /// Returns the number of leads changed.
    pub fn apply_detail_update(&self, patch: &DetailPatch) -> usize {
        let patched = self.update(|state| {
            let mut count = 0;
            for lead in state
                .records
                .iter_mut()
                .filter(|lead| lead.detail_id == Some(patch.id))
            {
                apply_detail_patch(lead, patch);
                count += 1;
            }
            count
        });
        debug!(
            "event=store_patch module=store status={} target=detail detail_id={} count={}",
            if patched > 0 { "ok" } else { "no_match" },
            patch.id,
            patched
        );
        patched
    }

    /// Removes a lead immediately, also hiding it from a fetch in flight.
    pub fn remove_by_id(&self, lead_id: LeadId) -> bool {
        let removed = self.update(|state| {
            state.removed_during_fetch.insert(lead_id);
            let before = state.records.len();
            state.records.retain(|lead| lead.id != lead_id);
            state.records.len() != before
        });
        debug!(
            "event=store_remove module=store status={} lead_id={}",
            if removed { "ok" } else { "no_match" },
            lead_id
        );
        removed
    }

    /// Drops all records; used on teardown.
    pub fn clear(&self) {
        self.update(|state| {
            state.records.clear();
            state.loading = false;
            state.error = None;
        });
        info!("event=store_clear module=store status=ok");
    }

    async fn run_fetch(&self, mode: FetchMode) -> FetchOutcome {
        let Some(scope) = self.inner.scope else {
            self.update(|state| {
                state.records.clear();
                state.loading = false;
                state.error = None;
            });
            debug!(
                "event=store_fetch module=store status=skipped mode={} reason=unauthenticated",
                mode.as_str()
            );
            return FetchOutcome::Unauthenticated;
        };

        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "event=store_fetch module=store status=skipped mode={} reason=in_flight",
                mode.as_str()
            );
            return FetchOutcome::Skipped;
        }
        let mut guard = FetchGuard {
            inner: self.inner.as_ref(),
            mode,
            finished: false,
        };

        let started_at = Instant::now();
        self.update(|state| {
            state.removed_during_fetch.clear();
            if mode == FetchMode::Visible {
                state.loading = true;
            }
        });

        let result = self.inner.pipeline.load_composite(&scope).await;
        guard.finish();
        match result {
            Ok(leads) => {
                let count = self.finish_success(leads);
                info!(
                    "event=store_fetch module=store status=ok mode={} count={} duration_ms={}",
                    mode.as_str(),
                    count,
                    started_at.elapsed().as_millis()
                );
                if !self.inner.first_load_seen.swap(true, Ordering::AcqRel) && count == 0 {
                    self.schedule_empty_retry();
                }
                FetchOutcome::Loaded(count)
            }
            Err(err) => {
                self.finish_failure(mode, &err);
                FetchOutcome::Failed(err)
            }
        }
    }

    fn finish_success(&self, leads: Vec<Lead>) -> usize {
        self.update(|state| {
            let removed = std::mem::take(&mut state.removed_during_fetch);
            let mut seen = HashSet::with_capacity(leads.len());
            state.records = leads
                .into_iter()
                .filter(|lead| !removed.contains(&lead.id) && seen.insert(lead.id))
                .collect();
            state.loading = false;
            state.error = None;
            state.records.len()
        })
    }

    fn finish_failure(&self, mode: FetchMode, err: &FetchError) {
        let keep_stale = self.inner.config.keep_stale_on_error;
        let message = err.user_message();
        self.update(|state| {
            state.removed_during_fetch.clear();
            state.loading = false;
            if !keep_stale {
                state.records.clear();
            }
            if mode == FetchMode::Visible {
                state.error = Some(message.clone());
            }
        });

        match mode {
            FetchMode::Visible => {
                error!(
                    "event=store_fetch module=store status=error mode=visible stage={} error_code={} kept_stale={} error={}",
                    err.stage.as_str(),
                    err.cause.code(),
                    keep_stale,
                    err
                );
                self.inner
                    .notifier
                    .notify_error(FETCH_FAILED_TITLE, message.as_str());
            }
            FetchMode::Silent => warn!(
                "event=store_fetch module=store status=error mode=silent stage={} error_code={} kept_stale={} error={}",
                err.stage.as_str(),
                err.cause.code(),
                keep_stale,
                err
            ),
        }
    }

    fn schedule_empty_retry(&self) {
        if self.inner.empty_retry_used.swap(true, Ordering::AcqRel) {
            return;
        }
        let delay = self.inner.config.empty_retry_delay();
        info!(
            "event=store_empty_retry module=store status=scheduled delay_ms={}",
            delay.as_millis()
        );
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("event=store_empty_retry module=store status=fired");
            store.refetch_silent().await
        });
    }

    fn update<R>(&self, mutate: impl FnOnce(&mut StoreState) -> R) -> R {
        let (result, view) = {
            let mut state = self.lock_state();
            let result = mutate(&mut state);
            (result, state.view())
        };
        self.inner.view.send_replace(view);
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
