mod support;

use leadsync_core::{
    CallerRole, DetailPatch, FetchOutcome, FetchStage, LeadStore, OwnerScope, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;
use support::{
    access_denied, detail_row, lead_row, settle, transport_failed, RecordingNotifier,
    ScriptedBackend,
};
use uuid::Uuid;

type TestStore = LeadStore<Arc<ScriptedBackend>>;

fn agent() -> OwnerScope {
    OwnerScope::new(Uuid::new_v4(), CallerRole::Agent)
}

fn store_with(
    backend: &Arc<ScriptedBackend>,
    scope: Option<OwnerScope>,
    config: SyncConfig,
) -> (TestStore, Arc<RecordingNotifier>) {
    let notifier = RecordingNotifier::new();
    let store = LeadStore::new(Arc::clone(backend), scope, config, notifier.clone());
    (store, notifier)
}

#[tokio::test]
async fn visible_refetch_populates_store() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let detail_id = Uuid::new_v4();
    backend.set_privileged(Ok(vec![lead_row(
        Uuid::new_v4(),
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        Some(detail_id),
    )]));
    backend.set_details(Ok(vec![detail_row(detail_id, "Ada", "Lovelace")]));
    let (store, notifier) = store_with(&backend, Some(scope), SyncConfig::default());
    let mut updates = store.subscribe();

    assert_eq!(store.refetch().await, FetchOutcome::Loaded(1));

    let view = store.snapshot();
    assert_eq!(view.records.len(), 1);
    assert_eq!(view.records[0].display_name, "Ada Lovelace");
    assert!(!view.loading);
    assert_eq!(view.error, None);
    assert!(notifier.notes().is_empty());
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().records.len(), 1);
}

#[tokio::test]
async fn overlapping_refetch_is_dropped_while_one_is_in_flight() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let detail_id = Uuid::new_v4();
    backend.set_privileged(Ok(vec![lead_row(
        Uuid::new_v4(),
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        Some(detail_id),
    )]));
    backend.set_details(Ok(vec![detail_row(detail_id, "Ada", "Lovelace")]));
    let gate = backend.hold_privileged();
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.refetch().await }
    });
    settle().await;

    assert!(store.is_fetching());
    assert!(store.snapshot().loading);
    assert_eq!(store.refetch_silent().await, FetchOutcome::Skipped);
    assert_eq!(store.refetch().await, FetchOutcome::Skipped);
    assert_eq!(backend.privileged_calls(), 1);

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), FetchOutcome::Loaded(1));
    assert!(!store.is_fetching());
    assert!(!store.snapshot().loading);
    assert_eq!(backend.privileged_calls(), 1);
    assert_eq!(backend.detail_calls(), 1);
}

#[tokio::test]
async fn silent_refetch_never_sets_loading() {
    let backend = ScriptedBackend::new();
    let gate = backend.hold_privileged();
    let (store, _) = store_with(&backend, Some(agent()), SyncConfig::default());

    let pending = store.spawn_refetch_silent();
    settle().await;
    assert!(store.is_fetching());
    assert!(!store.snapshot().loading);

    gate.add_permits(1);
    assert_eq!(pending.await.unwrap(), FetchOutcome::Loaded(0));
}

#[tokio::test(start_paused = true)]
async fn empty_first_load_retries_once_after_delay() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let lead_id = Uuid::new_v4();
    backend.set_privileged_sequence(vec![
        Ok(Vec::new()),
        Ok(vec![lead_row(
            lead_id,
            1,
            "2026-03-01T08:00:00.000Z",
            scope.user_id,
            None,
        )]),
    ]);
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());

    assert_eq!(store.refetch().await, FetchOutcome::Loaded(0));
    assert_eq!(backend.privileged_calls(), 1);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(backend.privileged_calls(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(backend.privileged_calls(), 2);
    let view = store.snapshot();
    assert_eq!(view.records.len(), 1);
    assert_eq!(view.records[0].id, lead_id);
    assert!(!view.loading);
}

#[tokio::test(start_paused = true)]
async fn empty_retry_fires_at_most_once() {
    let backend = ScriptedBackend::new();
    backend.set_privileged(Ok(Vec::new()));
    let (store, _) = store_with(&backend, Some(agent()), SyncConfig::default());

    store.refetch().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.privileged_calls(), 2);

    store.refetch().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.privileged_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn non_empty_first_load_schedules_no_retry() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    backend.set_privileged_sequence(vec![
        Ok(vec![lead_row(
            Uuid::new_v4(),
            1,
            "2026-03-01T08:00:00.000Z",
            scope.user_id,
            None,
        )]),
        Ok(Vec::new()),
    ]);
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());

    assert_eq!(store.refetch().await, FetchOutcome::Loaded(1));
    assert_eq!(store.refetch().await, FetchOutcome::Loaded(0));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.privileged_calls(), 2);
}

#[tokio::test]
async fn detail_update_patches_matching_leads_without_fetching() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let (shared, other) = (Uuid::new_v4(), Uuid::new_v4());
    backend.set_privileged(Ok(vec![
        lead_row(Uuid::new_v4(), 3, "2026-03-03T08:00:00.000Z", scope.user_id, Some(shared)),
        lead_row(Uuid::new_v4(), 2, "2026-03-02T08:00:00.000Z", scope.user_id, Some(other)),
        lead_row(Uuid::new_v4(), 1, "2026-03-01T08:00:00.000Z", scope.user_id, Some(shared)),
    ]));
    backend.set_details(Ok(vec![
        detail_row(shared, "Ada", "Lovelace"),
        detail_row(other, "Grace", "Hopper"),
    ]));
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());
    store.refetch().await;
    let before = store.snapshot().records;

    let patched = store.apply_detail_update(&DetailPatch::new(shared).with_stage("underwriting"));

    assert_eq!(patched, 2);
    let after = store.snapshot().records;
    assert_eq!(after[0].stage, "underwriting");
    assert_eq!(after[2].stage, "underwriting");
    assert_eq!(after[1], before[1]);
    assert_eq!(after[0].email, before[0].email);
    assert_eq!(after[0].display_name, "Ada Lovelace");
    assert_eq!(backend.privileged_calls(), 1);
    assert_eq!(backend.detail_calls(), 1);
}

#[tokio::test]
async fn patch_recomputes_display_name_and_ignores_unknown_targets() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let (lead_id, detail_id) = (Uuid::new_v4(), Uuid::new_v4());
    backend.set_privileged(Ok(vec![lead_row(
        lead_id,
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        Some(detail_id),
    )]));
    backend.set_details(Ok(vec![detail_row(detail_id, "Ada", "Lovelace")]));
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());
    store.refetch().await;

    let mut rename = DetailPatch::new(detail_id);
    rename.first_name = Some(Some("Augusta".to_string()));
    assert!(store.apply_patch(lead_id, &rename));
    assert_eq!(store.snapshot().records[0].display_name, "Augusta Lovelace");

    let before = store.snapshot();
    assert!(!store.apply_patch(Uuid::new_v4(), &rename));
    assert_eq!(store.apply_detail_update(&DetailPatch::new(Uuid::new_v4()).with_stage("won")), 0);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn remove_by_id_drops_only_that_lead() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let (keep, drop_id) = (Uuid::new_v4(), Uuid::new_v4());
    backend.set_privileged(Ok(vec![
        lead_row(keep, 2, "2026-03-02T08:00:00.000Z", scope.user_id, None),
        lead_row(drop_id, 1, "2026-03-01T08:00:00.000Z", scope.user_id, None),
    ]));
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());
    store.refetch().await;

    assert!(store.remove_by_id(drop_id));
    assert!(!store.remove_by_id(drop_id));
    let ids: Vec<Uuid> = store.snapshot().records.iter().map(|lead| lead.id).collect();
    assert_eq!(ids, vec![keep]);
}

#[tokio::test]
async fn lead_removed_during_fetch_is_not_resurrected() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let (keep, removed) = (Uuid::new_v4(), Uuid::new_v4());
    backend.set_privileged(Ok(vec![
        lead_row(keep, 2, "2026-03-02T08:00:00.000Z", scope.user_id, None),
        lead_row(removed, 1, "2026-03-01T08:00:00.000Z", scope.user_id, None),
    ]));
    let gate = backend.hold_privileged();
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());

    let pending = store.spawn_refetch_silent();
    settle().await;
    store.remove_by_id(removed);
    gate.add_permits(1);

    assert_eq!(pending.await.unwrap(), FetchOutcome::Loaded(1));
    let ids: Vec<Uuid> = store.snapshot().records.iter().map(|lead| lead.id).collect();
    assert_eq!(ids, vec![keep]);

    gate.add_permits(1);
    assert_eq!(store.refetch().await, FetchOutcome::Loaded(2));
}

#[tokio::test]
async fn duplicate_rows_collapse_to_one_lead() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let lead_id = Uuid::new_v4();
    let row = lead_row(lead_id, 1, "2026-03-01T08:00:00.000Z", scope.user_id, None);
    backend.set_privileged(Ok(vec![row.clone(), row]));
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());

    assert_eq!(store.refetch().await, FetchOutcome::Loaded(1));
}

#[tokio::test]
async fn unauthenticated_store_stays_empty_without_fetching() {
    let backend = ScriptedBackend::new();
    let (store, notifier) = store_with(&backend, None, SyncConfig::default());

    assert_eq!(store.refetch().await, FetchOutcome::Unauthenticated);
    assert_eq!(store.refetch_silent().await, FetchOutcome::Unauthenticated);

    let view = store.snapshot();
    assert!(view.records.is_empty());
    assert!(!view.loading);
    assert_eq!(backend.privileged_calls(), 0);
    assert_eq!(backend.direct_calls(), 0);
    assert!(notifier.notes().is_empty());
}

#[tokio::test]
async fn visible_failure_notifies_and_keeps_stale_records() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    backend.set_privileged(Ok(vec![lead_row(
        Uuid::new_v4(),
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        None,
    )]));
    let (store, notifier) = store_with(&backend, Some(scope), SyncConfig::default());
    store.refetch().await;

    backend.set_privileged(Err(access_denied()));
    backend.set_direct(Err(transport_failed()));
    let outcome = store.refetch().await;

    match outcome {
        FetchOutcome::Failed(err) => assert_eq!(err.stage, FetchStage::Direct),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let view = store.snapshot();
    assert_eq!(view.records.len(), 1);
    assert!(!view.loading);
    assert!(view.error.is_some());
    let notes = notifier.notes();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].0, "Failed to load leads");
    assert_eq!(Some(notes[0].1.clone()), view.error);

    backend.set_privileged(Ok(Vec::new()));
    store.refetch().await;
    assert_eq!(store.snapshot().error, None);
}

#[tokio::test]
async fn silent_failure_is_not_notified() {
    let backend = ScriptedBackend::new();
    backend.set_privileged(Err(access_denied()));
    backend.set_direct(Err(transport_failed()));
    let (store, notifier) = store_with(&backend, Some(agent()), SyncConfig::default());

    assert!(matches!(
        store.refetch_silent().await,
        FetchOutcome::Failed(_)
    ));
    assert!(notifier.notes().is_empty());
    assert_eq!(store.snapshot().error, None);
    assert!(!store.is_fetching());
}

#[tokio::test]
async fn failure_clears_records_when_stale_data_is_disabled() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    backend.set_privileged(Ok(vec![lead_row(
        Uuid::new_v4(),
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        None,
    )]));
    let config = SyncConfig {
        keep_stale_on_error: false,
        ..SyncConfig::default()
    };
    let (store, _) = store_with(&backend, Some(scope), config);
    store.refetch().await;

    backend.set_privileged(Err(access_denied()));
    backend.set_direct(Err(transport_failed()));
    store.refetch().await;

    assert!(store.snapshot().records.is_empty());
}

#[tokio::test]
async fn stale_patch_after_delete_does_not_restore_lead() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let (lead_id, detail_id) = (Uuid::new_v4(), Uuid::new_v4());
    backend.set_privileged(Ok(vec![lead_row(
        lead_id,
        1,
        "2026-03-01T08:00:00.000Z",
        scope.user_id,
        Some(detail_id),
    )]));
    backend.set_details(Ok(vec![detail_row(detail_id, "Ada", "Lovelace")]));
    let (store, _) = store_with(&backend, Some(scope), SyncConfig::default());
    store.refetch().await;

    let stale = DetailPatch::new(detail_id).with_stage("approved");
    store.remove_by_id(lead_id);
    assert!(!store.apply_patch(lead_id, &stale));
    assert_eq!(store.apply_detail_update(&stale), 0);
    assert!(store.snapshot().records.is_empty());
}

#[tokio::test]
async fn cancelled_refetch_clears_loading_and_releases_latch() {
    let backend = ScriptedBackend::new();
    let scope = agent();
    let gate = backend.hold_privileged();
    let (store, notifier) = store_with(&backend, Some(scope), SyncConfig::default());
    let mut updates = store.subscribe();

    let cancelled = tokio::time::timeout(Duration::from_millis(10), store.refetch()).await;
    assert!(cancelled.is_err());

    let view = store.snapshot();
    assert!(!view.loading);
    assert_eq!(view.error, None);
    assert!(!store.is_fetching());
    assert!(!updates.borrow_and_update().loading);
    assert!(notifier.notes().is_empty());

    gate.add_permits(1);
    assert_eq!(store.refetch().await, FetchOutcome::Loaded(0));
    assert_eq!(backend.privileged_calls(), 2);
}
