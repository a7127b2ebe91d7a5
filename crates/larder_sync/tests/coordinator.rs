//! End-to-end passes against the in-memory remote.

use larder_codec::{record, Value};
use larder_remote::{RemoteClient, RemoteErrorKind};
use larder_store::{ConflictChoice, StoredRow, SyncStatus};
use larder_sync::{
    CancelHandle, ReconcileScope, RetryConfig, SyncConfig, SyncCoordinator, SyncError, SyncState,
};
use larder_testkit::{product, sample_remote, scenarios, HookRemote, RemoteOp, TestStore};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn config() -> SyncConfig {
    SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(10))
            .with_jitter(false),
    )
}

fn coordinator(store: &TestStore, remote: Arc<dyn RemoteClient>) -> SyncCoordinator {
    SyncCoordinator::new(store.store.clone(), remote, config())
}

fn row(store: &TestStore, table: &str, id: impl Into<Value>) -> StoredRow {
    store
        .get_row(store.table(table), id)
        .unwrap()
        .expect("row exists")
}

fn name(store: &TestStore, id: i64) -> Value {
    row(store, "products", id).record["name"].clone()
}

#[test]
fn pending_row_without_remote_identity_is_appended() {
    let store = TestStore::memory();
    let remote = Arc::new(sample_remote());
    store
        .insert(store.table("products"), &record! { "id" => 1, "name" => "A" })
        .unwrap();

    let sync = coordinator(&store, remote.clone());
    let report = sync.push().unwrap();

    assert_eq!(report.table("products").unwrap().appended, 1);
    let stored = row(&store, "products", 1);
    assert_eq!(stored.meta.status, SyncStatus::Synced);
    let link = stored.meta.remote.expect("remote identity recorded");
    let copy = remote.record("Products", &link.remote_id).unwrap();
    assert_eq!(copy.fields["name"], Value::Text("A".into()));
    assert_eq!(copy.version, link.version);
}

#[test]
fn later_remote_edit_wins_reconcile() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    remote.set_now(50);
    let remote_id = remote.seed("Products", record! { "id" => 2, "name" => "old" });
    let sync = coordinator(&store, remote.clone());
    sync.bootstrap().unwrap();
    assert_eq!(row(&store, "products", 2).meta.status, SyncStatus::Synced);

    store.clock.set(100);
    store.update(products, 2, &record! { "name" => "local" }).unwrap();
    assert_eq!(row(&store, "products", 2).meta.local_modified_at, 100);
    remote.set_now(150);
    remote.edit("Products", &remote_id, record! { "name" => "remote" });

    let report = sync.reconcile().unwrap();

    let table = report.table("products").unwrap();
    assert_eq!(table.remote_wins, 1);
    assert_eq!(table.contested, vec![Value::Integer(2)]);
    let stored = row(&store, "products", 2);
    assert_eq!(stored.meta.status, SyncStatus::Synced);
    assert_eq!(stored.record["name"], Value::Text("remote".into()));
    assert_eq!(
        remote.record("Products", &remote_id).unwrap().fields["name"],
        Value::Text("remote".into())
    );
}

#[test]
fn later_local_edit_wins_and_is_pushed_next_pass() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    remote.set_now(50);
    let remote_id = remote.seed("Products", record! { "id" => 2, "name" => "old" });
    let sync = coordinator(&store, remote.clone());
    sync.bootstrap().unwrap();

    remote.set_now(150);
    remote.edit("Products", &remote_id, record! { "name" => "remote" });
    store.clock.set(200);
    store.update(products, 2, &record! { "name" => "local" }).unwrap();

    let report = sync.reconcile().unwrap();
    assert_eq!(report.table("products").unwrap().local_wins, 1);
    let stored = row(&store, "products", 2);
    assert_eq!(stored.meta.status, SyncStatus::Pending);
    assert_eq!(stored.record["name"], Value::Text("local".into()));

    sync.reconcile().unwrap();
    assert_eq!(row(&store, "products", 2).meta.status, SyncStatus::Synced);
    assert_eq!(
        remote.record("Products", &remote_id).unwrap().fields["name"],
        Value::Text("local".into())
    );
}

#[test]
fn unreachable_remote_aborts_without_side_effects() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    remote.set_reachable(false);
    store.insert(products, &product(1, "tea")).unwrap();
    store.insert(products, &product(2, "milk")).unwrap();
    let before = store.rows(products).unwrap();

    let sync = coordinator(&store, remote.clone());
    assert!(matches!(sync.manual_sync(), Err(SyncError::Offline)));

    // the probe is the only call
    assert_eq!(remote.call_count(), 1);
    assert_eq!(store.rows(products).unwrap(), before);
    let status = sync.get_sync_status().unwrap();
    assert!(!status.online);
    assert!(status.last_checked_at.is_some());
    assert_eq!(status.pending_count, 2);
    assert_eq!(status.state, SyncState::Failed);
    assert_eq!(status.last_error.as_deref(), Some("remote is unreachable"));
    assert!(!status.in_progress);
}

#[test]
fn failing_table_does_not_block_others() {
    let store = TestStore::memory();
    let remote = Arc::new(sample_remote());
    remote.fail_collection("Products", RemoteErrorKind::Unavailable);
    store.insert(store.table("products"), &product(1, "tea")).unwrap();
    store.insert(store.table("products"), &product(2, "milk")).unwrap();
    store
        .insert(store.table("customers"), &record! { "code" => "c1", "name" => "Ann" })
        .unwrap();

    let report = coordinator(&store, remote.clone()).push().unwrap();

    assert_eq!(report.table("products").unwrap().failures.len(), 2);
    assert_eq!(report.table("customers").unwrap().appended, 1);
    assert_eq!(row(&store, "customers", "c1").meta.status, SyncStatus::Synced);
    for id in [1, 2] {
        let stored = row(&store, "products", id);
        assert_eq!(stored.meta.status, SyncStatus::Pending);
        assert_eq!(stored.meta.attempts, 1);
        assert!(stored.meta.last_error.unwrap().contains("unavailable"));
    }
}

#[test]
fn bootstrap_twice_is_idempotent() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(3, 50));
    let sync = coordinator(&store, remote);

    let first = sync.bootstrap().unwrap();
    assert_eq!(first.table("products").unwrap().pulled, 3);
    let after_first = store.rows(products).unwrap();
    sync.bootstrap().unwrap();
    let after_second = store.rows(products).unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.len(), 3);
    assert!(after_second.iter().all(|r| r.meta.status == SyncStatus::Synced));
}

#[test]
fn bootstrap_keeps_unsynced_local_rows() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(2, 50));
    store.insert(products, &product(1, "mine")).unwrap();
    store.insert(products, &product(7, "new")).unwrap();

    let report = coordinator(&store, remote).bootstrap().unwrap();

    assert_eq!(report.table("products").unwrap().pulled, 1);
    assert_eq!(name(&store, 1), Value::Text("mine".into()));
    assert_eq!(row(&store, "products", 1).meta.status, SyncStatus::Pending);
    assert_eq!(row(&store, "products", 2).meta.status, SyncStatus::Synced);
    assert_eq!(row(&store, "products", 7).meta.status, SyncStatus::Pending);
}

#[test]
fn bootstrap_tables_are_independent() {
    let store = TestStore::memory();
    let remote = Arc::new(scenarios::remote_with_products(3, 50));
    remote.fail_collection("Customers", RemoteErrorKind::NotFound);
    let sync = coordinator(&store, remote);

    let report = sync.bootstrap().unwrap();

    assert!(report.table("customers").unwrap().error.is_some());
    assert_eq!(report.table("products").unwrap().pulled, 3);
    // an incomplete bootstrap is retried by the scheduler
    assert!(sync.bootstrap_due().unwrap());
}

#[test]
fn reconcile_applies_remote_changes_to_synced_rows() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(3, 50));
    let sync = SyncCoordinator::new(
        store.store.clone(),
        remote.clone(),
        config().with_reconcile_scope(ReconcileScope::AllTables),
    );
    sync.bootstrap().unwrap();

    let first = row(&store, "products", 1).meta.remote.unwrap().remote_id;
    let third = row(&store, "products", 3).meta.remote.unwrap().remote_id;
    remote.set_now(90);
    remote.edit("Products", &first, record! { "name" => "renamed" });
    remote.remove("Products", &third);
    remote.seed("Products", product(4, "fresh"));

    let report = sync.reconcile().unwrap();

    assert_eq!(report.table("products").unwrap().pulled, 3);
    assert_eq!(name(&store, 1), Value::Text("renamed".into()));
    assert!(store.get(products, 3).unwrap().is_none());
    assert_eq!(row(&store, "products", 4).meta.status, SyncStatus::Synced);
}

#[test]
fn pending_scope_reads_nothing_when_idle() {
    let store = TestStore::memory();
    let memory = Arc::new(sample_remote());
    let remote = Arc::new(HookRemote::new(memory, |_| {}));
    let sync = coordinator(&store, remote.clone());

    let report = sync.reconcile().unwrap();

    assert!(report.tables.is_empty());
    assert_eq!(remote.data_calls(), 0);
}

#[test]
fn local_delete_reaches_remote() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(2, 50));
    let sync = coordinator(&store, remote.clone());
    sync.bootstrap().unwrap();

    store.delete(products, 1).unwrap();
    assert!(store.get(products, 1).unwrap().is_none());
    let report = sync.push().unwrap();

    assert_eq!(report.table("products").unwrap().deleted, 1);
    assert!(store.get_row(products, 1).unwrap().is_none());
    assert_eq!(remote.records("Products").len(), 1);
}

#[test]
fn delete_of_never_sent_row_stays_local() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    store.insert(products, &product(1, "tea")).unwrap();
    store.delete(products, 1).unwrap();

    coordinator(&store, remote.clone()).push().unwrap();

    assert!(store.get_row(products, 1).unwrap().is_none());
    assert!(remote.records("Products").is_empty());
    // probe, authenticate, nothing else
    assert_eq!(remote.call_count(), 2);
}

#[test]
fn edit_of_remotely_deleted_row_needs_a_decision() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(1, 50));
    let sync = coordinator(&store, remote.clone());
    sync.bootstrap().unwrap();

    let old_id = row(&store, "products", 1).meta.remote.unwrap().remote_id;
    remote.remove("Products", &old_id);
    store.update(products, 1, &record! { "name" => "kept" }).unwrap();

    let report = sync.reconcile().unwrap();
    assert_eq!(report.conflict_count(), 1);
    assert_eq!(row(&store, "products", 1).meta.status, SyncStatus::Conflict);
    assert_eq!(sync.get_sync_status().unwrap().conflict_count, 1);
    assert!(matches!(
        sync.retry_row(products, 1),
        Err(SyncError::ConflictUnresolved { .. })
    ));

    sync.resolve_conflict(products, 1, ConflictChoice::KeepLocal).unwrap();
    sync.push().unwrap();

    let stored = row(&store, "products", 1);
    assert_eq!(stored.meta.status, SyncStatus::Synced);
    let new_id = stored.meta.remote.unwrap().remote_id;
    assert_ne!(new_id, old_id);
    assert_eq!(
        remote.record("Products", &new_id).unwrap().fields["name"],
        Value::Text("kept".into())
    );
}

#[test]
fn stalled_row_deleted_remotely_becomes_conflict_and_can_be_dropped() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(scenarios::remote_with_products(1, 50));
    let sync = SyncCoordinator::new(
        store.store.clone(),
        remote.clone(),
        config().with_retry(RetryConfig::no_retry()),
    );
    sync.bootstrap().unwrap();

    store.update(products, 1, &record! { "name" => "edited" }).unwrap();
    remote.fail_collection("Products", RemoteErrorKind::Unavailable);
    sync.push().unwrap();
    assert_eq!(sync.get_sync_status().unwrap().stalled_count, 1);

    remote.clear_fault("Products");
    let remote_id = row(&store, "products", 1).meta.remote.unwrap().remote_id;
    remote.remove("Products", &remote_id);
    let report = sync.reconcile().unwrap();

    let table = report.table("products").unwrap();
    assert_eq!(table.stalled, vec![Value::Integer(1)]);
    assert_eq!(table.conflicts.len(), 1);
    sync.resolve_conflict(products, 1, ConflictChoice::AcceptRemote)
        .unwrap();
    assert!(store.get_row(products, 1).unwrap().is_none());
}

#[test]
fn expired_credentials_are_refreshed_once() {
    let store = TestStore::memory();
    let products = store.table("products");
    let memory = Arc::new(sample_remote());
    let hook_target = memory.clone();
    let remote = Arc::new(HookRemote::new(memory.clone(), move |call| {
        if call.index == 1 {
            hook_target.expire_token();
        }
    }));
    store.insert(products, &product(1, "tea")).unwrap();
    store.insert(products, &product(2, "milk")).unwrap();

    let report = coordinator(&store, remote).push().unwrap();

    assert_eq!(report.table("products").unwrap().appended, 2);
    assert_eq!(memory.records("Products").len(), 2);
}

#[test]
fn second_refusal_aborts_and_keeps_earlier_rows() {
    let store = TestStore::memory();
    let products = store.table("products");
    let memory = Arc::new(sample_remote());
    let hook_target = memory.clone();
    let remote = Arc::new(HookRemote::new(memory.clone(), move |call| {
        // refuse the first call, then refuse again after one success
        if call.index == 1 || call.index == 3 {
            hook_target.expire_token();
        }
    }));
    store.insert(products, &product(1, "tea")).unwrap();
    store.clock.advance(1);
    store.insert(products, &product(2, "milk")).unwrap();

    let sync = coordinator(&store, remote);
    let err = sync.push().unwrap_err();

    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(row(&store, "products", 1).meta.status, SyncStatus::Synced);
    let second = row(&store, "products", 2);
    assert_eq!(second.meta.status, SyncStatus::Pending);
    assert_eq!(second.meta.attempts, 0);
    let status = sync.get_sync_status().unwrap();
    assert_eq!(status.state, SyncState::Failed);
    assert!(status.last_error.unwrap().contains("authentication failed"));
}

#[test]
fn rejected_credentials_stop_before_any_data_call() {
    let store = TestStore::memory();
    let memory = Arc::new(sample_remote());
    memory.reject_auth(true);
    let remote = Arc::new(HookRemote::new(memory, |_| {}));
    store.insert(store.table("products"), &product(1, "tea")).unwrap();

    let err = coordinator(&store, remote.clone()).manual_sync().unwrap_err();

    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(remote.data_calls(), 0);
    assert_eq!(row(&store, "products", 1).meta.attempts, 0);
}

#[test]
fn failing_rows_back_off_then_stall() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    let sync = SyncCoordinator::new(
        store.store.clone(),
        remote.clone(),
        config().with_retry(
            RetryConfig::new(2)
                .with_initial_delay(Duration::from_secs(10))
                .with_jitter(false),
        ),
    );
    sync.bootstrap().unwrap();

    remote.fail_collection("Products", RemoteErrorKind::Unavailable);
    store.insert(products, &product(1, "tea")).unwrap();
    sync.push().unwrap();
    let failed = row(&store, "products", 1);
    assert_eq!(failed.meta.attempts, 1);
    assert_eq!(failed.meta.next_attempt_at, Some(store.now_ms() + 10_000));

    // still backing off
    let report = sync.run_scheduled().unwrap();
    assert_eq!(report.table("products").unwrap().skipped_backoff, 1);
    assert_eq!(row(&store, "products", 1).meta.attempts, 1);

    store.clock.advance(10_001);
    sync.run_scheduled().unwrap();
    assert_eq!(row(&store, "products", 1).meta.attempts, 2);

    store.clock.advance(60_000);
    let report = sync.run_scheduled().unwrap();
    assert_eq!(report.table("products").unwrap().stalled, vec![Value::Integer(1)]);
    assert_eq!(sync.get_sync_status().unwrap().stalled_count, 1);

    remote.clear_fault("Products");
    sync.retry_row(products, 1).unwrap();
    sync.push().unwrap();
    assert_eq!(row(&store, "products", 1).meta.status, SyncStatus::Synced);
    assert_eq!(sync.get_sync_status().unwrap().stalled_count, 0);
}

#[test]
fn manual_push_ignores_backoff() {
    let store = TestStore::memory();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    let sync = coordinator(&store, remote.clone());
    remote.fail_collection("Products", RemoteErrorKind::Unavailable);
    store.insert(products, &product(1, "tea")).unwrap();
    sync.push().unwrap();

    remote.clear_fault("Products");
    let report = sync.push().unwrap();
    assert_eq!(report.table("products").unwrap().appended, 1);
}

#[test]
fn updates_are_batched() {
    let store = TestStore::memory();
    let products = store.table("products");
    let memory = Arc::new(scenarios::remote_with_products(3, 50));
    let ops = Arc::new(Mutex::new(Vec::new()));
    let log = ops.clone();
    let remote = Arc::new(HookRemote::new(memory.clone(), move |call| log.lock().push(call.op)));
    let sync = SyncCoordinator::new(
        store.store.clone(),
        remote,
        config().with_push_batch_size(2),
    );
    sync.bootstrap().unwrap();
    ops.lock().clear();

    for id in 1..=3 {
        store.clock.advance(1);
        store
            .update(products, id, &record! { "name" => format!("v2-{id}") })
            .unwrap();
    }
    let report = sync.push().unwrap();

    assert_eq!(*ops.lock(), vec![RemoteOp::Batch, RemoteOp::Update]);
    assert_eq!(report.table("products").unwrap().updated, 3);
    for record in memory.records("Products") {
        let id = record.fields["id"].as_i64().unwrap();
        assert_eq!(record.fields["name"], Value::Text(format!("v2-{id}")));
    }
}

#[test]
fn cancelled_push_leaves_remaining_rows_pending() {
    let store = TestStore::memory();
    let products = store.table("products");
    let memory = Arc::new(sample_remote());
    let cancel: Arc<OnceLock<CancelHandle>> = Arc::new(OnceLock::new());
    let trigger = cancel.clone();
    let remote = Arc::new(HookRemote::new(memory.clone(), move |call| {
        if call.index == 2 {
            if let Some(handle) = trigger.get() {
                handle.cancel();
            }
        }
    }));
    for id in 1..=4 {
        store.clock.advance(1);
        store.insert(products, &product(id, "x")).unwrap();
    }
    let sync = coordinator(&store, remote);
    cancel.set(sync.cancel_handle()).unwrap();

    assert!(matches!(sync.push(), Err(SyncError::Cancelled)));

    let statuses: Vec<SyncStatus> = store
        .rows(products)
        .unwrap()
        .iter()
        .map(|r| r.meta.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            SyncStatus::Synced,
            SyncStatus::Synced,
            SyncStatus::Pending,
            SyncStatus::Pending
        ]
    );
    assert_eq!(memory.records("Products").len(), 2);

    sync.push().unwrap();
    assert_eq!(memory.records("Products").len(), 4);
    assert_eq!(sync.get_sync_status().unwrap().pending_count, 0);
}

#[test]
fn edit_during_push_is_not_lost() {
    let store = TestStore::memory();
    let products = store.table("products");
    let memory = Arc::new(sample_remote());
    let local = store.store.clone();
    let clock = store.clock.clone();
    let remote = Arc::new(HookRemote::new(memory.clone(), move |call| {
        if call.index == 1 {
            clock.advance(5);
            local
                .update(products, 1, &record! { "name" => "during" })
                .unwrap();
        }
    }));
    store.insert(products, &product(1, "before")).unwrap();
    let sync = coordinator(&store, remote);

    sync.push().unwrap();
    let stored = row(&store, "products", 1);
    assert_eq!(stored.meta.status, SyncStatus::Pending);
    assert_eq!(stored.record["name"], Value::Text("during".into()));
    assert!(stored.meta.remote.is_some());

    sync.push().unwrap();
    assert_eq!(row(&store, "products", 1).meta.status, SyncStatus::Synced);
    let records = memory.records("Products");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields["name"], Value::Text("during".into()));
}

#[test]
fn status_tracks_last_successful_session() {
    let store = TestStore::memory();
    let remote = Arc::new(sample_remote());
    let sync = coordinator(&store, remote);
    store.clock.set(5_000);

    sync.bootstrap().unwrap();

    let status = sync.get_sync_status().unwrap();
    assert!(status.online);
    assert_eq!(status.last_sync_at, Some(5_000));
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.last_error, None);
}

#[test]
fn bookkeeping_survives_restart() {
    let store = TestStore::file();
    let products = store.table("products");
    let remote = Arc::new(sample_remote());
    remote.fail_collection("Products", RemoteErrorKind::Unavailable);
    store.insert(products, &product(1, "tea")).unwrap();
    let sync = coordinator(&store, remote.clone());
    sync.bootstrap().unwrap();
    sync.push().unwrap();
    drop(sync);

    let reopened = Arc::new(store.reopen());
    let stored = reopened.get_row(products, 1).unwrap().unwrap();
    assert_eq!(stored.meta.status, SyncStatus::Pending);
    assert_eq!(stored.meta.attempts, 1);
    assert!(stored.meta.next_attempt_at.is_some());

    remote.clear_fault("Products");
    let sync = SyncCoordinator::new(reopened.clone(), remote.clone(), config());
    // the failed bootstrap is still due
    assert!(sync.bootstrap_due().unwrap());
    sync.push().unwrap();
    assert_eq!(
        reopened.get_row(products, 1).unwrap().unwrap().meta.status,
        SyncStatus::Synced
    );
    assert_eq!(remote.records("Products").len(), 1);
}
