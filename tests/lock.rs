// tests/lock.rs

//! Multi-node tests: two connections to one database file stand in for two
//! cluster nodes.

mod common;

use common::*;
use rusqlite::Connection;
use schemaboot::lock::LOCK_TABLE;
use schemaboot::{
    BootstrapOutcome, ClusterBootstrapLock, Error, LockResult, Patch, SchemaBootstrap,
    ScriptExecutionContext,
};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_exactly_one_node_acquires_the_lock() {
    let (_dir, db_path) = temp_db();
    Connection::open(&db_path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            thread::spawn(move || {
                let conn = Connection::open(&db_path).unwrap();
                let mut ctx = ScriptExecutionContext::new();
                barrier.wait();
                let result = ClusterBootstrapLock.mark_started(&conn, &mut ctx);
                (result, ctx.has_executed())
            })
        })
        .collect();
    let results: Vec<(LockResult, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let acquired: Vec<_> = results
        .iter()
        .filter(|(result, _)| *result == LockResult::Acquired)
        .collect();
    assert_eq!(acquired.len(), 1);
    for (result, owns) in &results {
        assert_eq!(*owns, *result == LockResult::Acquired);
    }
}

#[test]
fn test_second_node_proceeds_after_release() {
    let (_dir, db_path) = temp_db();
    let node_a = Connection::open(&db_path).unwrap();
    let node_b = Connection::open(&db_path).unwrap();
    let lock = ClusterBootstrapLock;
    let mut ctx_a = ScriptExecutionContext::new();
    let mut ctx_b = ScriptExecutionContext::new();

    assert_eq!(lock.mark_started(&node_a, &mut ctx_a), LockResult::Acquired);
    assert_eq!(lock.mark_started(&node_b, &mut ctx_b), LockResult::HeldByOther);
    assert!(lock.is_another_node_bootstrapping(&node_b, &ctx_b));
    // The owner does not see its own marker as contention
    assert!(!lock.is_another_node_bootstrapping(&node_a, &ctx_a));

    lock.mark_completed(&node_a, &mut ctx_a).unwrap();
    assert!(!lock.is_another_node_bootstrapping(&node_b, &ctx_b));
    assert_eq!(lock.mark_started(&node_b, &mut ctx_b), LockResult::Acquired);
    lock.mark_completed(&node_b, &mut ctx_b).unwrap();
}

#[test]
fn test_node_gives_up_while_another_upgrades() {
    let (dir, db_path) = temp_db();
    let other_node = Connection::open(&db_path).unwrap();
    seed_existing_schema(&other_node, 10);
    let mut other_ctx = ScriptExecutionContext::new();
    assert_eq!(
        ClusterBootstrapLock.mark_started(&other_node, &mut other_ctx),
        LockResult::Acquired
    );

    let config = test_config(&dir);
    let mut registry = base_registry();
    registry
        .add_post_update_patch(Patch::script("patch.index", "db/upgrade/index.sql"))
        .unwrap();
    let loader = base_loader().with(
        "db/upgrade/index.sql",
        "CREATE INDEX idx_app_node_store ON app_node (store_id);",
    );
    let conn = Connection::open(&db_path).unwrap();

    let err = SchemaBootstrap::new(&config, &registry, &loader)
        .run(&conn)
        .unwrap_err();
    assert!(matches!(
        err.root(),
        Error::UpgradeInProgressOnAnotherNode { attempts: 3 }
    ));
    assert!(record(&conn, "patch.index").is_none());
    // The other node's marker is left alone
    assert!(table_exists(&conn, LOCK_TABLE));

    ClusterBootstrapLock
        .mark_completed(&other_node, &mut other_ctx)
        .unwrap();
    let report = SchemaBootstrap::new(&config, &registry, &loader)
        .run(&conn)
        .unwrap();
    assert_eq!(report.outcome, BootstrapOutcome::Updated);
    assert_eq!(report.attempts, 1);
}

#[test]
fn test_stale_marker_holds_off_every_node() {
    let (dir, db_path) = temp_db();
    let conn = Connection::open(&db_path).unwrap();
    seed_existing_schema(&conn, 10);
    conn.execute("CREATE TABLE alf_bootstrap_lock (charval CHAR(1) NOT NULL)", [])
        .unwrap();

    // Even an up-to-date node waits until the marker is removed
    let config = test_config(&dir);
    let registry = base_registry();
    let loader = base_loader();
    let err = SchemaBootstrap::new(&config, &registry, &loader)
        .run(&conn)
        .unwrap_err();
    assert!(matches!(err, Error::UpdateFailed(_)));
    assert!(matches!(
        err.root(),
        Error::UpgradeInProgressOnAnotherNode { attempts: 3 }
    ));

    conn.execute("DROP TABLE alf_bootstrap_lock", []).unwrap();
    let report = SchemaBootstrap::new(&config, &registry, &loader)
        .run(&conn)
        .unwrap();
    assert_eq!(report.outcome, BootstrapOutcome::Unchanged);
}

#[test]
fn test_concurrent_bootstrap_creates_schema_once() {
    let (dir, db_path) = temp_db();
    Connection::open(&db_path).unwrap();
    let output_dir = dir.path().to_path_buf();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["node-a", "node-b"]
        .into_iter()
        .map(|node| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let output_dir = output_dir.clone();
            thread::spawn(move || {
                let config = schemaboot::BootstrapConfig {
                    output_dir,
                    lock_retry_count: 30,
                    lock_retry_wait_secs: 1,
                    server_id: node.to_string(),
                    schema_version: SCHEMA_VERSION,
                    ..Default::default()
                };
                let registry = base_registry();
                let loader = base_loader();
                let conn = Connection::open(&db_path).unwrap();
                barrier.wait();
                SchemaBootstrap::new(&config, &registry, &loader)
                    .run(&conn)
                    .unwrap()
                    .outcome
            })
        })
        .collect();
    let mut outcomes: Vec<BootstrapOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    outcomes.sort_by_key(|o| o.to_string());
    assert_eq!(
        outcomes,
        vec![BootstrapOutcome::Created, BootstrapOutcome::Unchanged]
    );

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(query_i64(&conn, "SELECT COUNT(*) FROM app_store"), 1);
    assert!(!table_exists(&conn, LOCK_TABLE));
}
