mod common;

use common::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tablekit::errors::Error;
use tablekit::tablespace::{self, faults, TablespaceEngine};
use tablekit::transaction::{IsolationLevel, StartOptions, TransactionContext, Xid};
use tablekit::{Config, EngineRegistry, Session, StorageEngine};
use tempfile::TempDir;
use uuid::Uuid;

const SECOND: &str = "tablespace2";

fn two_engines(dir: &TempDir) -> (Arc<EngineRegistry>, Arc<TablespaceEngine>, Arc<TablespaceEngine>) {
    let registry = EngineRegistry::new(Config::with_data_dir(dir.path()).lock_wait_timeout_ms(200));
    let first = Arc::new(TablespaceEngine::new(tablespace::ENGINE_NAME, registry.config()));
    let second = Arc::new(TablespaceEngine::new(SECOND, registry.config()));
    registry.add(first.clone()).unwrap();
    registry.add(second.clone()).unwrap();
    registry.init().unwrap();
    if registry.get_schema(SCHEMA).is_err() {
        registry
            .create_schema(&tablekit::definition::SchemaDefinition::new(SCHEMA))
            .unwrap();
    }
    (Arc::new(registry), first, second)
}

#[test]
fn test_two_engines_commit_together() {
    let dir = TempDir::new().unwrap();
    let (a, b) = (id("a"), id("b"));
    {
        let (registry, _, _) = two_engines(&dir);
        let mut session = Session::open(registry);
        session.create_table(&a, people(tablespace::ENGINE_NAME)).unwrap();
        session.create_table(&b, people(SECOND)).unwrap();

        session.begin(StartOptions::default()).unwrap();
        insert(&mut session, &a, &[(1, "a")]).unwrap();
        insert(&mut session, &b, &[(2, "b")]).unwrap();
        session.commit().unwrap();
        session.close().unwrap();
    }

    let (registry, _, _) = two_engines(&dir);
    assert!(registry.xa_recover().unwrap().is_empty());
    let mut session = Session::open(registry);
    assert_eq!(select_ids(&mut session, &a), vec![1]);
    assert_eq!(select_ids(&mut session, &b), vec![2]);
}

#[test]
fn test_failed_prepare_rolls_back_every_engine() {
    let dir = TempDir::new().unwrap();
    let (registry, _, second) = two_engines(&dir);
    let (a, b) = (id("a"), id("b"));
    let mut session = Session::open(registry.clone());
    session.create_table(&a, people(tablespace::ENGINE_NAME)).unwrap();
    session.create_table(&b, people(SECOND)).unwrap();

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &a, &[(1, "a")]).unwrap();
    insert(&mut session, &b, &[(2, "b")]).unwrap();
    second.faults().arm(faults::PREPARE);
    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert!(!session.in_transaction());

    assert!(select_ids(&mut session, &a).is_empty());
    assert!(select_ids(&mut session, &b).is_empty());
    assert!(registry.xa_recover().unwrap().is_empty());
}

/// Writes `row` to `table` in a transaction of its own on `engine` and
/// prepares it as `xid`, then drops the connection.
fn prepare_and_disconnect(registry: &EngineRegistry, engine: &TablespaceEngine, table: &str, row: (i64, &str), xid: &Xid) {
    let trx = Arc::new(TransactionContext::new(
        Uuid::new_v4(),
        engine.name(),
        IsolationLevel::RepeatableRead,
        Arc::new(AtomicBool::new(false)),
    ));
    trx.begin(&StartOptions::default()).unwrap();
    engine.start_transaction(&trx, &StartOptions::default()).unwrap();
    let (_, table) = registry.open_table(&id(table)).unwrap();
    let mut cursor = engine.create_cursor(table, trx.clone()).unwrap();
    let mut record = person(cursor.as_ref(), row.0, row.1);
    cursor.write_row(&mut record).unwrap();
    cursor.close().unwrap();
    drop(cursor);

    engine.prepare(&trx, xid).unwrap();
    engine.close_connection(&trx).unwrap();
}

#[test]
fn test_prepared_transaction_survives_restart() {
    let dir = TempDir::new().unwrap();
    let table = id("people");
    let (commit_xid, rollback_xid) = (Xid::new("batch-7"), Xid::new("batch-8"));
    {
        let server = start(dir.path());
        let mut session = Session::open(server.registry.clone());
        session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();
        insert(&mut session, &table, &[(1, "a")]).unwrap();
        session.close().unwrap();

        prepare_and_disconnect(&server.registry, &server.tablespace, "people", (7, "g"), &commit_xid);
        prepare_and_disconnect(&server.registry, &server.tablespace, "people", (8, "h"), &rollback_xid);
        assert_eq!(server.registry.xa_recover().unwrap(), vec![commit_xid.clone(), rollback_xid.clone()]);
    }

    {
        let server = start(dir.path());
        assert_eq!(server.registry.xa_recover().unwrap(), vec![commit_xid.clone(), rollback_xid.clone()]);

        // Prepared rows stay locked until resolved.
        let mut session = Session::open(server.registry.clone());
        let err = statement(&mut session, &table, |cursor| {
            let (old, mut new) = (person(cursor, 7, "g"), person(cursor, 7, "x"));
            cursor.update_row(&old, &mut new)
        })
        .unwrap_err();
        assert!(matches!(err, Error::LockWaitTimeout(_)));

        server.registry.resolve_by_xid(&commit_xid, true).unwrap();
        server.registry.resolve_by_xid(&rollback_xid, false).unwrap();
        assert!(server.registry.xa_recover().unwrap().is_empty());
        assert!(server.registry.resolve_by_xid(&commit_xid, true).is_err());
        assert_eq!(select_ids(&mut session, &table), vec![1, 7]);
        session.close().unwrap();
    }

    let server = start(dir.path());
    assert!(server.registry.xa_recover().unwrap().is_empty());
    let mut session = Session::open(server.registry.clone());
    assert_eq!(select_ids(&mut session, &table), vec![1, 7]);
}

#[test]
fn test_failed_resolution_keeps_transaction_prepared() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let xid = Xid::new("batch-9");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();
    prepare_and_disconnect(&server.registry, &server.tablespace, "people", (7, "g"), &xid);

    server.tablespace.faults().arm(faults::RESOLVE);
    let err = server.registry.resolve_by_xid(&xid, false).unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(server.registry.xa_recover().unwrap(), vec![xid.clone()]);
    assert_eq!(select_ids(&mut session, &table), vec![7]);

    server.registry.resolve_by_xid(&xid, false).unwrap();
    assert!(server.registry.xa_recover().unwrap().is_empty());
    insert(&mut session, &table, &[(7, "again")]).unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![7]);
}
