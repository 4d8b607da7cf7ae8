mod common;

use common::*;
use std::thread;
use std::time::Duration;
use tablekit::errors::Error;
use tablekit::tablespace;
use tablekit::transaction::StartOptions;
use tablekit::{Config, Session};
use tempfile::TempDir;

#[test]
fn test_autocommit_statements_are_durable() {
    let dir = TempDir::new().unwrap();
    let table = id("people");
    {
        let server = start(dir.path());
        let mut session = Session::open(server.registry.clone());
        session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();
        insert(&mut session, &table, &[(2, "bo"), (1, "al")]).unwrap();
        session.close().unwrap();
    }

    let server = start(dir.path());
    let mut session = Session::open(server.registry.clone());
    assert_eq!(select_ids(&mut session, &table), vec![1, 2]);
}

#[test]
fn test_savepoints() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &table, &[(1, "a")]).unwrap();
    session.set_savepoint("a").unwrap();
    insert(&mut session, &table, &[(2, "b")]).unwrap();
    session.set_savepoint("b").unwrap();
    insert(&mut session, &table, &[(3, "c")]).unwrap();

    session.rollback_to_savepoint("a").unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![1]);
    assert!(matches!(session.rollback_to_savepoint("b"), Err(Error::Transaction(_))));

    insert(&mut session, &table, &[(4, "d")]).unwrap();
    session.release_savepoint("a").unwrap();
    assert!(session.rollback_to_savepoint("a").is_err());
    session.commit().unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![1, 4]);

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &table, &[(5, "e")]).unwrap();
    session.rollback().unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![1, 4]);
}

#[test]
fn test_failed_statement_keeps_earlier_work() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &table, &[(1, "a")]).unwrap();
    let err = insert(&mut session, &table, &[(2, "b"), (1, "dup")]).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    session.commit().unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![1]);
}

#[test]
fn test_kill_rolls_back_transaction() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &table, &[(1, "a")]).unwrap();
    session.kill_handle().kill();
    let err = insert(&mut session, &table, &[(2, "b")]).unwrap_err();
    assert!(matches!(err, Error::Killed(_)));
    assert!(!session.in_transaction());
    assert!(select_ids(&mut session, &table).is_empty());
}

#[test]
fn test_lock_wait_timeout_fails_only_the_statement() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut first = Session::open(server.registry.clone());
    let mut second = Session::open(server.registry.clone());
    first.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    first.begin(StartOptions::default()).unwrap();
    insert(&mut first, &table, &[(1, "a")]).unwrap();

    second.begin(StartOptions::default()).unwrap();
    insert(&mut second, &table, &[(2, "b")]).unwrap();
    let err = insert(&mut second, &table, &[(1, "x")]).unwrap_err();
    assert!(matches!(err, Error::LockWaitTimeout(_)));
    assert!(second.in_transaction());

    first.commit().unwrap();
    second.commit().unwrap();
    assert_eq!(select_ids(&mut first, &table), vec![1, 2]);
}

#[test]
fn test_deadlock_rolls_back_requester() {
    let dir = TempDir::new().unwrap();
    let server = start_with(Config::with_data_dir(dir.path()).lock_wait_timeout_ms(5000));
    let table = id("people");
    let mut first = Session::open(server.registry.clone());
    let mut second = Session::open(server.registry.clone());
    first.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    first.begin(StartOptions::default()).unwrap();
    insert(&mut first, &table, &[(1, "a")]).unwrap();
    second.begin(StartOptions::default()).unwrap();
    insert(&mut second, &table, &[(2, "b")]).unwrap();

    let waiter = {
        let table = table.clone();
        thread::spawn(move || {
            let result = insert(&mut first, &table, &[(3, "c"), (2, "c")]);
            (first, result)
        })
    };
    thread::sleep(Duration::from_millis(200));
    let err = insert(&mut second, &table, &[(1, "x")]).unwrap_err();
    assert!(matches!(err, Error::Deadlock(_)));
    assert!(!second.in_transaction());

    let (mut first, result) = waiter.join().unwrap();
    result.unwrap();
    first.commit().unwrap();
    assert_eq!(select_ids(&mut first, &table), vec![1, 2, 3]);
}

#[test]
fn test_dropped_session_rolls_back_and_releases_locks() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut admin = Session::open(server.registry.clone());
    admin.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();

    {
        let mut abandoned = Session::open(server.registry.clone());
        abandoned.begin(StartOptions::default()).unwrap();
        insert(&mut abandoned, &table, &[(1, "a")]).unwrap();
    }

    let mut other = Session::open(server.registry.clone());
    insert(&mut other, &table, &[(1, "b")]).unwrap();
    let rows = statement(&mut other, &table, |cursor| Ok(scan(cursor))).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], tablekit::field::Value::Bytes(b"b".to_vec()));
}
