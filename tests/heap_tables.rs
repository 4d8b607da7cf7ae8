mod common;

use common::*;
use tablekit::definition::{ColumnKind, ColumnSpec, IndexSpec, TableDefinition};
use tablekit::errors::Error;
use tablekit::heap;
use tablekit::tablespace;
use tablekit::transaction::StartOptions;
use tablekit::Session;
use tempfile::TempDir;

#[test]
fn test_temporary_table_shadows_durable_table() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut owner = Session::open(server.registry.clone());
    let mut other = Session::open(server.registry.clone());
    owner.create_table(&table, people(tablespace::ENGINE_NAME)).unwrap();
    insert(&mut owner, &table, &[(1, "durable")]).unwrap();

    let temporary = owner.create_temporary_table(people(heap::ENGINE_NAME)).unwrap();
    assert!(temporary.is_temporary());
    insert(&mut owner, &table, &[(7, "temp"), (8, "temp")]).unwrap();

    assert_eq!(select_ids(&mut owner, &table), vec![7, 8]);
    assert_eq!(select_ids(&mut other, &table), vec![1]);
    assert_eq!(server.registry.table_names(SCHEMA).unwrap(), vec!["people"]);

    owner.close().unwrap();
    assert!(!server.registry.does_table_exist(&temporary));
    assert_eq!(select_ids(&mut other, &table), vec![1]);
}

#[test]
fn test_heap_writes_ignore_rollback() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("people");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, people(heap::ENGINE_NAME)).unwrap();

    session.begin(StartOptions::default()).unwrap();
    insert(&mut session, &table, &[(2, "b"), (1, "a")]).unwrap();
    session.rollback().unwrap();
    assert_eq!(select_ids(&mut session, &table), vec![1, 2]);

    let err = insert(&mut session, &table, &[(3, "c"), (1, "dup")]).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(select_ids(&mut session, &table), vec![1, 2, 3]);
}

#[test]
fn test_heap_tables_are_gone_after_restart() {
    let dir = TempDir::new().unwrap();
    let table = id("people");
    {
        let server = start(dir.path());
        let mut session = Session::open(server.registry.clone());
        session.create_table(&table, people(heap::ENGINE_NAME)).unwrap();
        insert(&mut session, &table, &[(1, "a")]).unwrap();
        session.close().unwrap();
    }

    let server = start(dir.path());
    assert!(!server.registry.does_table_exist(&table));
    assert!(!table.definition_path(dir.path()).exists());
}

#[test]
fn test_capability_checks() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let mut session = Session::open(server.registry.clone());

    let keyless = TableDefinition::new(SCHEMA, "keyless")
        .engine(heap::ENGINE_NAME)
        .column(ColumnSpec::new("body", ColumnKind::Varchar { length: 8 }));
    assert!(matches!(
        session.create_table(&id("keyless"), keyless),
        Err(Error::Unsupported(_))
    ));

    let nullable_key = TableDefinition::new(SCHEMA, "nullable")
        .engine(heap::ENGINE_NAME)
        .column(ColumnSpec::new("id", ColumnKind::Int { unsigned: false }).not_null())
        .column(ColumnSpec::new("code", ColumnKind::Int { unsigned: false }))
        .index(IndexSpec::primary(&["id"]))
        .index(IndexSpec::unique("code", &["code"]));
    assert!(matches!(
        session.create_table(&id("nullable"), nullable_key),
        Err(Error::Unsupported(_))
    ));

    let prefixed = people(heap::ENGINE_NAME).index(IndexSpec::index("short", &["name"]).prefix("name", 2));
    assert!(matches!(
        session.create_table(&id("people"), prefixed),
        Err(Error::Unsupported(_))
    ));

    assert!(matches!(
        session.create_temporary_table(people(tablespace::ENGINE_NAME)),
        Err(Error::Unsupported(_))
    ));
    assert!(server.registry.table_names(SCHEMA).unwrap().is_empty());
}
