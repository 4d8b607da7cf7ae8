mod common;

use common::*;
use tablekit::definition::{ColumnKind, ColumnSpec, IndexSpec, TableDefinition};
use tablekit::field::Value;
use tablekit::row::RowBuffer;
use tablekit::tablespace;
use tablekit::warnings::Warnings;
use tablekit::{Cursor, Session};
use tempfile::TempDir;

fn items() -> TableDefinition {
    TableDefinition::new(SCHEMA, "items")
        .engine(tablespace::ENGINE_NAME)
        .column(
            ColumnSpec::new("id", ColumnKind::BigInt { unsigned: true })
                .not_null()
                .auto_increment(),
        )
        .column(ColumnSpec::new("name", ColumnKind::Varchar { length: 16 }))
        .index(IndexSpec::primary(&["id"]))
}

fn item(cursor: &dyn Cursor, id: Option<u64>, name: &str) -> RowBuffer {
    let fields = &cursor.table().fields;
    let name = Value::Bytes(name.as_bytes().to_vec());
    let mut warnings = Warnings::default();
    match id {
        Some(id) => fields.build_row(&["id", "name"], &[Value::UInt(id), name], &mut warnings),
        None => fields.build_row(&["name"], &[name], &mut warnings),
    }
    .unwrap()
}

fn add(session: &mut Session, rows: &[(Option<u64>, &str)]) {
    let table = id("items");
    statement(session, &table, |cursor| {
        for (id, name) in rows {
            let mut row = item(cursor, *id, name);
            cursor.write_row(&mut row)?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_bulk_insert_reserves_one_block() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("items");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, items()).unwrap();

    let acquisitions = statement(&mut session, &table, |cursor| {
        cursor.start_bulk_insert(3)?;
        for name in ["a", "b", "c"] {
            let mut row = item(cursor, None, name);
            cursor.write_row(&mut row)?;
        }
        cursor.end_bulk_insert()?;
        server.tablespace.autoinc_acquisitions(&cursor.table().identifier)
    })
    .unwrap();
    assert_eq!(acquisitions, 1);
    assert_eq!(select_ids(&mut session, &table), vec![1, 2, 3]);
}

#[test]
fn test_explicit_value_moves_counter() {
    let dir = TempDir::new().unwrap();
    let table = id("items");
    {
        let server = start(dir.path());
        let mut session = Session::open(server.registry.clone());
        session.create_table(&table, items()).unwrap();
        add(&mut session, &[(None, "a"), (Some(100), "b"), (None, "c"), (Some(50), "d"), (None, "e")]);
        assert_eq!(select_ids(&mut session, &table), vec![1, 50, 100, 101, 102]);
        session.close().unwrap();
    }

    let server = start(dir.path());
    let mut session = Session::open(server.registry.clone());
    add(&mut session, &[(None, "f")]);
    assert_eq!(select_ids(&mut session, &table), vec![1, 50, 100, 101, 102, 103]);
}

#[test]
fn test_unused_reservation_is_not_reused() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("items");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, items()).unwrap();

    statement(&mut session, &table, |cursor| {
        cursor.start_bulk_insert(5)?;
        for name in ["a", "b"] {
            let mut row = item(cursor, None, name);
            cursor.write_row(&mut row)?;
        }
        cursor.end_bulk_insert()
    })
    .unwrap();
    add(&mut session, &[(None, "c")]);
    assert_eq!(select_ids(&mut session, &table), vec![1, 2, 6]);
}

#[test]
fn test_rolled_back_values_are_not_reused() {
    let dir = TempDir::new().unwrap();
    let server = start(dir.path());
    let table = id("items");
    let mut session = Session::open(server.registry.clone());
    session.create_table(&table, items()).unwrap();

    session.begin(Default::default()).unwrap();
    add(&mut session, &[(None, "a"), (None, "b")]);
    session.rollback().unwrap();
    add(&mut session, &[(None, "c")]);
    assert_eq!(select_ids(&mut session, &table), vec![3]);
}
