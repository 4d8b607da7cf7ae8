#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use tablekit::definition::{ColumnKind, ColumnSpec, IndexSpec, SchemaDefinition, TableDefinition, TableIdentifier};
use tablekit::field::Value;
use tablekit::heap::{self, HeapEngine};
use tablekit::row::RowBuffer;
use tablekit::tablespace::{self, TablespaceEngine};
use tablekit::warnings::Warnings;
use tablekit::{Config, Cursor, EngineRegistry, Session};

pub const SCHEMA: &str = "test";

pub struct Server {
    pub registry: Arc<EngineRegistry>,
    pub tablespace: Arc<TablespaceEngine>,
}

/// A registry over `dir` with the tablespace and heap engines, started
/// and holding the `test` schema.
pub fn start(dir: &Path) -> Server {
    start_with(Config::with_data_dir(dir).lock_wait_timeout_ms(200))
}

pub fn start_with(config: Config) -> Server {
    let registry = EngineRegistry::new(config);
    let tablespace = Arc::new(TablespaceEngine::new(tablespace::ENGINE_NAME, registry.config()));
    registry.add(tablespace.clone()).unwrap();
    registry.add(Arc::new(HeapEngine::new(heap::ENGINE_NAME))).unwrap();
    registry.init().unwrap();
    if registry.get_schema(SCHEMA).is_err() {
        registry.create_schema(&SchemaDefinition::new(SCHEMA)).unwrap();
    }
    Server {
        registry: Arc::new(registry),
        tablespace,
    }
}

pub fn id(table: &str) -> TableIdentifier {
    TableIdentifier::new(SCHEMA, table).unwrap()
}

/// `(id INT NOT NULL PRIMARY KEY, name VARCHAR(16), KEY name (name))`.
pub fn people(engine: &str) -> TableDefinition {
    TableDefinition::new(SCHEMA, "people")
        .engine(engine)
        .column(ColumnSpec::new("id", ColumnKind::Int { unsigned: false }).not_null())
        .column(ColumnSpec::new("name", ColumnKind::Varchar { length: 16 }).not_null())
        .index(IndexSpec::primary(&["id"]))
        .index(IndexSpec::index("name", &["name"]))
}

pub fn person(cursor: &dyn Cursor, id: i64, name: &str) -> RowBuffer {
    cursor
        .table()
        .fields
        .build_row(
            &["id", "name"],
            &[Value::Int(id), Value::Bytes(name.as_bytes().to_vec())],
            &mut Warnings::default(),
        )
        .unwrap()
}

/// Every row of the table in primary key order, or insertion order for a
/// table without one.
pub fn scan(cursor: &mut dyn Cursor) -> Vec<Vec<Value>> {
    let table = cursor.table().clone();
    let fields = &table.fields;
    let mut row = fields.new_row();
    let mut rows = Vec::new();
    cursor.rnd_init().unwrap();
    while cursor.rnd_next(&mut row).unwrap() {
        rows.push(fields.values(&row));
    }
    rows
}

pub fn ids(cursor: &mut dyn Cursor) -> Vec<i64> {
    scan(cursor)
        .into_iter()
        .map(|r| r[0].as_i64().unwrap())
        .collect()
}

/// Runs `f` as one statement of `session` and ends it with the outcome.
pub fn statement<T>(
    session: &mut Session,
    table: &TableIdentifier,
    f: impl FnOnce(&mut dyn Cursor) -> tablekit::Result<T>,
) -> tablekit::Result<T> {
    session.start_statement().unwrap();
    let outcome = session.open_table(table).and_then(|mut cursor| {
        let result = f(cursor.as_mut());
        cursor.close()?;
        result
    });
    session.end_statement(outcome)
}

pub fn insert(session: &mut Session, table: &TableIdentifier, rows: &[(i64, &str)]) -> tablekit::Result<()> {
    statement(session, table, |cursor| {
        for (id, name) in rows {
            let mut row = person(cursor, *id, name);
            cursor.write_row(&mut row)?;
        }
        Ok(())
    })
}

pub fn select_ids(session: &mut Session, table: &TableIdentifier) -> Vec<i64> {
    statement(session, table, |cursor| Ok(ids(cursor))).unwrap()
}
