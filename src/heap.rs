//! In-memory engine without transactions. Rows live in packed form for the
//! lifetime of the process; indexes are answered by scanning every row and
//! comparing key images with each column's collation. Table scans follow
//! the primary key.

use crate::definition::{TableDefinition, TableIdentifier};
use crate::encoding::{pack_row, unpack_row};
use crate::engine::{Capabilities, Cursor, FindFlag, OpenTable, StorageEngine};
use crate::errors::Result;
use crate::key::{key_cmp, key_copy, KeyInfo};
use crate::row::{FieldSet, RowBuffer};
use crate::transaction::{StartOptions, TransactionContext};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub const ENGINE_NAME: &str = "heap";

const CAPABILITIES: Capabilities = Capabilities::REQUIRES_PRIMARY_KEY
    .union(Capabilities::NO_PREFIX_CHAR_KEYS)
    .union(Capabilities::TEMPORARY_TABLES);

#[derive(Debug)]
struct HeapTable {
    definition: TableDefinition,
    rows: BTreeMap<u64, Vec<u8>>,
    next_id: u64,
}

impl HeapTable {
    fn new(definition: TableDefinition) -> Self {
        HeapTable {
            definition,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, packed: Vec<u8>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.rows.insert(id, packed);
        id
    }
}

type SharedTable = Arc<Mutex<HeapTable>>;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct HeapEngine {
    name: String,
    tables: Mutex<HashMap<String, SharedTable>>,
}

impl HeapEngine {
    pub fn new(name: &str) -> Self {
        HeapEngine {
            name: name.to_string(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self, identifier: &TableIdentifier) -> Result<SharedTable> {
        guard(&self.tables)
            .get(&identifier.cache_key())
            .cloned()
            .ok_or_else(|| err!(NotFound, "Table '{}' doesn't exist in engine '{}'", identifier, self.name))
    }
}

/// First unique key on which `row` collides with a stored
/// row other than `except`.
fn duplicate_key(
    keys: &[KeyInfo],
    fields: &FieldSet,
    rows: &BTreeMap<u64, Vec<u8>>,
    row: &RowBuffer,
    except: Option<u64>,
) -> Result<Option<String>> {
    for key in keys.iter().filter(|k| k.unique) {
        let mut image = Vec::with_capacity(key.key_length);
        key_copy(key, fields, row, &mut image);
        for (id, packed) in rows {
            if Some(*id) == except {
                continue;
            }
            let other = unpack_row(fields, packed)?;
            let mut other_image = Vec::with_capacity(key.key_length);
            key_copy(key, fields, &other, &mut other_image);
            if key_cmp(key, fields, &image, &other_image) == Ordering::Equal {
                return Ok(Some(key.name.clone()));
            }
        }
    }
    Ok(None)
}

/// Rebuilds each stored row under `to`, matching columns by name. Columns
/// new to the table take their default.
fn convert_rows(from: &TableDefinition, to: &TableDefinition, rows: &BTreeMap<u64, Vec<u8>>) -> Result<BTreeMap<u64, Vec<u8>>> {
    let old_fields = FieldSet::new(from)?;
    let new_fields = FieldSet::new(to)?;
    let keys = to
        .indexes
        .iter()
        .map(|spec| KeyInfo::from_spec(spec, &new_fields))
        .collect::<Result<Vec<_>>>()?;
    let mut converted = BTreeMap::new();
    for (id, packed) in rows {
        let old = unpack_row(&old_fields, packed)?;
        let mut row = new_fields.new_row();
        for field in new_fields.iter() {
            if let Some(source) = old_fields.find(field.name()) {
                field.store(&mut row, &source.value(&old))?;
            }
        }
        if let Some(index) = duplicate_key(&keys, &new_fields, &converted, &row, None)? {
            return Err(err!(AlreadyExists, "Duplicate entry for key '{}' in '{}'", index, to.name));
        }
        converted.insert(*id, pack_row(&new_fields, &row));
    }
    Ok(converted)
}

impl StorageEngine for HeapEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn shutdown(&self) -> Result<()> {
        let mut tables = guard(&self.tables);
        info!(engine = %self.name, tables = tables.len(), "Discarding in-memory tables");
        tables.clear();
        Ok(())
    }

    fn create_table(&self, _trx: &TransactionContext, identifier: &TableIdentifier, definition: &TableDefinition) -> Result<()> {
        let mut tables = guard(&self.tables);
        let key = identifier.cache_key();
        if tables.contains_key(&key) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", identifier));
        }
        tables.insert(key, Arc::new(Mutex::new(HeapTable::new(definition.clone()))));
        debug!(table = %identifier, engine = %self.name, "Created heap table");
        Ok(())
    }

    fn drop_table(&self, _trx: &TransactionContext, identifier: &TableIdentifier) -> Result<()> {
        guard(&self.tables)
            .remove(&identifier.cache_key())
            .map(|_| ())
            .ok_or_else(|| err!(NotFound, "Table '{}' doesn't exist", identifier))
    }

    fn rename_table(&self, _trx: &TransactionContext, from: &TableIdentifier, to: &TableIdentifier) -> Result<()> {
        let mut tables = guard(&self.tables);
        if tables.contains_key(&to.cache_key()) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", to));
        }
        let table = tables
            .remove(&from.cache_key())
            .ok_or_else(|| err!(NotFound, "Table '{}' doesn't exist", from))?;
        {
            let mut data = guard(&table);
            data.definition = data.definition.renamed(to);
        }
        tables.insert(to.cache_key(), table);
        Ok(())
    }

    fn alter_table(
        &self,
        _trx: &TransactionContext,
        identifier: &TableIdentifier,
        from: &TableDefinition,
        to: &TableDefinition,
    ) -> Result<()> {
        let table = self.table(identifier)?;
        let mut data = guard(&table);
        let rows = convert_rows(from, to, &data.rows)?;
        debug!(table = %identifier, rows = rows.len(), "Rebuilt heap table");
        data.rows = rows;
        data.definition = to.clone();
        Ok(())
    }

    fn does_table_exist(&self, identifier: &TableIdentifier) -> bool {
        guard(&self.tables).contains_key(&identifier.cache_key())
    }

    fn get_table_definition(&self, identifier: &TableIdentifier) -> Result<Option<TableDefinition>> {
        let tables = guard(&self.tables);
        Ok(tables
            .get(&identifier.cache_key())
            .map(|t| guard(t).definition.clone()))
    }

    fn table_names(&self, schema: &str) -> Result<Vec<String>> {
        let tables = guard(&self.tables);
        let mut names: Vec<String> = tables
            .values()
            .filter_map(|t| {
                let data = guard(t);
                let def = &data.definition;
                (def.schema == schema && !def.is_temporary()).then(|| def.name.clone())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn drop_schema(&self, name: &str) -> Result<()> {
        guard(&self.tables).retain(|_, t| {
            let data = guard(t);
            data.definition.schema != name || data.definition.is_temporary()
        });
        Ok(())
    }

    fn start_transaction(&self, _trx: &TransactionContext, _options: &StartOptions) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _trx: &TransactionContext, _all: bool) -> Result<()> {
        Ok(())
    }

    fn rollback(&self, _trx: &TransactionContext, _all: bool) -> Result<()> {
        Ok(())
    }

    fn create_cursor(&self, table: Arc<OpenTable>, trx: Arc<TransactionContext>) -> Result<Box<dyn Cursor>> {
        let data = self.table(&table.identifier)?;
        Ok(Box::new(HeapCursor::new(table, data, trx)))
    }
}

pub struct HeapCursor {
    table: Arc<OpenTable>,
    data: SharedTable,
    trx: Arc<TransactionContext>,
    /// Row id of the current row.
    current: Option<u64>,
    index: Option<usize>,
    /// Rows of the active index in key order, snapshot at positioning.
    order: Vec<(Vec<u8>, u64)>,
    next: usize,
    prefix: Option<Vec<u8>>,
    /// Row ids in primary key order, snapshot by `rnd_init`.
    scan: Vec<u64>,
    scan_next: usize,
}

impl HeapCursor {
    fn new(table: Arc<OpenTable>, data: SharedTable, trx: Arc<TransactionContext>) -> Self {
        HeapCursor {
            table,
            data,
            trx,
            current: None,
            index: None,
            order: Vec::new(),
            next: 0,
            prefix: None,
            scan: Vec::new(),
            scan_next: 0,
        }
    }

    fn load(&mut self, id: u64, packed: &[u8], row: &mut RowBuffer) -> Result<bool> {
        *row = unpack_row(&self.table.fields, packed)?;
        self.current = Some(id);
        Ok(true)
    }

    /// Key images of every row under index `index`, in key order.
    fn ordered(&self, index: usize) -> Result<Vec<(Vec<u8>, u64)>> {
        let key = self.table.key(index)?;
        let fields = &self.table.fields;
        let mut order = Vec::new();
        for (id, packed) in guard(&self.data).rows.iter() {
            let row = unpack_row(fields, packed)?;
            let mut image = Vec::with_capacity(key.key_length);
            key_copy(key, fields, &row, &mut image);
            order.push((image, *id));
        }
        order.sort_by(|a, b| key_cmp(key, fields, &a.0, &b.0).then(a.1.cmp(&b.1)));
        Ok(order)
    }

    /// Sorts every row by the active index.
    fn sort(&mut self) -> Result<()> {
        let index = self
            .index
            .ok_or_else(|| err!(Engine, "No index initialized on '{}'", self.table.identifier))?;
        self.order = self.ordered(index)?;
        self.next = 0;
        Ok(())
    }

    fn primary_index(&self) -> Result<usize> {
        self.table
            .keys
            .iter()
            .position(|k| k.primary)
            .ok_or_else(|| err!(Schema, "Table '{}' has no primary key", self.table.identifier))
    }

    fn step(&mut self, row: &mut RowBuffer) -> Result<bool> {
        let Some((image, id)) = self.order.get(self.next).cloned() else {
            return Ok(false);
        };
        if let (Some(prefix), Some(index)) = (&self.prefix, self.index) {
            let key = self.table.key(index)?;
            if key_cmp(key, &self.table.fields, prefix, &image) != Ordering::Equal {
                return Ok(false);
            }
        }
        self.next += 1;
        let packed = guard(&self.data).rows.get(&id).cloned();
        match packed {
            Some(packed) => self.load(id, &packed, row),
            // Deleted since the scan was positioned.
            None => self.step(row),
        }
    }

    /// Row id of the stored row whose primary key equals `row`'s.
    fn locate(&self, row: &RowBuffer) -> Result<u64> {
        let fields = &self.table.fields;
        let key = self.table.key(self.primary_index()?)?;
        let mut image = Vec::with_capacity(key.key_length);
        key_copy(key, fields, row, &mut image);
        let data = guard(&self.data);
        if let Some(id) = self.current {
            if let Some(packed) = data.rows.get(&id) {
                let mut current = Vec::with_capacity(key.key_length);
                key_copy(key, fields, &unpack_row(fields, packed)?, &mut current);
                if key_cmp(key, fields, &image, &current) == Ordering::Equal {
                    return Ok(id);
                }
            }
        }
        for (id, packed) in data.rows.iter() {
            let mut other = Vec::with_capacity(key.key_length);
            key_copy(key, fields, &unpack_row(fields, packed)?, &mut other);
            if key_cmp(key, fields, &image, &other) == Ordering::Equal {
                return Ok(*id);
            }
        }
        Err(err!(NotFound, "Row not found in '{}'", self.table.identifier))
    }
}

impl Cursor for HeapCursor {
    fn table(&self) -> &Arc<OpenTable> {
        &self.table
    }

    fn rnd_init(&mut self) -> Result<()> {
        self.current = None;
        self.index = None;
        let primary = self.primary_index()?;
        self.scan = self.ordered(primary)?.into_iter().map(|(_, id)| id).collect();
        self.scan_next = 0;
        Ok(())
    }

    fn rnd_next(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        while let Some(&id) = self.scan.get(self.scan_next) {
            self.scan_next += 1;
            let packed = guard(&self.data).rows.get(&id).cloned();
            // Rows deleted since `rnd_init` are skipped.
            if let Some(packed) = packed {
                return self.load(id, &packed, row);
            }
        }
        Ok(false)
    }

    fn position(&self) -> Result<Vec<u8>> {
        self.current
            .map(|id| id.to_be_bytes().to_vec())
            .ok_or_else(|| err!(Engine, "No current row in '{}'", self.table.identifier))
    }

    fn rnd_pos(&mut self, row: &mut RowBuffer, position: &[u8]) -> Result<bool> {
        self.trx.check_killed()?;
        let bytes: [u8; 8] = position
            .try_into()
            .map_err(|_| err!(Encoding, "Invalid row position for '{}'", self.table.identifier))?;
        let id = u64::from_be_bytes(bytes);
        let packed = guard(&self.data).rows.get(&id).cloned();
        match packed {
            Some(packed) => self.load(id, &packed, row),
            None => Ok(false),
        }
    }

    fn index_init(&mut self, index: usize) -> Result<()> {
        self.table.key(index)?;
        self.index = Some(index);
        self.order.clear();
        self.prefix = None;
        Ok(())
    }

    fn index_read(&mut self, row: &mut RowBuffer, key: &[u8], flag: FindFlag) -> Result<bool> {
        self.trx.check_killed()?;
        self.sort()?;
        self.prefix = None;
        let index = self.index.unwrap_or_default();
        let info = self.table.key(index)?;
        let fields = &self.table.fields;
        let start = self.order.iter().position(|(image, _)| {
            let ord = key_cmp(info, fields, &image[..key.len().min(image.len())], key);
            match flag {
                FindFlag::After => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        });
        let Some(start) = start else {
            self.next = self.order.len();
            return Ok(false);
        };
        self.next = start;
        if matches!(flag, FindFlag::Exact | FindFlag::Prefix) {
            let image = &self.order[start].0;
            if key_cmp(info, fields, key, image) != Ordering::Equal {
                return Ok(false);
            }
        }
        if flag == FindFlag::Prefix {
            self.prefix = Some(key.to_vec());
        }
        self.step(row)
    }

    fn index_first(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        self.sort()?;
        self.prefix = None;
        self.step(row)
    }

    fn index_next(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        self.step(row)
    }

    fn index_end(&mut self) -> Result<()> {
        self.index = None;
        self.order.clear();
        self.prefix = None;
        Ok(())
    }

    fn write_row(&mut self, row: &mut RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        let mut data = guard(&self.data);
        if let Some(index) = duplicate_key(&self.table.keys, &self.table.fields, &data.rows, row, None)? {
            return Err(err!(AlreadyExists, "Duplicate entry for key '{}' in '{}'", index, self.table.identifier));
        }
        let id = data.insert(pack_row(&self.table.fields, row));
        self.current = Some(id);
        Ok(())
    }

    fn update_row(&mut self, old: &RowBuffer, new: &mut RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        let id = self.locate(old)?;
        let mut data = guard(&self.data);
        if let Some(index) = duplicate_key(&self.table.keys, &self.table.fields, &data.rows, new, Some(id))? {
            return Err(err!(AlreadyExists, "Duplicate entry for key '{}' in '{}'", index, self.table.identifier));
        }
        data.rows.insert(id, pack_row(&self.table.fields, new));
        self.current = Some(id);
        Ok(())
    }

    fn delete_row(&mut self, row: &RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        let id = self.locate(row)?;
        guard(&self.data).rows.remove(&id);
        Ok(())
    }

    fn records(&mut self) -> Result<u64> {
        Ok(guard(&self.data).rows.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.index_end()?;
        self.current = None;
        Ok(())
    }
}
