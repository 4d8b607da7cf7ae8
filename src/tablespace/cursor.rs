use super::keys;
use super::share::TableShare;
use super::template::Template;
use super::translate::IndexTranslation;
use super::Inner;
use crate::autoinc::Reservation;
use crate::engine::{Cursor, FindFlag, OpenTable};
use crate::errors::Result;
use crate::field::Value;
use crate::key::{key_restore, KeyInfo};
use crate::row::RowBuffer;
use crate::transaction::TransactionContext;
use std::ops::Bound;
use std::sync::Arc;
use tracing::trace;

/// One index entry as a scan sees it.
struct Entry {
    /// Key in the scanned index.
    key: Vec<u8>,
    clustered: Vec<u8>,
    record: Vec<u8>,
}

pub struct TablespaceCursor {
    inner: Arc<Inner>,
    table: Arc<OpenTable>,
    share: Arc<TableShare>,
    trx: Arc<TransactionContext>,
    read: Template,
    translation: Option<IndexTranslation>,
    /// Declared index in use and its native number.
    active: Option<(usize, usize)>,
    /// Key of the last entry returned by the running scan.
    last: Option<Vec<u8>>,
    /// Set by a prefix read: the scan ends where entries stop matching.
    bound: Option<Vec<u8>>,
    /// Clustered key of the current row.
    current: Option<Vec<u8>>,
    reservation: Reservation,
    bulk_rows: usize,
}

impl TablespaceCursor {
    pub(crate) fn new(
        inner: Arc<Inner>,
        table: Arc<OpenTable>,
        share: Arc<TableShare>,
        trx: Arc<TransactionContext>,
    ) -> Self {
        let read = Template::build(&table.fields, None);
        TablespaceCursor {
            inner,
            table,
            share,
            trx,
            read,
            translation: None,
            active: None,
            last: None,
            bound: None,
            current: None,
            reservation: Reservation::empty(),
            bulk_rows: 0,
        }
    }

    fn native_index(&mut self, index: usize) -> Result<usize> {
        let stale = match &self.translation {
            Some(t) => !t.is_current(&self.table),
            None => true,
        };
        if stale {
            self.translation = Some(IndexTranslation::build(&self.table, &self.share.catalog)?);
        }
        self.translation
            .as_ref()
            .and_then(|t| t.native(index))
            .ok_or_else(|| err!(NotFound, "Index {} doesn't exist in '{}'", index, self.table.identifier))
    }

    /// First entry of native index `native` after `from`, skipping entries
    /// that start with `skip`.
    fn fetch(&self, native: usize, from: Bound<Vec<u8>>, skip: Option<&[u8]>) -> Result<Option<Entry>> {
        let data = self.share.data();
        if native == 0 {
            let found = data
                .rows
                .range((from, Bound::Unbounded))
                .find(|(k, _)| skip.map_or(true, |s| !k.starts_with(s)));
            return Ok(found.map(|(k, v)| Entry {
                key: k.clone(),
                clustered: k.clone(),
                record: v.clone(),
            }));
        }
        let index = data
            .secondaries
            .get(native - 1)
            .ok_or_else(|| err!(Corrupt, "Secondary index {} missing in '{}'", native, self.table.identifier))?;
        let found = index
            .range((from, Bound::Unbounded))
            .find(|(k, _)| skip.map_or(true, |s| !k.starts_with(s)));
        match found {
            None => Ok(None),
            Some((key, clustered)) => {
                let record = data
                    .rows
                    .get(clustered)
                    .ok_or_else(|| err!(Corrupt, "Index entry of '{}' points at no row", self.table.identifier))?;
                Ok(Some(Entry {
                    key: key.clone(),
                    clustered: clustered.clone(),
                    record: record.clone(),
                }))
            }
        }
    }

    /// Decodes `entry` into `row` and makes it the scan position.
    fn deliver(&mut self, entry: Option<Entry>, row: &mut RowBuffer) -> Result<bool> {
        let Some(entry) = entry else {
            return Ok(false);
        };
        if let Some(bound) = &self.bound {
            if !entry.key.starts_with(bound) {
                return Ok(false);
            }
        }
        self.read.decode(&self.table.fields, &entry.record, row)?;
        self.last = Some(entry.key);
        self.current = Some(entry.clustered);
        Ok(true)
    }

    fn active(&self) -> Result<(usize, usize)> {
        self.active
            .ok_or_else(|| err!(Engine, "No index initialized on '{}'", self.table.identifier))
    }

    fn clustered_key(&self, row: &RowBuffer) -> Result<Vec<u8>> {
        if self.share.catalog.has_hidden_key() {
            return self
                .current
                .clone()
                .ok_or_else(|| err!(Engine, "No current row in '{}'", self.table.identifier));
        }
        Ok(keys::full_key(self.share.catalog.clustered(), &self.table.fields, row))
    }

    /// Fills an auto-increment column left NULL or 0 from the cursor's
    /// reserved block, and moves the counter past explicit values.
    fn assign_auto_increment(&mut self, row: &mut RowBuffer) -> Result<()> {
        let Some(position) = self.table.fields.auto_increment_field() else {
            return Ok(());
        };
        let field = self.table.fields.field(position);
        let value = field.value(row);
        let generate = value.is_null() || value.as_i64() == Some(0);
        if !generate {
            if let Some(explicit) = value.as_u64() {
                self.share.autoinc.observe(explicit);
                self.reservation.discard_below(explicit);
            }
            return Ok(());
        }
        let next = match self.reservation.take() {
            Some(next) => next,
            None => {
                self.reservation = self.share.autoinc.reserve(self.bulk_rows.max(1) as u64);
                self.reservation
                    .take()
                    .ok_or_else(|| err!(Engine, "Auto-increment counter of '{}' exhausted", self.table.identifier))?
            }
        };
        field.set_notnull(row);
        let status = field.store(row, &Value::UInt(next))?;
        if status.is_warning() {
            return Err(err!(Engine, "Failed to read auto-increment value from storage engine"));
        }
        trace!(table = %self.table.identifier, value = next, "Generated auto-increment value");
        Ok(())
    }

    fn duplicate(&self, index: String) -> crate::errors::Error {
        err!(AlreadyExists, "Duplicate entry for key '{}' in '{}'", index, self.table.identifier)
    }
}

/// How many leading parts a key image covers.
fn covered_parts(key: &KeyInfo, image: &[u8]) -> Result<usize> {
    let mut used = 0;
    let mut parts = 0;
    for part in &key.parts {
        if used + part.store_length > image.len() {
            break;
        }
        used += part.store_length;
        parts += 1;
    }
    if used != image.len() {
        return Err(err!(Encoding, "Key image for '{}' cut inside a part", key.name));
    }
    Ok(parts)
}

impl Cursor for TablespaceCursor {
    fn table(&self) -> &Arc<OpenTable> {
        &self.table
    }

    fn rnd_init(&mut self) -> Result<()> {
        self.active = None;
        self.last = None;
        self.bound = None;
        Ok(())
    }

    fn rnd_next(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        let from = self.last.clone().map_or(Bound::Unbounded, Bound::Excluded);
        let entry = self.fetch(0, from, None)?;
        self.deliver(entry, row)
    }

    fn position(&self) -> Result<Vec<u8>> {
        self.current
            .clone()
            .ok_or_else(|| err!(Engine, "No current row in '{}'", self.table.identifier))
    }

    fn rnd_pos(&mut self, row: &mut RowBuffer, position: &[u8]) -> Result<bool> {
        self.trx.check_killed()?;
        let record = self.share.data().rows.get(position).cloned();
        match record {
            Some(record) => {
                self.read.decode(&self.table.fields, &record, row)?;
                self.current = Some(position.to_vec());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn index_init(&mut self, index: usize) -> Result<()> {
        let native = self.native_index(index)?;
        self.active = Some((index, native));
        self.last = None;
        self.bound = None;
        Ok(())
    }

    fn index_read(&mut self, row: &mut RowBuffer, key: &[u8], flag: FindFlag) -> Result<bool> {
        self.trx.check_killed()?;
        let (index, native) = self.active()?;
        let info = self.table.key(index)?;
        let parts = covered_parts(info, key)?;
        let mut scratch = self.table.fields.new_row();
        key_restore(info, &self.table.fields, &mut scratch, key)?;
        let mut prefix = Vec::new();
        keys::index_key(&self.share.catalog.indexes[native], &self.table.fields, &scratch, parts, &mut prefix);

        self.bound = None;
        let entry = match flag {
            FindFlag::Exact | FindFlag::Prefix => {
                let entry = self.fetch(native, Bound::Included(prefix.clone()), None)?;
                match entry {
                    Some(e) if e.key.starts_with(&prefix) => Some(e),
                    _ => None,
                }
            }
            FindFlag::KeyOrNext => self.fetch(native, Bound::Included(prefix.clone()), None)?,
            FindFlag::After => self.fetch(native, Bound::Included(prefix.clone()), Some(&prefix))?,
        };
        if flag == FindFlag::Prefix {
            self.bound = Some(prefix);
        }
        self.deliver(entry, row)
    }

    fn index_first(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        let (_, native) = self.active()?;
        self.bound = None;
        let entry = self.fetch(native, Bound::Unbounded, None)?;
        self.deliver(entry, row)
    }

    fn index_next(&mut self, row: &mut RowBuffer) -> Result<bool> {
        self.trx.check_killed()?;
        let (_, native) = self.active()?;
        let from = self.last.clone().map_or(Bound::Unbounded, Bound::Excluded);
        let entry = self.fetch(native, from, None)?;
        self.deliver(entry, row)
    }

    fn index_end(&mut self) -> Result<()> {
        self.active = None;
        self.last = None;
        self.bound = None;
        Ok(())
    }

    fn write_row(&mut self, row: &mut RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        self.trx.note_write(1)?;
        self.assign_auto_increment(row)?;
        let share = self.share.clone();
        let key = if share.catalog.has_hidden_key() {
            keys::row_id_key(share.next_row_id())
        } else {
            keys::full_key(share.catalog.clustered(), &self.table.fields, row)
        };
        let record = share.template().encode(&self.table.fields, row);

        let shared = self.inner.trx(&self.trx);
        let mut etrx = shared.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.lock_row(&mut etrx, &self.trx, &share, &key)?;
        let before = {
            let mut data = share.data();
            if let Some(index) = share.duplicate_key(&data, &key, row, None) {
                return Err(self.duplicate(index));
            }
            share.put(&mut data, &key, Some(record))?
        };
        etrx.record(&share, &key, before);
        self.current = Some(key);
        Ok(())
    }

    fn update_row(&mut self, old: &RowBuffer, new: &mut RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        self.trx.note_write(1)?;
        if let Some(position) = self.table.fields.auto_increment_field() {
            if let Some(explicit) = self.table.fields.field(position).value(new).as_u64() {
                self.share.autoinc.observe(explicit);
            }
        }
        let share = self.share.clone();
        let old_key = self.clustered_key(old)?;
        let new_key = if share.catalog.has_hidden_key() {
            old_key.clone()
        } else {
            keys::full_key(share.catalog.clustered(), &self.table.fields, new)
        };
        let record = share.template().encode(&self.table.fields, new);

        let shared = self.inner.trx(&self.trx);
        let mut etrx = shared.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.lock_row(&mut etrx, &self.trx, &share, &old_key)?;
        if new_key != old_key {
            self.inner.lock_row(&mut etrx, &self.trx, &share, &new_key)?;
        }
        let mut data = share.data();
        if !data.rows.contains_key(&old_key) {
            return Err(err!(NotFound, "Row to update not found in '{}'", self.table.identifier));
        }
        if let Some(index) = share.duplicate_key(&data, &new_key, new, Some(&old_key)) {
            return Err(self.duplicate(index));
        }
        if new_key == old_key {
            let before = share.put(&mut data, &old_key, Some(record))?;
            drop(data);
            etrx.record(&share, &old_key, before);
        } else {
            let removed = share.put(&mut data, &old_key, None)?;
            let replaced = share.put(&mut data, &new_key, Some(record))?;
            drop(data);
            etrx.record(&share, &old_key, removed);
            etrx.record(&share, &new_key, replaced);
        }
        self.current = Some(new_key);
        Ok(())
    }

    fn delete_row(&mut self, row: &RowBuffer) -> Result<()> {
        self.trx.check_killed()?;
        self.trx.note_write(1)?;
        let share = self.share.clone();
        let key = self.clustered_key(row)?;

        let shared = self.inner.trx(&self.trx);
        let mut etrx = shared.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.lock_row(&mut etrx, &self.trx, &share, &key)?;
        let before = share.put(&mut share.data(), &key, None)?;
        if before.is_none() {
            return Err(err!(NotFound, "Row to delete not found in '{}'", self.table.identifier));
        }
        etrx.record(&share, &key, before);
        Ok(())
    }

    fn start_bulk_insert(&mut self, rows: usize) -> Result<()> {
        self.bulk_rows = rows;
        Ok(())
    }

    fn end_bulk_insert(&mut self) -> Result<()> {
        self.bulk_rows = 0;
        self.reservation = Reservation::empty();
        Ok(())
    }

    fn set_read_set(&mut self, columns: &[usize]) {
        self.read = Template::build(&self.table.fields, Some(columns));
    }

    fn records(&mut self) -> Result<u64> {
        Ok(self.share.data().rows.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.index_end()?;
        self.reservation = Reservation::empty();
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec, IndexSpec, TableDefinition};
    use crate::row::FieldSet;

    #[test]
    fn test_covered_parts() {
        let def = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::index("ab", &["a", "b"]));
        let fields = FieldSet::new(&def).unwrap();
        let key = KeyInfo::from_spec(&def.indexes[0], &fields).unwrap();
        let first = key.parts[0].store_length;

        assert_eq!(covered_parts(&key, &[]).unwrap(), 0);
        assert_eq!(covered_parts(&key, &vec![0; first]).unwrap(), 1);
        assert_eq!(covered_parts(&key, &vec![0; key.key_length]).unwrap(), 2);
        assert!(matches!(
            covered_parts(&key, &vec![0; first + 1]),
            Err(crate::errors::Error::Encoding(_))
        ));
    }
}
