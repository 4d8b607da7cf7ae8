use super::catalog::NativeCatalog;
use super::file::{self, TablespaceFile};
use super::keys;
use super::template::Template;
use crate::autoinc::AutoIncrement;
use crate::definition::{TableDefinition, TableIdentifier};
use crate::errors::Result;
use crate::row::{FieldSet, RowBuffer};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, trace};

/// Rows of one table. `rows` is what readers see, uncommitted changes
/// included; `committed` is what the data file holds after the next flush.
#[derive(Debug, Default)]
pub struct TableData {
    pub rows: BTreeMap<Vec<u8>, Vec<u8>>,
    pub committed: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Per secondary index: secondary key followed by the clustered key,
    /// mapped to the clustered key.
    pub secondaries: Vec<BTreeMap<Vec<u8>, Vec<u8>>>,
}

/// The process-wide state of one open table, shared by every cursor and
/// transaction using it.
#[derive(Debug)]
pub struct TableShare {
    pub identifier: TableIdentifier,
    pub definition: TableDefinition,
    pub catalog: NativeCatalog,
    pub fields: FieldSet,
    pub autoinc: Arc<AutoIncrement>,
    template: Template,
    next_row_id: AtomicU64,
    path: PathBuf,
    data: Mutex<TableData>,
}

impl TableShare {
    fn load(root: &Path, identifier: &TableIdentifier, autoinc: Arc<AutoIncrement>) -> Result<Self> {
        let path = file::table_path(root, identifier);
        let stored = TablespaceFile::read(&path)?;
        let catalog = stored.catalog;
        for index in catalog.indexes.iter().skip(1) {
            let header = file::read_index_header(&file::index_path(root, identifier, &index.name))?;
            if !header.index.eq_ignore_ascii_case(&index.name) {
                return Err(err!(Corrupt, "Index file of '{}' names '{}'", index.name, header.index));
            }
        }
        let fields = FieldSet::new(&stored.definition)?;
        let template = Template::build(&fields, None);
        let share = TableShare {
            identifier: identifier.clone(),
            definition: stored.definition,
            catalog,
            fields,
            autoinc,
            template,
            next_row_id: AtomicU64::new(stored.next_row_id.max(1)),
            path,
            data: Mutex::new(TableData::default()),
        };
        {
            let mut data = share.data();
            data.secondaries = vec![BTreeMap::new(); share.catalog.secondary_count()];
            let autoinc = share.fields.auto_increment_field().map(|p| share.fields.field(p));
            let mut highest = 0;
            for (key, record) in stored.rows {
                if let Some(field) = autoinc {
                    let row = share.decode(&record)?;
                    if !field.is_null(&row) {
                        highest = highest.max(field.value(&row).as_u64().unwrap_or(0));
                    }
                }
                share.put(&mut data, &key, Some(record.clone()))?;
                data.committed.insert(key, record);
            }
            // A commit replayed from the log may hold values the stored
            // counter never saw.
            share.autoinc.set_next(stored.autoinc_next);
            share.autoinc.observe(highest);
        }
        debug!(table = %identifier, rows = share.data().rows.len(), "Loaded table share");
        Ok(share)
    }

    pub fn data(&self) -> MutexGuard<'_, TableData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn next_row_id(&self) -> u64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn decode(&self, record: &[u8]) -> Result<RowBuffer> {
        let mut row = self.fields.empty_row();
        self.template.decode(&self.fields, record, &mut row)?;
        Ok(row)
    }

    fn secondary_keys(&self, key: &[u8], record: &[u8]) -> Result<Vec<Vec<u8>>> {
        let row = self.decode(record)?;
        Ok(self
            .catalog
            .indexes
            .iter()
            .skip(1)
            .map(|index| {
                let mut entry = keys::full_key(index, &self.fields, &row);
                entry.extend_from_slice(key);
                entry
            })
            .collect())
    }

    /// Replaces the row at `key` in the visible image, keeping the
    /// secondary indexes in step, and returns the previous record.
    pub fn put(&self, data: &mut TableData, key: &[u8], record: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let old = match &record {
            Some(record) => {
                let entries = self.secondary_keys(key, record)?;
                let old = data.rows.insert(key.to_vec(), record.clone());
                if let Some(old) = &old {
                    self.remove_secondaries(data, key, old)?;
                }
                for (index, entry) in data.secondaries.iter_mut().zip(entries) {
                    index.insert(entry, key.to_vec());
                }
                old
            }
            None => {
                let old = data.rows.remove(key);
                if let Some(old) = &old {
                    self.remove_secondaries(data, key, old)?;
                }
                old
            }
        };
        trace!(table = %self.identifier, "Row replaced");
        Ok(old)
    }

    fn remove_secondaries(&self, data: &mut TableData, key: &[u8], record: &[u8]) -> Result<()> {
        for (index, entry) in data.secondaries.iter_mut().zip(self.secondary_keys(key, record)?) {
            index.remove(&entry);
        }
        Ok(())
    }

    /// Name of the unique index `row` would collide on, ignoring the row
    /// stored at `except`.
    pub fn duplicate_key(&self, data: &TableData, key: &[u8], row: &RowBuffer, except: Option<&[u8]>) -> Option<String> {
        if except != Some(key) && data.rows.contains_key(key) {
            return Some(self.catalog.clustered().name.clone());
        }
        for (index, entries) in self.catalog.indexes.iter().skip(1).zip(&data.secondaries) {
            if !index.unique || keys::has_null(index, &self.fields, row) {
                continue;
            }
            let prefix = keys::full_key(index, &self.fields, row);
            let clash = entries
                .range(prefix.clone()..)
                .take_while(|(entry, _)| entry.starts_with(&prefix))
                .any(|(_, clustered)| Some(clustered.as_slice()) != except);
            if clash {
                return Some(index.name.clone());
            }
        }
        None
    }

    /// Writes the committed image to the data file.
    pub fn flush(&self) -> Result<()> {
        let rows = {
            let data = self.data();
            data.committed
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        let stored = TablespaceFile {
            definition: self.definition.clone(),
            catalog: self.catalog.clone(),
            autoinc_next: self.autoinc.next_value(),
            next_row_id: self.next_row_id.load(Ordering::SeqCst),
            rows,
        };
        stored.write(&self.path)
    }
}

/// Open table shares by cache key. A share stays loaded while a cursor or
/// a transaction holds it and is dropped with the last holder.
///
/// Auto-increment counters outlive their share: a reload must not hand out
/// values reserved by a rolled-back transaction the data file never saw.
#[derive(Debug, Default)]
pub struct ShareMap {
    shares: Mutex<HashMap<String, Weak<TableShare>>>,
    counters: Mutex<HashMap<String, Arc<AutoIncrement>>>,
}

impl ShareMap {
    pub fn get(&self, root: &Path, identifier: &TableIdentifier) -> Result<Arc<TableShare>> {
        let key = identifier.cache_key();
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(share) = shares.get(&key).and_then(Weak::upgrade) {
            return Ok(share);
        }
        shares.retain(|_, weak| weak.strong_count() > 0);
        let autoinc = self.counter(&key);
        let share = Arc::new(TableShare::load(root, identifier, autoinc)?);
        shares.insert(key, Arc::downgrade(&share));
        Ok(share)
    }

    /// The loaded share, if anything holds one.
    pub fn loaded(&self, identifier: &TableIdentifier) -> Option<Arc<TableShare>> {
        let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        shares.get(&identifier.cache_key()).and_then(Weak::upgrade)
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<String, Arc<AutoIncrement>>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn counter(&self, key: &str) -> Arc<AutoIncrement> {
        self.counters()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AutoIncrement::new(1)))
            .clone()
    }

    /// Drops the share and the table's counter.
    pub fn forget(&self, identifier: &TableIdentifier) {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        shares.remove(&identifier.cache_key());
        self.counters().remove(&identifier.cache_key());
    }

    /// Drops the share of `from` and moves its counter to `to`.
    pub fn rename(&self, from: &TableIdentifier, to: &TableIdentifier) {
        let mut shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        shares.remove(&from.cache_key());
        let mut counters = self.counters();
        if let Some(counter) = counters.remove(&from.cache_key()) {
            counters.insert(to.cache_key(), counter);
        }
    }

    pub fn len(&self) -> usize {
        let shares = self.shares.lock().unwrap_or_else(|e| e.into_inner());
        shares.values().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
