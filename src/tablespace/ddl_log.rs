//! DDL intent log. Every table-level DDL writes its intent before touching
//! a file and a completion record afterwards; on restart each intent without
//! completion is driven to a final state so a table is either present with
//! all of its indexes or absent.

use super::catalog::NativeCatalog;
use super::file::{self, read_log, TablespaceFile};
use crate::definition::TableIdentifier;
use crate::encoding::{append_record, encode_record};
use crate::errors::Result;
use bincode::{Decode, Encode};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const DDL_MAGIC: [u8; 4] = *b"TKDL";
const DDL_VERSION: u16 = 1;

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn of(id: &TableIdentifier) -> Self {
        TableName {
            schema: id.schema().to_string(),
            table: id.table().to_string(),
        }
    }

    fn identifier(&self) -> Result<TableIdentifier> {
        TableIdentifier::new(&self.schema, &self.table)
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum DdlOp {
    Create(TableName),
    Drop(TableName),
    Rename { from: TableName, to: TableName },
    Alter(TableName),
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
enum DdlRecord {
    Intent { id: u64, op: DdlOp },
    Done { id: u64 },
}

#[derive(Debug)]
pub struct DdlLog {
    path: PathBuf,
    next_id: AtomicU64,
}

impl DdlLog {
    /// Ids continue after those already in the log. An unreadable log is
    /// reported by `recover`.
    pub fn new(path: PathBuf) -> Self {
        let last = read_log::<DdlRecord>(&path, DDL_MAGIC)
            .unwrap_or_default()
            .iter()
            .filter_map(|r| match r {
                DdlRecord::Intent { id, .. } => Some(*id),
                DdlRecord::Done { .. } => None,
            })
            .max()
            .unwrap_or(0);
        DdlLog {
            path,
            next_id: AtomicU64::new(last + 1),
        }
    }

    fn append(&self, record: &DdlRecord) -> Result<()> {
        append_record(&self.path, &encode_record(DDL_MAGIC, DDL_VERSION, record)?)
    }

    /// Records the intent and returns the id to complete it with.
    pub fn begin(&self, op: DdlOp) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.append(&DdlRecord::Intent { id, op })?;
        Ok(id)
    }

    pub fn done(&self, id: u64) -> Result<()> {
        self.append(&DdlRecord::Done { id })
    }

    /// Intents that never completed, in log order.
    pub fn pending(&self) -> Result<Vec<DdlOp>> {
        let mut open = BTreeMap::new();
        for record in read_log::<DdlRecord>(&self.path, DDL_MAGIC)? {
            match record {
                DdlRecord::Intent { id, op } => {
                    open.insert(id, op);
                }
                DdlRecord::Done { id } => {
                    open.remove(&id);
                }
            }
        }
        Ok(open.into_values().collect())
    }

    /// Finishes or undoes every incomplete DDL under `root`, then empties
    /// the log.
    pub fn recover(&self, root: &Path) -> Result<usize> {
        let pending = self.pending()?;
        for op in &pending {
            warn!(op = ?op, "Resolving interrupted DDL");
            resolve(root, op)?;
        }
        file::remove_if_exists(&self.path)?;
        if !pending.is_empty() {
            info!(count = pending.len(), "DDL recovery finished");
        }
        Ok(pending.len())
    }
}

fn resolve(root: &Path, op: &DdlOp) -> Result<()> {
    match op {
        // A create that did not finish never happened.
        DdlOp::Create(name) | DdlOp::Drop(name) => file::remove_table_files(root, &name.identifier()?),
        DdlOp::Rename { from, to } => {
            let (from, to) = (from.identifier()?, to.identifier()?);
            if file::table_path(root, &to).exists() {
                // The new data file is written last, so the move had finished
                // every new file.
                file::remove_table_files(root, &from)
            } else {
                file::remove_table_files(root, &to)
            }
        }
        DdlOp::Alter(name) => {
            let id = name.identifier()?;
            let path = file::table_path(root, &id);
            let mut tmp = path.clone().into_os_string();
            tmp.push(".tmp");
            file::remove_if_exists(Path::new(&tmp))?;
            let data = TablespaceFile::read(&path)?;
            let catalog = NativeCatalog::build(&data.definition)?;
            file::sync_index_files(root, &id, &data.definition, &catalog, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec, IndexSpec, TableDefinition};
    use tempfile::TempDir;

    fn create_files(root: &Path, id: &TableIdentifier) {
        let def = TableDefinition::new(id.schema(), id.table())
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .index(IndexSpec::primary(&["a"]))
            .index(IndexSpec::unique("ua", &["a"]));
        let catalog = NativeCatalog::build(&def).unwrap();
        file::sync_index_files(root, id, &def, &catalog, None).unwrap();
        TablespaceFile::new(def, catalog).write(&file::table_path(root, id)).unwrap();
    }

    #[test]
    fn test_completed_ddl_is_not_pending() {
        let dir = TempDir::new().unwrap();
        let log = DdlLog::new(dir.path().join("ddl.log"));
        let name = TableName::of(&TableIdentifier::new("test", "t").unwrap());
        let id = log.begin(DdlOp::Create(name.clone())).unwrap();
        log.done(id).unwrap();
        log.begin(DdlOp::Drop(name.clone())).unwrap();
        assert_eq!(log.pending().unwrap(), vec![DdlOp::Drop(name)]);
    }

    #[test]
    fn test_interrupted_create_is_removed() {
        let dir = TempDir::new().unwrap();
        let id = TableIdentifier::new("test", "t").unwrap();
        let log = DdlLog::new(dir.path().join("ddl.log"));
        log.begin(DdlOp::Create(TableName::of(&id))).unwrap();
        create_files(dir.path(), &id);

        assert_eq!(log.recover(dir.path()).unwrap(), 1);
        assert!(!file::table_path(dir.path(), &id).exists());
        assert!(file::index_files(dir.path(), &id).unwrap().is_empty());
        assert!(log.pending().unwrap().is_empty());
    }

    #[test]
    fn test_interrupted_rename_rolls_forward_or_back() {
        let dir = TempDir::new().unwrap();
        let from = TableIdentifier::new("test", "a").unwrap();
        let to = TableIdentifier::new("test", "b").unwrap();
        let log = DdlLog::new(dir.path().join("ddl.log"));

        // New data file in place: finish the move.
        create_files(dir.path(), &from);
        create_files(dir.path(), &to);
        log.begin(DdlOp::Rename { from: TableName::of(&from), to: TableName::of(&to) }).unwrap();
        log.recover(dir.path()).unwrap();
        assert!(!file::table_path(dir.path(), &from).exists());
        assert!(file::table_path(dir.path(), &to).exists());

        // Only new index headers written: undo them.
        let c = TableIdentifier::new("test", "c").unwrap();
        let def = TableDefinition::new("test", "c")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .index(IndexSpec::primary(&["a"]))
            .index(IndexSpec::unique("ua", &["a"]));
        let catalog = NativeCatalog::build(&def).unwrap();
        file::sync_index_files(dir.path(), &c, &def, &catalog, None).unwrap();
        log.begin(DdlOp::Rename { from: TableName::of(&to), to: TableName::of(&c) }).unwrap();
        log.recover(dir.path()).unwrap();
        assert!(file::table_path(dir.path(), &to).exists());
        assert!(file::index_files(dir.path(), &c).unwrap().is_empty());
    }
}
