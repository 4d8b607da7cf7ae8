//! On-disk formats of the tablespace engine.
//!
//! Each table is a `<table>.tbd` file holding its definition, native catalog,
//! counters and the committed clustered records, plus one `<table>.<index>.idx`
//! header per secondary index. Secondary entries are rebuilt from the
//! records on load. The transaction log keeps committed changes until the
//! table files are flushed, and prepared transactions until they are
//! resolved.

use super::catalog::NativeCatalog;
use super::faults::{self, FaultPoints};
use crate::definition::{TableDefinition, TableIdentifier};
use crate::encoding::{append_record, decode_record, encode_record, split_record, write_atomic};
use crate::errors::{Error, Result};
use crate::transaction::Xid;
use bincode::{Decode, Encode};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TABLE_MAGIC: [u8; 4] = *b"TKTS";
const INDEX_MAGIC: [u8; 4] = *b"TKIX";
const LOG_MAGIC: [u8; 4] = *b"TKTL";
const FORMAT_VERSION: u16 = 1;

pub const TABLE_EXT: &str = "tbd";
pub const INDEX_EXT: &str = "idx";

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct TablespaceFile {
    pub definition: TableDefinition,
    pub catalog: NativeCatalog,
    pub autoinc_next: u64,
    pub next_row_id: u64,
    /// Clustered key and native record, in key order.
    pub rows: Vec<(Vec<u8>, Vec<u8>)>,
}

impl TablespaceFile {
    pub fn new(definition: TableDefinition, catalog: NativeCatalog) -> Self {
        let autoinc_next = definition.options.auto_increment_value.max(1);
        TablespaceFile {
            definition,
            catalog,
            autoinc_next,
            next_row_id: 1,
            rows: Vec::new(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(err!(NotFound, "Tablespace '{}' not found", path.display()))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        decode_record(TABLE_MAGIC, FORMAT_VERSION, &bytes)
            .map_err(|e| err!(Corrupt, "Tablespace '{}' is malformed: {}", path.display(), e))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = encode_record(TABLE_MAGIC, FORMAT_VERSION, self)?;
        write_atomic(path, &bytes)?;
        debug!(path = %path.display(), rows = self.rows.len(), "Flushed tablespace");
        Ok(())
    }

    /// Applies an after-image: `None` deletes the row.
    pub fn apply(&mut self, key: &[u8], after: Option<&[u8]>) {
        let found = self.rows.binary_search_by(|(k, _)| k.as_slice().cmp(key));
        match (found, after) {
            (Ok(i), Some(record)) => self.rows[i].1 = record.to_vec(),
            (Ok(i), None) => {
                self.rows.remove(i);
            }
            (Err(i), Some(record)) => self.rows.insert(i, (key.to_vec(), record.to_vec())),
            (Err(_), None) => {}
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub table: String,
    pub index: String,
    /// Native index number.
    pub number: u32,
    pub unique: bool,
    pub definition_version: u64,
}

pub fn schema_dir(root: &Path, schema: &str) -> PathBuf {
    root.join(schema)
}

pub fn table_path(root: &Path, id: &TableIdentifier) -> PathBuf {
    schema_dir(root, id.schema()).join(format!("{}.{}", id.table(), TABLE_EXT))
}

pub fn index_path(root: &Path, id: &TableIdentifier, index: &str) -> PathBuf {
    schema_dir(root, id.schema()).join(format!(
        "{}.{}.{}",
        id.table(),
        index.to_ascii_lowercase(),
        INDEX_EXT
    ))
}

/// Every index header file present for the table.
pub fn index_files(root: &Path, id: &TableIdentifier) -> Result<Vec<PathBuf>> {
    let dir = schema_dir(root, id.schema());
    let prefix = format!("{}.", id.table());
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(Error::Io(e)),
    };
    for entry in entries {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with(&prefix) && path.extension().and_then(|e| e.to_str()) == Some(INDEX_EXT) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_index_header(path: &Path) -> Result<IndexHeader> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(err!(Corrupt, "Index file '{}' is missing", path.display()))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    decode_record(INDEX_MAGIC, FORMAT_VERSION, &bytes)
}

/// Writes the header of every secondary index of `catalog` and removes
/// headers of indexes the catalog no longer has. The fault point is
/// checked before each index is built when given.
pub fn sync_index_files(
    root: &Path,
    id: &TableIdentifier,
    definition: &TableDefinition,
    catalog: &NativeCatalog,
    faults: Option<&FaultPoints>,
) -> Result<()> {
    let mut wanted = Vec::with_capacity(catalog.secondary_count());
    for (number, index) in catalog.indexes.iter().enumerate().skip(1) {
        if let Some(faults) = faults {
            faults.check(faults::CREATE_INDEX)?;
        }
        let header = IndexHeader {
            table: id.table().to_string(),
            index: index.name.to_ascii_lowercase(),
            number: number as u32,
            unique: index.unique,
            definition_version: definition.version,
        };
        let path = index_path(root, id, &index.name);
        write_atomic(&path, &encode_record(INDEX_MAGIC, FORMAT_VERSION, &header)?)?;
        wanted.push(path);
    }
    for path in index_files(root, id)? {
        if !wanted.contains(&path) {
            debug!(path = %path.display(), "Removing stale index file");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Removes the table's data and index files; missing ones are ignored.
pub fn remove_table_files(root: &Path, id: &TableIdentifier) -> Result<()> {
    for path in index_files(root, id)? {
        remove_if_exists(&path)?;
    }
    let path = table_path(root, id);
    remove_if_exists(&path)?;
    let mut tmp = path.into_os_string();
    tmp.push(".tmp");
    remove_if_exists(Path::new(&tmp))
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// One changed row as the transaction log records it.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct LoggedChange {
    pub schema: String,
    pub table: String,
    pub key: Vec<u8>,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Commit { changes: Vec<LoggedChange> },
    Prepare { xid: Xid, changes: Vec<LoggedChange> },
    Resolve { xid: Xid, commit: bool },
}

#[derive(Debug)]
pub struct TrxLog {
    path: PathBuf,
}

impl TrxLog {
    pub fn new(path: PathBuf) -> Self {
        TrxLog { path }
    }

    pub fn append(&self, record: &LogRecord) -> Result<()> {
        append_record(&self.path, &encode_record(LOG_MAGIC, FORMAT_VERSION, record)?)
    }

    /// Every complete record. A torn record at the tail ends the log.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        read_log(&self.path, LOG_MAGIC)
    }

    pub fn truncate(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

pub(crate) fn read_log<T: Decode<()>>(path: &Path, magic: [u8; 4]) -> Result<Vec<T>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };
    let mut records = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match split_record(magic, FORMAT_VERSION, &bytes[pos..]) {
            Ok((_, used)) => {
                records.push(decode_record(magic, FORMAT_VERSION, &bytes[pos..pos + used])?);
                pos += used;
            }
            Err(e) => {
                warn!(path = %path.display(), offset = pos, "Ignoring torn log tail. {}", e);
                break;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec, IndexSpec};
    use tempfile::TempDir;

    fn definition() -> TableDefinition {
        TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::primary(&["a"]))
            .index(IndexSpec::index("b", &["b"]))
    }

    #[test]
    fn test_apply_keeps_key_order() {
        let def = definition();
        let catalog = NativeCatalog::build(&def).unwrap();
        let mut file = TablespaceFile::new(def, catalog);
        file.apply(&[2], Some(b"two"));
        file.apply(&[1], Some(b"one"));
        file.apply(&[2], Some(b"deux"));
        file.apply(&[3], None);
        assert_eq!(file.rows, vec![(vec![1], b"one".to_vec()), (vec![2], b"deux".to_vec())]);
        file.apply(&[1], None);
        assert_eq!(file.rows.len(), 1);
    }

    #[test]
    fn test_sync_index_files_removes_stale_headers() {
        let dir = TempDir::new().unwrap();
        let id = TableIdentifier::new("test", "t").unwrap();
        let def = definition().add_index(IndexSpec::index("c", &["b", "a"])).unwrap();
        let catalog = NativeCatalog::build(&def).unwrap();
        sync_index_files(dir.path(), &id, &def, &catalog, None).unwrap();
        assert_eq!(index_files(dir.path(), &id).unwrap().len(), 2);

        let def = def.drop_index("b").unwrap();
        let catalog = NativeCatalog::build(&def).unwrap();
        sync_index_files(dir.path(), &id, &def, &catalog, None).unwrap();
        let files = index_files(dir.path(), &id).unwrap();
        assert_eq!(files, vec![index_path(dir.path(), &id, "c")]);
        let header = read_index_header(&files[0]).unwrap();
        assert_eq!(header.number, 1);
    }

    #[test]
    fn test_log_ignores_torn_tail() {
        let dir = TempDir::new().unwrap();
        let log = TrxLog::new(dir.path().join("t.trx.log"));
        let xid = Xid::new("g1");
        log.append(&LogRecord::Resolve { xid: xid.clone(), commit: true }).unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(dir.path().join("t.trx.log")).unwrap();
        std::io::Write::write_all(&mut file, b"TKTL\x01").unwrap();
        assert_eq!(log.read_all().unwrap(), vec![LogRecord::Resolve { xid, commit: true }]);
        log.truncate().unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }
}
