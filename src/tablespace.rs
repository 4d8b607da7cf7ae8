//! `tablespace`: the transactional engine.
//!
//! Tables live under `<data dir>/<engine name>/<schema>/` as one data file
//! per table plus one header per secondary index (see [`file`]). Rows are
//! held in memory while a table is open and written back at commit. Changes
//! go to the transaction log before the data files, and prepared
//! transactions stay in the log until they are resolved, so both survive a
//! restart. Table DDL is bracketed by the DDL log.
//!
//! Readers see the latest row images, uncommitted ones included. Writers
//! take exclusive row locks held until their transaction ends.

pub mod catalog;
pub mod cursor;
pub mod ddl_log;
pub mod faults;
pub mod file;
pub mod keys;
pub mod locks;
pub mod share;
pub mod template;
pub mod translate;
pub mod trx;

use crate::config::Config;
use crate::definition::{TableDefinition, TableIdentifier};
use crate::engine::{Capabilities, Cursor, OpenTable, StorageEngine};
use crate::errors::Result;
use crate::row::FieldSet;
use crate::transaction::{StartOptions, TransactionContext, Xid};
use catalog::NativeCatalog;
use cursor::TablespaceCursor;
use ddl_log::{DdlLog, DdlOp, TableName};
use faults::FaultPoints;
use file::{LogRecord, LoggedChange, TablespaceFile, TrxLog};
use locks::LockManager;
use share::{ShareMap, TableShare};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use template::Template;
use tracing::{debug, info, warn};
use trx::EngineTrx;
use uuid::Uuid;

pub const ENGINE_NAME: &str = "tablespace";

const CAPABILITIES: Capabilities = Capabilities::TRANSACTIONS
    .union(Capabilities::SAVEPOINTS)
    .union(Capabilities::TWO_PHASE_COMMIT)
    .union(Capabilities::AUTO_INCREMENT)
    .union(Capabilities::NULL_IN_KEY);

type SharedTrx = Arc<Mutex<EngineTrx>>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Engine state shared with its cursors.
#[derive(Debug)]
pub(crate) struct Inner {
    name: String,
    root: PathBuf,
    locks: LockManager,
    faults: FaultPoints,
    shares: ShareMap,
    trxs: Mutex<HashMap<Uuid, SharedTrx>>,
    /// Prepared transactions no session owns any more.
    in_doubt: Mutex<BTreeMap<Xid, EngineTrx>>,
    /// Every prepared xid, owned or not.
    prepared: Mutex<HashSet<Xid>>,
    log: TrxLog,
    ddl: DdlLog,
    /// Serializes log appends and data file flushes.
    commit_lock: Mutex<()>,
    /// Set when a flush failed after its commit was logged; the log must
    /// then be kept for the next start.
    log_pinned: AtomicBool,
}

impl Inner {
    pub(crate) fn trx(&self, ctx: &TransactionContext) -> SharedTrx {
        guard(&self.trxs)
            .entry(ctx.session_id())
            .or_insert_with(|| Arc::new(Mutex::new(EngineTrx::new(ctx.session_id()))))
            .clone()
    }

    fn existing_trx(&self, ctx: &TransactionContext) -> Option<SharedTrx> {
        guard(&self.trxs).get(&ctx.session_id()).cloned()
    }

    fn take_trx(&self, ctx: &TransactionContext) -> Option<SharedTrx> {
        guard(&self.trxs).remove(&ctx.session_id())
    }

    pub(crate) fn share(&self, identifier: &TableIdentifier) -> Result<Arc<TableShare>> {
        self.shares.get(&self.root, identifier)
    }

    pub(crate) fn lock_row(
        &self,
        etrx: &mut EngineTrx,
        ctx: &TransactionContext,
        share: &TableShare,
        key: &[u8],
    ) -> Result<()> {
        let lock = (share.identifier.cache_key(), key.to_vec());
        self.locks.acquire(etrx.owner, &lock, ctx)?;
        etrx.locks.insert(lock);
        Ok(())
    }

    fn truncate_log_if_idle(&self) -> Result<()> {
        if guard(&self.prepared).is_empty() && !self.log_pinned.load(Ordering::SeqCst) {
            self.log.truncate()?;
        }
        Ok(())
    }

    /// Makes the transaction's changes durable and visible as committed,
    /// then releases its locks. A failure before the log write leaves the
    /// transaction untouched.
    fn commit_trx(&self, etrx: &mut EngineTrx) -> Result<()> {
        if !etrx.undo.is_empty() || etrx.prepared.is_some() {
            let _commit = guard(&self.commit_lock);
            self.faults.check(faults::COMMIT_FLUSH)?;
            let record = match &etrx.prepared {
                Some(xid) => LogRecord::Resolve {
                    xid: xid.clone(),
                    commit: true,
                },
                None => LogRecord::Commit {
                    changes: etrx.changes(),
                },
            };
            self.log.append(&record)?;

            for undo in etrx.touched() {
                let mut data = undo.share.data();
                match data.rows.get(&undo.key).cloned() {
                    Some(record) => data.committed.insert(undo.key.clone(), record),
                    None => data.committed.remove(&undo.key),
                };
            }
            for share in etrx.shares() {
                if let Err(e) = share.flush() {
                    warn!(table = %share.identifier, "Flush failed; the transaction log keeps the commit. {}", e);
                    self.log_pinned.store(true, Ordering::SeqCst);
                }
            }
            if let Some(xid) = &etrx.prepared {
                guard(&self.prepared).remove(xid);
                info!(engine = %self.name, %xid, "Committed prepared transaction");
            }
            let truncated = self.truncate_log_if_idle();
            let locks = etrx.end();
            self.locks.release(etrx.owner, locks);
            return truncated;
        }
        let locks = etrx.end();
        self.locks.release(etrx.owner, locks);
        Ok(())
    }

    /// Undoes every change and releases the locks. A prepared transaction
    /// logs its outcome first; if that fails it stays prepared and untouched.
    fn rollback_trx(&self, etrx: &mut EngineTrx) -> Result<()> {
        let prepared = etrx.prepared.clone();
        let _commit = prepared.as_ref().map(|_| guard(&self.commit_lock));
        if let Some(xid) = &prepared {
            self.faults.check(faults::RESOLVE)?;
            self.log.append(&LogRecord::Resolve {
                xid: xid.clone(),
                commit: false,
            })?;
            guard(&self.prepared).remove(xid);
            info!(engine = %self.name, %xid, "Rolled back prepared transaction");
        }
        let undone = etrx.undo_to(0);
        let locks = etrx.end();
        self.locks.release(etrx.owner, locks);
        undone?;
        if prepared.is_some() {
            self.truncate_log_if_idle()?;
        }
        Ok(())
    }

    fn prepare_trx(&self, etrx: &mut EngineTrx, xid: &Xid) -> Result<()> {
        let _commit = guard(&self.commit_lock);
        self.faults.check(faults::PREPARE)?;
        if etrx.prepared.is_some() {
            return Err(err!(Transaction, "Transaction is already prepared"));
        }
        let mut prepared = guard(&self.prepared);
        if prepared.contains(xid) {
            return Err(err!(Transaction, "XID {} already exists", xid));
        }
        self.log.append(&LogRecord::Prepare {
            xid: xid.clone(),
            changes: etrx.changes(),
        })?;
        prepared.insert(xid.clone());
        etrx.prepared = Some(xid.clone());
        debug!(engine = %self.name, %xid, rows = etrx.undo.len(), "Prepared transaction");
        Ok(())
    }

    /// Replays the transaction log into the data files and brings back the
    /// transactions that were prepared but never resolved.
    fn replay(&self) -> Result<()> {
        let records = self.log.read_all()?;
        if records.is_empty() {
            return Ok(());
        }
        let mut files: BTreeMap<String, (PathBuf, TablespaceFile)> = BTreeMap::new();
        let mut open: BTreeMap<Xid, Vec<LoggedChange>> = BTreeMap::new();
        let count = records.len();
        for record in records {
            match record {
                LogRecord::Commit { changes } => self.apply_to_files(&mut files, &changes)?,
                LogRecord::Prepare { xid, changes } => {
                    open.insert(xid, changes);
                }
                LogRecord::Resolve { xid, commit } => {
                    if let Some(changes) = open.remove(&xid) {
                        if commit {
                            self.apply_to_files(&mut files, &changes)?;
                        }
                    }
                }
            }
        }
        for (path, stored) in files.values() {
            stored.write(path)?;
        }
        info!(engine = %self.name, records = count, in_doubt = open.len(), "Replayed transaction log");

        for (xid, changes) in open {
            self.restore_prepared(xid, changes)?;
        }
        self.log_pinned.store(false, Ordering::SeqCst);
        self.truncate_log_if_idle()
    }

    fn apply_to_files(
        &self,
        files: &mut BTreeMap<String, (PathBuf, TablespaceFile)>,
        changes: &[LoggedChange],
    ) -> Result<()> {
        for change in changes {
            let id = TableIdentifier::new(&change.schema, &change.table)?;
            let key = id.cache_key();
            if !files.contains_key(&key) {
                let path = file::table_path(&self.root, &id);
                match TablespaceFile::read(&path) {
                    Ok(stored) => {
                        files.insert(key.clone(), (path, stored));
                    }
                    Err(e) if e.is_not_found() => {
                        warn!(table = %id, "Skipping logged change of a dropped table");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Some((_, stored)) = files.get_mut(&key) {
                stored.apply(&change.key, change.after.as_deref());
            }
        }
        Ok(())
    }

    fn restore_prepared(&self, xid: Xid, changes: Vec<LoggedChange>) -> Result<()> {
        let mut etrx = EngineTrx::new(Uuid::new_v4());
        for change in changes {
            let id = TableIdentifier::new(&change.schema, &change.table)?;
            let share = self.share(&id)?;
            {
                let mut data = share.data();
                share.put(&mut data, &change.key, change.after.clone())?;
            }
            let lock = (id.cache_key(), change.key.clone());
            self.locks.grant(etrx.owner, lock.clone());
            etrx.locks.insert(lock);
            etrx.record(&share, &change.key, change.before);
        }
        warn!(engine = %self.name, %xid, rows = etrx.undo.len(), "Transaction is prepared and waits for a decision");
        etrx.prepared = Some(xid.clone());
        guard(&self.prepared).insert(xid.clone());
        guard(&self.in_doubt).insert(xid, etrx);
        Ok(())
    }

    fn resolve(&self, xid: &Xid, commit: bool) -> Result<()> {
        let mut etrx = guard(&self.in_doubt)
            .remove(xid)
            .ok_or_else(|| err!(NotFound, "XID {} unknown to engine '{}'", xid, self.name))?;
        let result = if commit {
            self.commit_trx(&mut etrx)
        } else {
            self.rollback_trx(&mut etrx)
        };
        if result.is_err() && etrx.prepared.is_some() {
            guard(&self.in_doubt).insert(xid.clone(), etrx);
        }
        result
    }

    fn ensure_unused(&self, identifier: &TableIdentifier) -> Result<()> {
        if self.shares.loaded(identifier).is_some() {
            return Err(err!(Engine, "Table '{}' is in use", identifier));
        }
        Ok(())
    }
}

/// The transactional tablespace engine.
pub struct TablespaceEngine {
    inner: Arc<Inner>,
}

impl TablespaceEngine {
    /// An engine named `name` keeping its files under `<data dir>/<name>`.
    pub fn new(name: &str, config: &Config) -> Self {
        let root = config.data_dir.join(name);
        let data_dir = &config.data_dir;
        TablespaceEngine {
            inner: Arc::new(Inner {
                name: name.to_string(),
                locks: LockManager::new(config.lock_wait_timeout()),
                faults: FaultPoints::default(),
                shares: ShareMap::default(),
                trxs: Mutex::new(HashMap::new()),
                in_doubt: Mutex::new(BTreeMap::new()),
                prepared: Mutex::new(HashSet::new()),
                log: TrxLog::new(data_dir.join(format!("{}.trx.log", name))),
                ddl: DdlLog::new(data_dir.join(format!("{}.ddl.log", name))),
                commit_lock: Mutex::new(()),
                log_pinned: AtomicBool::new(false),
                root,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Failure points tests arm to interrupt DDL, commit or prepare.
    pub fn faults(&self) -> &FaultPoints {
        &self.inner.faults
    }

    /// Tables currently held in memory.
    pub fn open_shares(&self) -> usize {
        self.inner.shares.len()
    }

    /// How many times the table's auto-increment counter was locked.
    pub fn autoinc_acquisitions(&self, identifier: &TableIdentifier) -> Result<u64> {
        Ok(self.inner.share(identifier)?.autoinc.acquisitions())
    }

    fn exists(&self, identifier: &TableIdentifier) -> bool {
        !identifier.is_temporary() && file::table_path(&self.inner.root, identifier).exists()
    }

    fn check_durable(&self, identifier: &TableIdentifier) -> Result<()> {
        if identifier.is_temporary() {
            return Err(err!(Unsupported, "Engine '{}' has no temporary tables", self.inner.name));
        }
        Ok(())
    }

    /// Writes the data file and every index, checking the index fault point
    /// before each one. Anything written is removed again on failure.
    fn build_table(&self, identifier: &TableIdentifier, definition: &TableDefinition) -> Result<()> {
        let root = &self.inner.root;
        let catalog = NativeCatalog::build(definition)?;
        let written = self
            .inner
            .faults
            .check(faults::CREATE_INDEX)
            .and_then(|_| {
                TablespaceFile::new(definition.clone(), catalog.clone()).write(&file::table_path(root, identifier))
            })
            .and_then(|_| file::sync_index_files(root, identifier, definition, &catalog, Some(&self.inner.faults)));
        if let Err(e) = written {
            warn!(table = %identifier, "Create failed, removing partial table. {}", e);
            if let Err(cleanup) = file::remove_table_files(root, identifier) {
                warn!(table = %identifier, "Cleanup after failed create failed. {}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Rewrites every record of `from` for the definition `to`. Columns are
/// matched by name; new columns take their default.
fn convert_rows(stored: &TablespaceFile, to: &TableDefinition, catalog: &NativeCatalog) -> Result<TablespaceFile> {
    let old_fields = FieldSet::new(&stored.definition)?;
    let old_template = Template::build(&old_fields, None);
    let new_fields = FieldSet::new(to)?;
    let new_template = Template::build(&new_fields, None);

    let mut converted = TablespaceFile::new(to.clone(), catalog.clone());
    converted.autoinc_next = stored.autoinc_next;
    converted.next_row_id = stored.next_row_id;
    let mut unique: Vec<HashSet<Vec<u8>>> = vec![HashSet::new(); catalog.indexes.len()];
    let mut rows = BTreeMap::new();
    for (key, record) in &stored.rows {
        let mut old = old_fields.empty_row();
        old_template.decode(&old_fields, record, &mut old)?;
        let mut row = new_fields.new_row();
        for field in new_fields.iter() {
            if let Some(source) = old_fields.find(field.name()) {
                field.store(&mut row, &source.value(&old))?;
            }
        }
        let key = if catalog.has_hidden_key() {
            if stored.catalog.has_hidden_key() {
                key.clone()
            } else {
                let id = converted.next_row_id;
                converted.next_row_id += 1;
                keys::row_id_key(id)
            }
        } else {
            keys::full_key(catalog.clustered(), &new_fields, &row)
        };
        for (i, index) in catalog.indexes.iter().enumerate().skip(1) {
            if index.unique && !keys::has_null(index, &new_fields, &row) {
                let entry = keys::full_key(index, &new_fields, &row);
                if !unique[i].insert(entry) {
                    return Err(err!(AlreadyExists, "Duplicate entry for key '{}'", index.name));
                }
            }
        }
        let record = new_template.encode(&new_fields, &row);
        if rows.insert(key, record).is_some() {
            return Err(err!(AlreadyExists, "Duplicate entry for key '{}'", catalog.clustered().name));
        }
    }
    converted.rows = rows.into_iter().collect();
    Ok(converted)
}

impl StorageEngine for TablespaceEngine {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.inner.root)?;
        let resolved = self.inner.ddl.recover(&self.inner.root)?;
        self.inner.replay()?;
        info!(engine = %self.inner.name, root = %self.inner.root.display(), ddl_resolved = resolved, "Tablespace ready");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let open: Vec<SharedTrx> = guard(&self.inner.trxs).drain().map(|(_, t)| t).collect();
        for shared in open {
            let mut etrx = guard(&shared);
            if etrx.prepared.is_none() {
                self.inner.rollback_trx(&mut etrx)?;
            }
        }
        Ok(())
    }

    fn create_table(&self, _trx: &TransactionContext, identifier: &TableIdentifier, definition: &TableDefinition) -> Result<()> {
        self.check_durable(identifier)?;
        if self.exists(identifier) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", identifier));
        }
        let ddl = self.inner.ddl.begin(DdlOp::Create(TableName::of(identifier)))?;
        let built = self.build_table(identifier, definition);
        self.inner.ddl.done(ddl)?;
        built?;
        info!(engine = %self.inner.name, table = %identifier, "Created table");
        Ok(())
    }

    fn drop_table(&self, _trx: &TransactionContext, identifier: &TableIdentifier) -> Result<()> {
        self.check_durable(identifier)?;
        if !self.exists(identifier) {
            return Err(err!(NotFound, "Unknown table '{}'", identifier));
        }
        self.inner.ensure_unused(identifier)?;
        let ddl = self.inner.ddl.begin(DdlOp::Drop(TableName::of(identifier)))?;
        file::remove_table_files(&self.inner.root, identifier)?;
        self.inner.shares.forget(identifier);
        self.inner.ddl.done(ddl)?;
        info!(engine = %self.inner.name, table = %identifier, "Dropped table");
        Ok(())
    }

    fn rename_table(&self, _trx: &TransactionContext, from: &TableIdentifier, to: &TableIdentifier) -> Result<()> {
        self.check_durable(from)?;
        self.check_durable(to)?;
        if !self.exists(from) {
            return Err(err!(NotFound, "Unknown table '{}'", from));
        }
        if self.exists(to) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", to));
        }
        self.inner.ensure_unused(from)?;
        let root = &self.inner.root;
        let mut stored = TablespaceFile::read(&file::table_path(root, from))?;
        stored.definition = stored.definition.renamed(to);

        let ddl = self.inner.ddl.begin(DdlOp::Rename {
            from: TableName::of(from),
            to: TableName::of(to),
        })?;
        let moved = file::sync_index_files(root, to, &stored.definition, &stored.catalog, None)
            .and_then(|_| stored.write(&file::table_path(root, to)));
        if let Err(e) = moved {
            file::remove_table_files(root, to)?;
            self.inner.ddl.done(ddl)?;
            return Err(e);
        }
        file::remove_table_files(root, from)?;
        self.inner.shares.rename(from, to);
        self.inner.ddl.done(ddl)?;
        info!(engine = %self.inner.name, from = %from, to = %to, "Renamed table");
        Ok(())
    }

    fn alter_table(
        &self,
        _trx: &TransactionContext,
        identifier: &TableIdentifier,
        _from: &TableDefinition,
        to: &TableDefinition,
    ) -> Result<()> {
        self.check_durable(identifier)?;
        self.inner.ensure_unused(identifier)?;
        let root = &self.inner.root;
        let path = file::table_path(root, identifier);
        let stored = TablespaceFile::read(&path)?;
        let catalog = NativeCatalog::build(to)?;
        let converted = convert_rows(&stored, to, &catalog)?;

        let ddl = self.inner.ddl.begin(DdlOp::Alter(TableName::of(identifier)))?;
        let rebuilt = file::sync_index_files(root, identifier, to, &catalog, Some(&self.inner.faults))
            .and_then(|_| converted.write(&path));
        if let Err(e) = rebuilt {
            warn!(table = %identifier, "Alter failed, restoring indexes. {}", e);
            file::sync_index_files(root, identifier, &stored.definition, &stored.catalog, None)?;
            self.inner.ddl.done(ddl)?;
            return Err(e);
        }
        self.inner.ddl.done(ddl)?;
        info!(engine = %self.inner.name, table = %identifier, version = to.version, "Altered table");
        Ok(())
    }

    fn does_table_exist(&self, identifier: &TableIdentifier) -> bool {
        self.exists(identifier)
    }

    fn get_table_definition(&self, identifier: &TableIdentifier) -> Result<Option<TableDefinition>> {
        if identifier.is_temporary() {
            return Ok(None);
        }
        match TablespaceFile::read(&file::table_path(&self.inner.root, identifier)) {
            Ok(stored) => Ok(Some(stored.definition)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn table_names(&self, schema: &str) -> Result<Vec<String>> {
        let dir = file::schema_dir(&self.inner.root, schema);
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(file::TABLE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn drop_schema(&self, name: &str) -> Result<()> {
        match std::fs::remove_dir_all(file::schema_dir(&self.inner.root, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn start_transaction(&self, trx: &TransactionContext, options: &StartOptions) -> Result<()> {
        let _ = self.inner.trx(trx);
        debug!(engine = %self.inner.name, session = %trx.session_id(), snapshot = options.consistent_snapshot, "Started transaction");
        Ok(())
    }

    fn start_statement(&self, trx: &TransactionContext) -> Result<()> {
        if let Some(shared) = self.inner.existing_trx(trx) {
            guard(&shared).start_statement();
        }
        Ok(())
    }

    fn commit(&self, trx: &TransactionContext, all: bool) -> Result<()> {
        let Some(shared) = self.inner.existing_trx(trx) else {
            return Ok(());
        };
        let mut etrx = guard(&shared);
        if !all {
            // The statement's work now belongs to the transaction.
            etrx.start_statement();
            return Ok(());
        }
        self.inner.commit_trx(&mut etrx)?;
        drop(etrx);
        self.inner.take_trx(trx);
        Ok(())
    }

    fn rollback(&self, trx: &TransactionContext, all: bool) -> Result<()> {
        let Some(shared) = self.inner.existing_trx(trx) else {
            return Ok(());
        };
        let mut etrx = guard(&shared);
        if !all {
            return etrx.rollback_statement();
        }
        let result = self.inner.rollback_trx(&mut etrx);
        drop(etrx);
        self.inner.take_trx(trx);
        result
    }

    fn set_savepoint(&self, trx: &TransactionContext, name: &str) -> Result<()> {
        guard(&self.inner.trx(trx)).set_savepoint(name);
        Ok(())
    }

    fn rollback_to_savepoint(&self, trx: &TransactionContext, name: &str) -> Result<()> {
        guard(&self.inner.trx(trx)).rollback_to_savepoint(name)
    }

    fn release_savepoint(&self, trx: &TransactionContext, name: &str) -> Result<()> {
        guard(&self.inner.trx(trx)).release_savepoint(name)
    }

    fn prepare(&self, trx: &TransactionContext, xid: &Xid) -> Result<()> {
        let shared = self.inner.trx(trx);
        let mut etrx = guard(&shared);
        self.inner.prepare_trx(&mut etrx, xid)
    }

    fn commit_by_xid(&self, xid: &Xid) -> Result<()> {
        self.inner.resolve(xid, true)
    }

    fn rollback_by_xid(&self, xid: &Xid) -> Result<()> {
        self.inner.resolve(xid, false)
    }

    fn recover(&self) -> Result<Vec<Xid>> {
        Ok(guard(&self.inner.in_doubt).keys().cloned().collect())
    }

    /// An unresolved prepared transaction outlives its connection and waits
    /// for a decision by xid; anything else is rolled back.
    fn close_connection(&self, trx: &TransactionContext) -> Result<()> {
        let Some(shared) = self.inner.take_trx(trx) else {
            return Ok(());
        };
        let mut etrx = guard(&shared);
        match etrx.prepared.clone() {
            Some(xid) => {
                let owner = Uuid::new_v4();
                self.inner.locks.transfer(etrx.owner, owner);
                let mut detached = std::mem::replace(&mut *etrx, EngineTrx::new(owner));
                detached.owner = owner;
                warn!(engine = %self.inner.name, %xid, "Connection closed with a prepared transaction");
                guard(&self.inner.in_doubt).insert(xid, detached);
                Ok(())
            }
            None if etrx.is_empty() => Ok(()),
            None => self.inner.rollback_trx(&mut etrx),
        }
    }

    fn create_cursor(&self, table: Arc<OpenTable>, trx: Arc<TransactionContext>) -> Result<Box<dyn Cursor>> {
        let share = self.inner.share(&table.identifier)?;
        Ok(Box::new(TablespaceCursor::new(self.inner.clone(), table, share, trx)))
    }
}
