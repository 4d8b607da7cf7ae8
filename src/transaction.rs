//! Per-session, per-engine transaction state.

pub mod coordinator;
mod xid;

pub use xid::Xid;

use crate::errors::Result;
use clap::ValueEnum;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "READ-UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ-COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE-READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    NotStarted,
    Active,
    Prepared,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub consistent_snapshot: bool,
    pub read_only: bool,
    pub isolation: Option<IsolationLevel>,
}

impl StartOptions {
    pub fn with_consistent_snapshot(mut self) -> Self {
        self.consistent_snapshot = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

#[derive(Debug)]
struct TxInner {
    state: TxState,
    isolation: IsolationLevel,
    savepoints: Vec<String>,
    xid: Option<Xid>,
    read_only: bool,
    read_write: bool,
    snapshot: bool,
}

/// The state one session keeps for one engine.
///
/// Only the owning session's thread uses a context; the lock is there so
/// cursors can share it.
#[derive(Debug)]
pub struct TransactionContext {
    session: Uuid,
    engine: String,
    killed: Arc<AtomicBool>,
    modified_rows: AtomicU64,
    inner: Mutex<TxInner>,
}

impl TransactionContext {
    pub fn new(session: Uuid, engine: &str, isolation: IsolationLevel, killed: Arc<AtomicBool>) -> Self {
        TransactionContext {
            session,
            engine: engine.to_string(),
            killed,
            modified_rows: AtomicU64::new(0),
            inner: Mutex::new(TxInner {
                state: TxState::NotStarted,
                isolation,
                savepoints: Vec::new(),
                xid: None,
                read_only: false,
                read_write: false,
                snapshot: false,
            }),
        }
    }

    /// Context for work outside any session, such as recovery.
    pub fn detached(engine: &str) -> Self {
        TransactionContext::new(
            Uuid::new_v4(),
            engine,
            IsolationLevel::RepeatableRead,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn inner(&self) -> MutexGuard<'_, TxInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn state(&self) -> TxState {
        self.inner().state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.inner().isolation
    }

    pub fn xid(&self) -> Option<Xid> {
        self.inner().xid.clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), TxState::Active | TxState::Prepared)
    }

    pub fn is_read_only(&self) -> bool {
        self.inner().read_only
    }

    pub fn has_snapshot(&self) -> bool {
        self.inner().snapshot
    }

    /// Whether any row was written through this context in the current
    /// transaction.
    pub fn is_read_write(&self) -> bool {
        self.inner().read_write
    }

    pub fn modified_rows(&self) -> u64 {
        self.modified_rows.load(Ordering::SeqCst)
    }

    pub fn savepoints(&self) -> Vec<String> {
        self.inner().savepoints.clone()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Fails with `Killed` once another thread killed the session.
    pub fn check_killed(&self) -> Result<()> {
        if self.is_killed() {
            return Err(err!(Killed, "Query execution was interrupted"));
        }
        Ok(())
    }

    /// Counts written rows. Fails for read-only transactions.
    pub fn note_write(&self, rows: u64) -> Result<()> {
        let mut inner = self.inner();
        if inner.read_only {
            return Err(err!(ReadOnly, "Cannot execute statement in a READ ONLY transaction"));
        }
        inner.read_write = true;
        self.modified_rows.fetch_add(rows, Ordering::SeqCst);
        Ok(())
    }

    /// NotStarted, Committed or RolledBack to Active.
    pub fn begin(&self, options: &StartOptions) -> Result<()> {
        let mut inner = self.inner();
        match inner.state {
            TxState::Active | TxState::Prepared => Err(err!(
                Transaction,
                "Transaction on engine '{}' is already {:?}",
                self.engine,
                inner.state
            )),
            _ => {
                inner.state = TxState::Active;
                if let Some(level) = options.isolation {
                    inner.isolation = level;
                }
                inner.read_only = options.read_only;
                inner.snapshot = options.consistent_snapshot;
                inner.read_write = false;
                inner.savepoints.clear();
                inner.xid = None;
                Ok(())
            }
        }
    }

    pub fn set_isolation(&self, level: IsolationLevel) {
        self.inner().isolation = level;
    }

    /// Adds a savepoint. Reusing a name moves it to the top.
    pub fn push_savepoint(&self, name: &str) -> Result<()> {
        let mut inner = self.inner();
        if inner.state != TxState::Active {
            return Err(err!(Transaction, "SAVEPOINT requires an active transaction"));
        }
        inner.savepoints.retain(|s| s != name);
        inner.savepoints.push(name.to_string());
        Ok(())
    }

    fn savepoint_index(inner: &TxInner, name: &str) -> Result<usize> {
        inner
            .savepoints
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| err!(Transaction, "SAVEPOINT {} does not exist", name))
    }

    /// Keeps `name`, discards every later savepoint.
    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let mut inner = self.inner();
        let index = Self::savepoint_index(&inner, name)?;
        inner.savepoints.truncate(index + 1);
        Ok(())
    }

    /// Removes `name` and every later savepoint.
    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        let mut inner = self.inner();
        let index = Self::savepoint_index(&inner, name)?;
        inner.savepoints.truncate(index);
        Ok(())
    }

    pub fn has_savepoint(&self, name: &str) -> bool {
        self.inner().savepoints.iter().any(|s| s == name)
    }

    pub fn mark_prepared(&self, xid: &Xid) -> Result<()> {
        let mut inner = self.inner();
        if inner.state != TxState::Active {
            return Err(err!(Transaction, "Cannot prepare a transaction in state {:?}", inner.state));
        }
        inner.state = TxState::Prepared;
        inner.xid = Some(xid.clone());
        Ok(())
    }

    pub fn mark_committed(&self) {
        self.finish(TxState::Committed);
    }

    pub fn mark_rolled_back(&self) {
        self.finish(TxState::RolledBack);
    }

    fn finish(&self, state: TxState) {
        let mut inner = self.inner();
        inner.state = state;
        inner.savepoints.clear();
        inner.read_write = false;
        inner.read_only = false;
        inner.snapshot = false;
    }
}
