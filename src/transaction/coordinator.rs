//! Dispatches transaction boundaries to every engine a session touched and
//! runs two-phase commit when more than one of them wrote.

use super::{TransactionContext, Xid};
use crate::engine::{Capabilities, StorageEngine};
use crate::errors::{Error, Result, RollbackScope};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One engine registered in the current transaction.
#[derive(Clone)]
pub struct Participant {
    pub engine: Arc<dyn StorageEngine>,
    pub trx: Arc<TransactionContext>,
}

impl Participant {
    fn name(&self) -> &str {
        self.engine.name()
    }

    fn has(&self, capability: Capabilities) -> bool {
        self.engine.capabilities().contains(capability)
    }
}

#[derive(Debug, Clone)]
struct Savepoint {
    name: String,
    engines: Vec<String>,
}

#[derive(Default)]
pub struct Coordinator {
    participants: Vec<Participant>,
    savepoints: Vec<Savepoint>,
    in_transaction: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Coordinator::default()
    }

    /// Whether an explicit transaction is open. Without one every statement
    /// ends its own transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn set_in_transaction(&mut self, value: bool) {
        self.in_transaction = value;
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn is_registered(&self, engine: &str) -> bool {
        self.participants.iter().any(|p| p.name() == engine)
    }

    pub fn register(&mut self, participant: Participant) {
        if self.is_registered(participant.name()) {
            return;
        }
        debug!(engine = participant.name(), session = %participant.trx.session_id(), "Registered participant");
        self.participants.push(participant);
    }

    pub fn savepoint_names(&self) -> Vec<String> {
        self.savepoints.iter().map(|s| s.name.clone()).collect()
    }

    /// Ends the statement (`all == false`) or the transaction. Outside an
    /// explicit transaction a statement commit is a real commit.
    pub fn commit(&mut self, all: bool, xid: &Xid) -> Result<()> {
        if !all && self.in_transaction {
            for p in &self.participants {
                p.engine.commit(&p.trx, false)?;
            }
            return Ok(());
        }
        if self.participants.is_empty() {
            self.end_transaction();
            return Ok(());
        }

        let writers: Vec<usize> = (0..self.participants.len())
            .filter(|&i| self.participants[i].trx.is_read_write())
            .collect();
        let two_phase = writers.len() > 1
            && writers
                .iter()
                .all(|&i| self.participants[i].has(Capabilities::TWO_PHASE_COMMIT));

        if two_phase {
            self.commit_two_phase(&writers, xid)
        } else {
            if writers.len() > 1 {
                warn!(writers = writers.len(), "Not every engine supports two-phase commit; committing one by one");
            }
            self.commit_one_phase(&writers)
        }
    }

    fn commit_two_phase(&mut self, writers: &[usize], xid: &Xid) -> Result<()> {
        info!(%xid, participants = writers.len(), "Preparing transaction");
        for &i in writers {
            let p = &self.participants[i];
            let prepared = p.engine.prepare(&p.trx, xid).and_then(|_| p.trx.mark_prepared(xid));
            if let Err(e) = prepared {
                warn!(%xid, engine = p.name(), "Prepare failed, rolling back every participant. {}", e);
                // The failure is what the caller must see, not a secondary
                // rollback error.
                let _ = self.rollback_all();
                return Err(e);
            }
        }

        let mut failure: Option<Error> = None;
        for p in &self.participants {
            match p.engine.commit(&p.trx, true) {
                Ok(()) => p.trx.mark_committed(),
                Err(e) => {
                    error!(%xid, engine = p.name(), "Commit after prepare failed; resolve with xa recovery. {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        info!(%xid, "Committed transaction");
        self.end_transaction();
        failure.map_or(Ok(()), Err)
    }

    fn commit_one_phase(&mut self, writers: &[usize]) -> Result<()> {
        // Writers go first; a failure there leaves the whole transaction
        // active so the caller can retry or roll back.
        for &i in writers {
            let p = &self.participants[i];
            if let Err(e) = p.engine.commit(&p.trx, true) {
                warn!(engine = p.name(), "Commit failed, transaction stays active. {}", e);
                return Err(e);
            }
            p.trx.mark_committed();
        }
        for (i, p) in self.participants.iter().enumerate() {
            if writers.contains(&i) {
                continue;
            }
            if let Err(e) = p.engine.commit(&p.trx, true) {
                warn!(engine = p.name(), "Commit of read-only participant failed. {}", e);
            }
            p.trx.mark_committed();
        }
        debug!("Committed transaction");
        self.end_transaction();
        Ok(())
    }

    /// Undoes the statement (`all == false`) or the transaction. Outside an
    /// explicit transaction a statement rollback is a real rollback.
    pub fn rollback(&mut self, all: bool) -> Result<()> {
        if !all && self.in_transaction {
            let mut failure = None;
            for p in &self.participants {
                if let Err(e) = p.engine.rollback(&p.trx, false) {
                    failure.get_or_insert(e);
                }
            }
            return failure.map_or(Ok(()), Err);
        }
        self.rollback_all()
    }

    fn rollback_all(&mut self) -> Result<()> {
        let mut failure = None;
        for p in &self.participants {
            match p.engine.rollback(&p.trx, true) {
                Ok(()) => p.trx.mark_rolled_back(),
                Err(e) => {
                    error!(engine = p.name(), "Rollback failed. {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        debug!("Rolled back transaction");
        self.end_transaction();
        failure.map_or(Ok(()), Err)
    }

    fn end_transaction(&mut self) {
        self.participants.clear();
        self.savepoints.clear();
        self.in_transaction = false;
    }

    pub fn set_savepoint(&mut self, name: &str) -> Result<()> {
        if !self.in_transaction {
            return Err(err!(Transaction, "SAVEPOINT {} outside a transaction", name));
        }
        if let Some(p) = self.participants.iter().find(|p| !p.has(Capabilities::SAVEPOINTS)) {
            return Err(err!(Unsupported, "Engine '{}' does not support savepoints", p.name()));
        }
        for p in &self.participants {
            p.engine.set_savepoint(&p.trx, name)?;
            p.trx.push_savepoint(name)?;
        }
        self.savepoints.retain(|s| s.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            engines: self.participants.iter().map(|p| p.name().to_string()).collect(),
        });
        debug!(savepoint = name, "Set savepoint");
        Ok(())
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| err!(Transaction, "SAVEPOINT {} does not exist", name))
    }

    /// Undoes work done after `name`. Engines that joined after the savepoint
    /// roll back completely and leave the transaction.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        let engines = self.savepoints[index].engines.clone();
        let mut failure = None;
        let mut kept = Vec::with_capacity(self.participants.len());
        for p in self.participants.drain(..) {
            if engines.iter().any(|e| e == p.name()) {
                let undone = p
                    .engine
                    .rollback_to_savepoint(&p.trx, name)
                    .and_then(|_| p.trx.rollback_to_savepoint(name));
                if let Err(e) = undone {
                    failure.get_or_insert(e);
                }
                kept.push(p);
            } else {
                match p.engine.rollback(&p.trx, true) {
                    Ok(()) => p.trx.mark_rolled_back(),
                    Err(e) => {
                        failure.get_or_insert(e);
                    }
                }
            }
        }
        self.participants = kept;
        self.savepoints.truncate(index + 1);
        debug!(savepoint = name, "Rolled back to savepoint");
        failure.map_or(Ok(()), Err)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let index = self.savepoint_index(name)?;
        for p in &self.participants {
            if p.trx.has_savepoint(name) {
                p.engine.release_savepoint(&p.trx, name)?;
                p.trx.release_savepoint(name)?;
            }
        }
        self.savepoints.truncate(index);
        Ok(())
    }

    /// Finishes a statement after its outcome is known: success commits the
    /// statement, failures roll back as far as the error demands.
    pub fn end_statement(&mut self, outcome: Option<&Error>, xid: &Xid) -> Result<()> {
        for p in &self.participants {
            p.engine.end_statement(&p.trx)?;
        }
        match outcome.map(|e| e.rollback_scope()) {
            None => {
                if let Err(e) = self.commit(false, xid) {
                    let _ = self.rollback(false);
                    return Err(e);
                }
                Ok(())
            }
            Some(RollbackScope::None) | Some(RollbackScope::Statement) => self.rollback(false),
            Some(RollbackScope::Transaction) => self.rollback(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{TableDefinition, TableIdentifier};
    use crate::engine::{Cursor, OpenTable};
    use crate::transaction::{StartOptions, TxState};
    use std::sync::Mutex;

    /// Records the calls it sees; `prepare` fails when told to.
    struct Recorder {
        name: String,
        capabilities: Capabilities,
        fail_prepare: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(name: &str, fail_prepare: bool) -> Arc<Self> {
            Arc::new(Recorder {
                name: name.to_string(),
                capabilities: Capabilities::TRANSACTIONS | Capabilities::SAVEPOINTS | Capabilities::TWO_PHASE_COMMIT,
                fail_prepare,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StorageEngine for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> Capabilities {
            self.capabilities
        }

        fn create_table(&self, _: &TransactionContext, _: &TableIdentifier, _: &TableDefinition) -> Result<()> {
            Ok(())
        }

        fn drop_table(&self, _: &TransactionContext, _: &TableIdentifier) -> Result<()> {
            Ok(())
        }

        fn rename_table(&self, _: &TransactionContext, _: &TableIdentifier, _: &TableIdentifier) -> Result<()> {
            Ok(())
        }

        fn does_table_exist(&self, _: &TableIdentifier) -> bool {
            false
        }

        fn table_names(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn start_transaction(&self, _: &TransactionContext, _: &StartOptions) -> Result<()> {
            self.log("start".into());
            Ok(())
        }

        fn commit(&self, _: &TransactionContext, all: bool) -> Result<()> {
            self.log(format!("commit {}", all));
            Ok(())
        }

        fn rollback(&self, _: &TransactionContext, all: bool) -> Result<()> {
            self.log(format!("rollback {}", all));
            Ok(())
        }

        fn set_savepoint(&self, _: &TransactionContext, name: &str) -> Result<()> {
            self.log(format!("savepoint {}", name));
            Ok(())
        }

        fn rollback_to_savepoint(&self, _: &TransactionContext, name: &str) -> Result<()> {
            self.log(format!("rollback to {}", name));
            Ok(())
        }

        fn release_savepoint(&self, _: &TransactionContext, name: &str) -> Result<()> {
            self.log(format!("release {}", name));
            Ok(())
        }

        fn prepare(&self, _: &TransactionContext, xid: &Xid) -> Result<()> {
            self.log(format!("prepare {}", xid.gtrid));
            if self.fail_prepare {
                return Err(err!(Engine, "{}: out of log space", self.name));
            }
            Ok(())
        }

        fn create_cursor(&self, _: Arc<OpenTable>, _: Arc<TransactionContext>) -> Result<Box<dyn Cursor>> {
            Err(err!(Unsupported, "no cursors"))
        }
    }

    fn participant(engine: &Arc<Recorder>, write: bool) -> Participant {
        let trx = Arc::new(TransactionContext::detached(engine.name()));
        trx.begin(&StartOptions::default()).unwrap();
        if write {
            trx.note_write(1).unwrap();
        }
        Participant {
            engine: engine.clone(),
            trx,
        }
    }

    #[test]
    fn test_two_phase_commit_when_two_engines_write() {
        let a = Recorder::new("a", false);
        let b = Recorder::new("b", false);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        let pa = participant(&a, true);
        let pb = participant(&b, true);
        coordinator.register(pa.clone());
        coordinator.register(pb.clone());

        coordinator.commit(true, &Xid::new("g1")).unwrap();
        assert_eq!(a.calls(), vec!["prepare g1", "commit true"]);
        assert_eq!(b.calls(), vec!["prepare g1", "commit true"]);
        assert_eq!(pa.trx.state(), TxState::Committed);
        assert!(coordinator.participants().is_empty());
    }

    #[test]
    fn test_failed_prepare_rolls_back_everyone() {
        let a = Recorder::new("a", false);
        let b = Recorder::new("b", true);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        let pa = participant(&a, true);
        coordinator.register(pa.clone());
        coordinator.register(participant(&b, true));

        let result = coordinator.commit(true, &Xid::new("g2"));
        assert!(matches!(result, Err(Error::Engine(_))));
        assert_eq!(a.calls(), vec!["prepare g2", "rollback true"]);
        assert_eq!(b.calls(), vec!["prepare g2", "rollback true"]);
        assert_eq!(pa.trx.state(), TxState::RolledBack);
    }

    #[test]
    fn test_single_writer_skips_prepare() {
        let a = Recorder::new("a", true);
        let b = Recorder::new("b", true);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        coordinator.register(participant(&a, true));
        coordinator.register(participant(&b, false));
        coordinator.commit(true, &Xid::new("g3")).unwrap();
        assert_eq!(a.calls(), vec!["commit true"]);
        assert_eq!(b.calls(), vec!["commit true"]);
    }

    #[test]
    fn test_statement_commit_inside_transaction() {
        let a = Recorder::new("a", false);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        let pa = participant(&a, true);
        coordinator.register(pa.clone());
        coordinator.commit(false, &Xid::new("g4")).unwrap();
        assert_eq!(a.calls(), vec!["commit false"]);
        assert_eq!(pa.trx.state(), TxState::Active);
    }

    #[test]
    fn test_rollback_to_savepoint_drops_late_participants() {
        let a = Recorder::new("a", false);
        let b = Recorder::new("b", false);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        coordinator.register(participant(&a, true));
        coordinator.set_savepoint("s1").unwrap();
        coordinator.set_savepoint("s2").unwrap();
        let pb = participant(&b, true);
        coordinator.register(pb.clone());

        coordinator.rollback_to_savepoint("s1").unwrap();
        assert_eq!(coordinator.savepoint_names(), vec!["s1"]);
        assert_eq!(b.calls(), vec!["rollback true"]);
        assert_eq!(pb.trx.state(), TxState::RolledBack);
        assert!(!coordinator.is_registered("b"));
        assert!(coordinator.rollback_to_savepoint("s2").is_err());
    }

    #[test]
    fn test_end_statement_by_error_scope() {
        let a = Recorder::new("a", false);
        let mut coordinator = Coordinator::new();
        coordinator.set_in_transaction(true);
        coordinator.register(participant(&a, true));

        let timeout = err!(LockWaitTimeout, "row");
        coordinator.end_statement(Some(&timeout), &Xid::new("g5")).unwrap();
        assert!(coordinator.in_transaction());

        let deadlock = err!(Deadlock, "cycle");
        coordinator.end_statement(Some(&deadlock), &Xid::new("g5")).unwrap();
        assert!(!coordinator.in_transaction());
        assert_eq!(a.calls(), vec!["rollback false", "rollback true"]);
    }
}
