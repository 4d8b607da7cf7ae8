//! The engine's side of one transaction: an undo log of before-images,
//! the statement and named savepoint marks into it, and the row locks it
//! holds until it ends.

use super::file::LoggedChange;
use super::locks::LockKey;
use super::share::TableShare;
use crate::errors::Result;
use crate::transaction::Xid;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct Undo {
    pub share: Arc<TableShare>,
    pub key: Vec<u8>,
    pub before: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct EngineTrx {
    /// Lock owner; the session id, or a fresh one for a recovered
    /// transaction.
    pub owner: Uuid,
    pub undo: Vec<Undo>,
    pub statement_mark: usize,
    savepoints: Vec<(String, usize)>,
    pub locks: HashSet<LockKey>,
    pub prepared: Option<Xid>,
}

impl EngineTrx {
    pub fn new(owner: Uuid) -> Self {
        EngineTrx {
            owner,
            undo: Vec::new(),
            statement_mark: 0,
            savepoints: Vec::new(),
            locks: HashSet::new(),
            prepared: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.locks.is_empty() && self.prepared.is_none()
    }

    pub fn record(&mut self, share: &Arc<TableShare>, key: &[u8], before: Option<Vec<u8>>) {
        self.undo.push(Undo {
            share: share.clone(),
            key: key.to_vec(),
            before,
        });
    }

    pub fn start_statement(&mut self) {
        self.statement_mark = self.undo.len();
    }

    /// Puts back every before-image recorded after `mark`, newest first.
    pub fn undo_to(&mut self, mark: usize) -> Result<()> {
        while self.undo.len() > mark {
            let Some(entry) = self.undo.pop() else { break };
            let mut data = entry.share.data();
            entry.share.put(&mut data, &entry.key, entry.before)?;
        }
        self.statement_mark = self.statement_mark.min(mark);
        Ok(())
    }

    pub fn rollback_statement(&mut self) -> Result<()> {
        self.undo_to(self.statement_mark)
    }

    /// A savepoint of the same name moves to the current position.
    pub fn set_savepoint(&mut self, name: &str) {
        self.savepoints.retain(|(n, _)| n != name);
        self.savepoints.push((name.to_string(), self.undo.len()));
    }

    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| err!(Transaction, "SAVEPOINT {} does not exist", name))
    }

    /// Undoes the work done after the savepoint and discards later ones.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.savepoint_position(name)?;
        let mark = self.savepoints[pos].1;
        self.savepoints.truncate(pos + 1);
        self.undo_to(mark)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.savepoint_position(name)?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    pub fn savepoint_names(&self) -> Vec<&str> {
        self.savepoints.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Distinct changed rows with their first before-image, in the order
    /// they were first touched.
    pub fn touched(&self) -> Vec<&Undo> {
        let mut seen = HashSet::new();
        let mut touched = Vec::new();
        for undo in &self.undo {
            if seen.insert((undo.share.identifier.cache_key(), undo.key.clone())) {
                touched.push(undo);
            }
        }
        touched
    }

    /// The changes as the log records them; after-images are read from the
    /// visible rows, which this transaction holds locked.
    pub fn changes(&self) -> Vec<LoggedChange> {
        self.touched()
            .into_iter()
            .map(|u| LoggedChange {
                schema: u.share.identifier.schema().to_string(),
                table: u.share.identifier.table().to_string(),
                key: u.key.clone(),
                before: u.before.clone(),
                after: u.share.data().rows.get(&u.key).cloned(),
            })
            .collect()
    }

    /// Every share this transaction changed, once each.
    pub fn shares(&self) -> Vec<Arc<TableShare>> {
        let mut seen = HashSet::new();
        self.undo
            .iter()
            .filter(|u| seen.insert(u.share.identifier.cache_key()))
            .map(|u| u.share.clone())
            .collect()
    }

    /// Forgets the transaction's work and marks, returning its locks.
    pub fn end(&mut self) -> HashSet<LockKey> {
        self.undo.clear();
        self.savepoints.clear();
        self.statement_mark = 0;
        self.prepared = None;
        std::mem::take(&mut self.locks)
    }
}
