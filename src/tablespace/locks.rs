//! Exclusive row locks with lock-wait timeout and deadlock detection.

use crate::errors::Result;
use crate::transaction::TransactionContext;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A row: the table's cache key and the row's clustered key.
pub type LockKey = (String, Vec<u8>);

/// How often a waiter wakes up to look at its kill flag.
const KILL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct LockTable {
    holders: HashMap<LockKey, Uuid>,
    /// Wait-for graph: waiting owner to the owner it waits for.
    waits: HashMap<Uuid, Uuid>,
}

impl LockTable {
    /// Whether `holder` waits, directly or through others, for `requester`.
    fn leads_to(&self, holder: Uuid, requester: Uuid) -> bool {
        let mut seen = HashSet::new();
        let mut current = holder;
        while let Some(&next) = self.waits.get(&current) {
            if next == requester {
                return true;
            }
            if !seen.insert(next) {
                return false;
            }
            current = next;
        }
        false
    }
}

#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        LockManager {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the lock for `owner`, waiting for the current holder up to the
    /// lock-wait timeout. Returns whether the lock is newly taken.
    pub fn acquire(&self, owner: Uuid, key: &LockKey, trx: &TransactionContext) -> Result<bool> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table();
        loop {
            let holder = match table.holders.get(key) {
                None => {
                    table.holders.insert(key.clone(), owner);
                    table.waits.remove(&owner);
                    return Ok(true);
                }
                Some(&holder) if holder == owner => return Ok(false),
                Some(&holder) => holder,
            };

            if table.leads_to(holder, owner) {
                table.waits.remove(&owner);
                warn!(table = %key.0.replace('\0', "."), "Deadlock detected, rolling back requester");
                return Err(err!(Deadlock, "Deadlock found when trying to get lock; try restarting transaction"));
            }
            table.waits.insert(owner, holder);

            if let Err(e) = trx.check_killed() {
                table.waits.remove(&owner);
                return Err(e);
            }
            let now = Instant::now();
            if now >= deadline {
                table.waits.remove(&owner);
                debug!(table = %key.0.replace('\0', "."), "Lock wait timeout");
                return Err(err!(LockWaitTimeout, "Lock wait timeout exceeded; try restarting transaction"));
            }
            let wait = (deadline - now).min(KILL_POLL);
            table = self
                .released
                .wait_timeout(table, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Takes a lock nobody else may hold, used for rows of recovered
    /// prepared transactions.
    pub fn grant(&self, owner: Uuid, key: LockKey) {
        self.table().holders.insert(key, owner);
    }

    pub fn release(&self, owner: Uuid, keys: impl IntoIterator<Item = LockKey>) {
        let mut table = self.table();
        for key in keys {
            if table.holders.get(&key) == Some(&owner) {
                table.holders.remove(&key);
            }
        }
        table.waits.remove(&owner);
        drop(table);
        self.released.notify_all();
    }

    pub fn holder(&self, key: &LockKey) -> Option<Uuid> {
        self.table().holders.get(key).copied()
    }

    /// Moves every lock held by `from` to `to`.
    pub fn transfer(&self, from: Uuid, to: Uuid) {
        let mut table = self.table();
        for holder in table.holders.values_mut() {
            if *holder == from {
                *holder = to;
            }
        }
    }
}
