//! The contract every storage engine implements.
//!
//! An engine is a process-wide object registered once with the
//! [`EngineRegistry`]. Table and schema lifecycle plus transaction boundaries
//! go through [`StorageEngine`]; row access goes through a [`Cursor`] bound
//! to one open table and one [`TransactionContext`].

pub mod ddl;
pub mod registry;

pub use registry::EngineRegistry;

use crate::definition::{SchemaDefinition, TableDefinition, TableIdentifier};
use crate::errors::Result;
use crate::key::KeyInfo;
use crate::row::{FieldSet, RowBuffer};
use crate::transaction::{StartOptions, TransactionContext, Xid};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Fixed set of engine capability flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const TRANSACTIONS: Capabilities = Capabilities(1);
    pub const SAVEPOINTS: Capabilities = Capabilities(1 << 1);
    pub const TWO_PHASE_COMMIT: Capabilities = Capabilities(1 << 2);
    pub const FOREIGN_KEYS: Capabilities = Capabilities(1 << 3);
    pub const REQUIRES_PRIMARY_KEY: Capabilities = Capabilities(1 << 4);
    pub const NO_PREFIX_CHAR_KEYS: Capabilities = Capabilities(1 << 5);
    pub const NULL_IN_KEY: Capabilities = Capabilities(1 << 6);
    pub const AUTO_INCREMENT: Capabilities = Capabilities(1 << 7);
    pub const TEMPORARY_TABLES: Capabilities = Capabilities(1 << 8);

    const NAMES: [(Capabilities, &'static str); 9] = [
        (Capabilities::TRANSACTIONS, "TRANSACTIONS"),
        (Capabilities::SAVEPOINTS, "SAVEPOINTS"),
        (Capabilities::TWO_PHASE_COMMIT, "TWO_PHASE_COMMIT"),
        (Capabilities::FOREIGN_KEYS, "FOREIGN_KEYS"),
        (Capabilities::REQUIRES_PRIMARY_KEY, "REQUIRES_PRIMARY_KEY"),
        (Capabilities::NO_PREFIX_CHAR_KEYS, "NO_PREFIX_CHAR_KEYS"),
        (Capabilities::NULL_IN_KEY, "NULL_IN_KEY"),
        (Capabilities::AUTO_INCREMENT, "AUTO_INCREMENT"),
        (Capabilities::TEMPORARY_TABLES, "TEMPORARY_TABLES"),
    ];

    pub const fn empty() -> Self {
        Capabilities(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// `|` usable in constants.
    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Capabilities::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Capabilities({})", names.join(" | "))
    }
}

/// A table opened for row access: its definition with the derived column
/// layout and key descriptors. Each open gets its own copy.
#[derive(Debug)]
pub struct OpenTable {
    pub identifier: TableIdentifier,
    pub definition: Arc<TableDefinition>,
    pub fields: FieldSet,
    pub keys: Vec<KeyInfo>,
}

impl OpenTable {
    pub fn new(identifier: TableIdentifier, definition: Arc<TableDefinition>) -> Result<Self> {
        let fields = FieldSet::new(&definition)?;
        let keys = KeyInfo::for_definition(&definition, &fields)?;
        Ok(OpenTable {
            identifier,
            definition,
            fields,
            keys,
        })
    }

    pub fn key(&self, index: usize) -> Result<&KeyInfo> {
        self.keys
            .get(index)
            .ok_or_else(|| err!(NotFound, "Index {} doesn't exist in '{}'", index, self.identifier))
    }
}

/// How `index_read` positions against a key image covering leading parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindFlag {
    /// First entry equal to the key.
    Exact,
    /// First entry equal to or after the key.
    KeyOrNext,
    /// First entry strictly after the key.
    After,
    /// Like `Exact`, and later `index_next` calls stop once entries no
    /// longer match.
    Prefix,
}

/// One storage engine. Implementations are shared between sessions and
/// must be thread safe.
pub trait StorageEngine: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Loads persistent state and resolves anything a crash left half done.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Creates the table and every declared index, or nothing at all.
    fn create_table(
        &self,
        trx: &TransactionContext,
        identifier: &TableIdentifier,
        definition: &TableDefinition,
    ) -> Result<()>;

    fn drop_table(&self, trx: &TransactionContext, identifier: &TableIdentifier) -> Result<()>;

    fn rename_table(&self, trx: &TransactionContext, from: &TableIdentifier, to: &TableIdentifier) -> Result<()>;

    /// Rebuilds the table for a new definition of the same name.
    fn alter_table(
        &self,
        _trx: &TransactionContext,
        identifier: &TableIdentifier,
        _from: &TableDefinition,
        _to: &TableDefinition,
    ) -> Result<()> {
        Err(err!(Unsupported, "Engine '{}' cannot alter '{}'", self.name(), identifier))
    }

    fn does_table_exist(&self, identifier: &TableIdentifier) -> bool;

    /// The engine's own copy of a definition, for engines that keep one.
    fn get_table_definition(&self, _identifier: &TableIdentifier) -> Result<Option<TableDefinition>> {
        Ok(None)
    }

    fn table_names(&self, schema: &str) -> Result<Vec<String>>;

    fn create_schema(&self, _schema: &SchemaDefinition) -> Result<()> {
        Ok(())
    }

    fn drop_schema(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn alter_schema(&self, _schema: &SchemaDefinition) -> Result<()> {
        Ok(())
    }

    fn start_transaction(&self, trx: &TransactionContext, options: &StartOptions) -> Result<()>;

    fn start_statement(&self, _trx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    fn end_statement(&self, _trx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    /// `all == false` ends only the current statement's work.
    fn commit(&self, trx: &TransactionContext, all: bool) -> Result<()>;

    fn rollback(&self, trx: &TransactionContext, all: bool) -> Result<()>;

    fn set_savepoint(&self, _trx: &TransactionContext, _name: &str) -> Result<()> {
        Err(err!(Unsupported, "Engine '{}' does not support savepoints", self.name()))
    }

    fn rollback_to_savepoint(&self, _trx: &TransactionContext, _name: &str) -> Result<()> {
        Err(err!(Unsupported, "Engine '{}' does not support savepoints", self.name()))
    }

    fn release_savepoint(&self, _trx: &TransactionContext, _name: &str) -> Result<()> {
        Err(err!(Unsupported, "Engine '{}' does not support savepoints", self.name()))
    }

    /// First phase of two-phase commit. Afterwards the work survives a
    /// restart until it is resolved by xid.
    fn prepare(&self, _trx: &TransactionContext, _xid: &Xid) -> Result<()> {
        Err(err!(Unsupported, "Engine '{}' does not support two-phase commit", self.name()))
    }

    fn commit_by_xid(&self, xid: &Xid) -> Result<()> {
        Err(err!(NotFound, "XID {} unknown to engine '{}'", xid, self.name()))
    }

    fn rollback_by_xid(&self, xid: &Xid) -> Result<()> {
        Err(err!(NotFound, "XID {} unknown to engine '{}'", xid, self.name()))
    }

    /// Prepared transactions waiting for a decision.
    fn recover(&self) -> Result<Vec<Xid>> {
        Ok(Vec::new())
    }

    /// The session is going away; anything still open must be rolled back.
    fn close_connection(&self, _trx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    fn create_cursor(&self, table: Arc<OpenTable>, trx: Arc<TransactionContext>) -> Result<Box<dyn Cursor>>;
}

/// A stateful handle on one open table inside one transaction.
///
/// Row reads return `Ok(false)` at the end of the scan. Writes take the row
/// by mutable reference so generated values (auto-increment) are visible to
/// the caller afterwards.
pub trait Cursor: Send {
    fn table(&self) -> &Arc<OpenTable>;

    fn rnd_init(&mut self) -> Result<()>;

    fn rnd_next(&mut self, row: &mut RowBuffer) -> Result<bool>;

    /// Reference to the current row, usable with [`Cursor::rnd_pos`].
    fn position(&self) -> Result<Vec<u8>>;

    fn rnd_pos(&mut self, row: &mut RowBuffer, position: &[u8]) -> Result<bool>;

    fn index_init(&mut self, index: usize) -> Result<()>;

    fn index_read(&mut self, row: &mut RowBuffer, key: &[u8], flag: FindFlag) -> Result<bool>;

    fn index_first(&mut self, row: &mut RowBuffer) -> Result<bool>;

    fn index_next(&mut self, row: &mut RowBuffer) -> Result<bool>;

    fn index_end(&mut self) -> Result<()>;

    fn write_row(&mut self, row: &mut RowBuffer) -> Result<()>;

    fn update_row(&mut self, old: &RowBuffer, new: &mut RowBuffer) -> Result<()>;

    fn delete_row(&mut self, row: &RowBuffer) -> Result<()>;

    /// Hint that about `rows` rows follow.
    fn start_bulk_insert(&mut self, _rows: usize) -> Result<()> {
        Ok(())
    }

    fn end_bulk_insert(&mut self) -> Result<()> {
        Ok(())
    }

    /// Columns the caller will read. Others may be left unset in returned
    /// rows.
    fn set_read_set(&mut self, _columns: &[usize]) {}

    fn records(&mut self) -> Result<u64>;

    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::TRANSACTIONS | Capabilities::SAVEPOINTS;
        assert!(caps.contains(Capabilities::TRANSACTIONS));
        assert!(!caps.contains(Capabilities::TWO_PHASE_COMMIT));
        assert!(caps.contains(Capabilities::empty()));
        assert_eq!(format!("{:?}", caps), "Capabilities(TRANSACTIONS | SAVEPOINTS)");
    }
}
