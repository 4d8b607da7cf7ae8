use crate::definition::{TableDefinition, TableIdentifier};
use crate::engine::{Capabilities, Cursor, EngineRegistry, StorageEngine};
use crate::errors::{Error, Result};
use crate::transaction::coordinator::{Coordinator, Participant};
use crate::transaction::{IsolationLevel, StartOptions, TransactionContext, Xid};
use crate::warnings::Warnings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cloneable handle another thread uses to kill a session.
#[derive(Debug, Clone)]
pub struct KillHandle(Arc<AtomicBool>);

impl KillHandle {
    pub fn kill(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One client connection: its per-engine transaction contexts, the
/// coordinator dispatching transaction boundaries to them, and the warnings
/// of the running statement.
pub struct Session {
    pub id: Uuid,
    registry: Arc<EngineRegistry>,
    isolation: IsolationLevel,
    killed: Arc<AtomicBool>,
    contexts: HashMap<String, Arc<TransactionContext>>,
    coordinator: Coordinator,
    options: StartOptions,
    in_statement: bool,
    xid_seq: u64,
    warnings: Warnings,
    temporary_tables: Vec<TableIdentifier>,
    closed: bool,
}

impl Session {
    pub fn open(registry: Arc<EngineRegistry>) -> Self {
        let isolation = registry.config().default_isolation;
        let session = Session {
            id: Uuid::new_v4(),
            registry,
            isolation,
            killed: Arc::new(AtomicBool::new(false)),
            contexts: HashMap::new(),
            coordinator: Coordinator::new(),
            options: StartOptions::default(),
            in_statement: false,
            xid_seq: 0,
            warnings: Warnings::default(),
            temporary_tables: Vec::new(),
            closed: false,
        };
        info!(session = %session.id, "Opened session");
        session
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Applies to transactions started afterwards.
    pub fn set_isolation(&mut self, level: IsolationLevel) {
        self.isolation = level;
        for trx in self.contexts.values() {
            if !trx.is_active() {
                trx.set_isolation(level);
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.coordinator.in_transaction()
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    pub fn warnings_mut(&mut self) -> &mut Warnings {
        &mut self.warnings
    }

    pub fn kill_handle(&self) -> KillHandle {
        KillHandle(self.killed.clone())
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// The transaction context of `engine`, created on first use and reused
    /// for the rest of the session.
    pub fn context(&mut self, engine: &str) -> Arc<TransactionContext> {
        let (id, isolation, killed) = (self.id, self.isolation, self.killed.clone());
        self.contexts
            .entry(engine.to_string())
            .or_insert_with(|| Arc::new(TransactionContext::new(id, engine, isolation, killed)))
            .clone()
    }

    /// Joins `engine` to the current transaction unless it already has.
    fn register(&mut self, engine: &Arc<dyn StorageEngine>) -> Result<Arc<TransactionContext>> {
        let trx = self.context(engine.name());
        if !engine.capabilities().contains(Capabilities::TRANSACTIONS)
            || self.coordinator.is_registered(engine.name())
        {
            return Ok(trx);
        }
        if !trx.is_active() {
            trx.begin(&self.options)?;
        }
        engine.start_transaction(&trx, &self.options)?;
        if self.in_statement {
            engine.start_statement(&trx)?;
        }
        self.coordinator.register(Participant {
            engine: engine.clone(),
            trx: trx.clone(),
        });
        Ok(trx)
    }

    /// Starts an explicit transaction, implicitly committing an open one.
    pub fn begin(&mut self, options: StartOptions) -> Result<()> {
        if self.coordinator.in_transaction() {
            self.commit()?;
        }
        self.options = options;
        self.coordinator.set_in_transaction(true);
        if options.consistent_snapshot {
            // A snapshot must exist before the first read, so every
            // transactional engine joins now.
            for engine in self.registry.engines() {
                self.register(&engine)?;
            }
        }
        debug!(session = %self.id, "Began transaction");
        Ok(())
    }

    fn next_xid(&mut self) -> Xid {
        self.xid_seq += 1;
        Xid::new(&format!("{}-{}", self.id.simple(), self.xid_seq))
    }

    pub fn commit(&mut self) -> Result<()> {
        let xid = self.next_xid();
        self.coordinator.commit(true, &xid)?;
        self.options = StartOptions::default();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let result = self.coordinator.rollback(true);
        self.options = StartOptions::default();
        result
    }

    pub fn set_savepoint(&mut self, name: &str) -> Result<()> {
        self.coordinator.set_savepoint(name)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.coordinator.rollback_to_savepoint(name)
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.coordinator.release_savepoint(name)
    }

    /// Brackets one statement; pairs with [`Session::end_statement`].
    pub fn start_statement(&mut self) -> Result<()> {
        self.warnings.clear();
        self.in_statement = true;
        for p in self.coordinator.participants() {
            p.engine.start_statement(&p.trx)?;
        }
        Ok(())
    }

    /// Ends the statement with its outcome: success commits it (the whole
    /// transaction under autocommit), failure rolls back as far as the error
    /// requires. A kill always rolls the transaction back and reports
    /// `Killed`.
    pub fn end_statement<T>(&mut self, outcome: Result<T>) -> Result<T> {
        self.in_statement = false;
        let xid = self.next_xid();
        if self.killed.swap(false, Ordering::SeqCst) {
            warn!(session = %self.id, "Session killed, rolling back");
            let _ = self.coordinator.rollback(true);
            return Err(match outcome {
                Err(e @ Error::Killed(_)) => e,
                _ => err!(Killed, "Query execution was interrupted"),
            });
        }
        let finished = self.coordinator.end_statement(outcome.as_ref().err(), &xid);
        match (outcome, finished) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Opens a table for row access inside the session's transaction.
    pub fn open_table(&mut self, identifier: &TableIdentifier) -> Result<Box<dyn Cursor>> {
        let identifier = self.resolve(identifier)?;
        let (engine, table) = self.registry.open_table(&identifier)?;
        let trx = self.register(&engine)?;
        engine.create_cursor(table, trx)
    }

    /// A session's temporary table shadows a durable one of the same name.
    fn resolve(&self, identifier: &TableIdentifier) -> Result<TableIdentifier> {
        if identifier.is_temporary() {
            return Ok(identifier.clone());
        }
        let temporary = TableIdentifier::temporary(identifier.schema(), identifier.table(), self.id)?;
        if self.temporary_tables.contains(&temporary) {
            Ok(temporary)
        } else {
            Ok(identifier.clone())
        }
    }

    fn engine_of(&self, identifier: &TableIdentifier) -> Result<String> {
        Ok(self.registry.get_table_definition(identifier)?.engine.clone())
    }

    /// DDL implicitly commits the open transaction first.
    fn implicit_commit(&mut self) -> Result<()> {
        if self.coordinator.in_transaction() || !self.coordinator.participants().is_empty() {
            self.commit()?;
        }
        Ok(())
    }

    pub fn create_table(&mut self, identifier: &TableIdentifier, definition: TableDefinition) -> Result<()> {
        self.implicit_commit()?;
        let engine = if definition.engine.is_empty() {
            self.registry.config().default_engine.clone()
        } else {
            definition.engine.clone()
        };
        let trx = self.context(&engine);
        self.registry.create_table(&trx, identifier, definition)
    }

    /// Creates a table visible to this session only and dropped when it
    /// closes.
    pub fn create_temporary_table(&mut self, definition: TableDefinition) -> Result<TableIdentifier> {
        let identifier = TableIdentifier::temporary(&definition.schema, &definition.name, self.id)?;
        let engine = if definition.engine.is_empty() {
            self.registry.config().default_engine.clone()
        } else {
            definition.engine.clone()
        };
        let trx = self.context(&engine);
        self.registry.create_table(&trx, &identifier, definition.temporary())?;
        self.temporary_tables.push(identifier.clone());
        Ok(identifier)
    }

    pub fn drop_table(&mut self, identifier: &TableIdentifier) -> Result<()> {
        self.implicit_commit()?;
        let identifier = self.resolve(identifier)?;
        let engine = self.engine_of(&identifier)?;
        let trx = self.context(&engine);
        self.registry.drop_table(&trx, &identifier)?;
        self.temporary_tables.retain(|t| t != &identifier);
        Ok(())
    }

    pub fn rename_table(&mut self, from: &TableIdentifier, to: &TableIdentifier) -> Result<()> {
        self.implicit_commit()?;
        let from = self.resolve(from)?;
        let to = if from.is_temporary() {
            TableIdentifier::temporary(to.schema(), to.table(), self.id)?
        } else {
            to.clone()
        };
        let engine = self.engine_of(&from)?;
        let trx = self.context(&engine);
        self.registry.rename_table(&trx, &from, &to)?;
        if let Some(entry) = self.temporary_tables.iter_mut().find(|t| **t == from) {
            *entry = to;
        }
        Ok(())
    }

    pub fn alter_table(&mut self, identifier: &TableIdentifier, to: TableDefinition) -> Result<()> {
        self.implicit_commit()?;
        let identifier = self.resolve(identifier)?;
        let engine = self.engine_of(&identifier)?;
        let trx = self.context(&engine);
        self.registry.alter_table(&trx, &identifier, to)
    }

    /// Rolls back anything still open, drops temporary tables and tells
    /// every engine the connection is gone. Every step runs even when an
    /// earlier one fails; the first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut failure = None;
        if !self.coordinator.participants().is_empty() || self.coordinator.in_transaction() {
            warn!(session = %self.id, "Closing session with an open transaction, rolling back");
            if let Err(e) = self.coordinator.rollback(true) {
                warn!(session = %self.id, "Rollback on close failed. {}", e);
                failure.get_or_insert(e);
            }
        }
        for identifier in std::mem::take(&mut self.temporary_tables) {
            let dropped = self.engine_of(&identifier).and_then(|engine| {
                let trx = self.context(&engine);
                self.registry.drop_table(&trx, &identifier)
            });
            if let Err(e) = dropped {
                warn!(table = %identifier, "Failed to drop temporary table. {}", e);
            }
        }
        for (name, trx) in self.contexts.drain() {
            if let Some(engine) = self.registry.find_by_name(&name) {
                if let Err(e) = engine.close_connection(&trx) {
                    warn!(session = %self.id, engine = %name, "Failed to close connection. {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        info!(session = %self.id, "Closed session");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(session = %self.id, "Failed to close dropped session. {}", e);
        }
    }
}
