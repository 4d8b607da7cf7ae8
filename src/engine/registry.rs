use super::ddl::check_capabilities;
use super::{Capabilities, OpenTable, StorageEngine};
use crate::config::Config;
use crate::definition::{
    self, SchemaDefinition, TableDefinition, TableIdentifier, DEFINITION_FILE_EXT,
};
use crate::definition_cache::DefinitionCache;
use crate::errors::{Error, Result};
use crate::transaction::{TransactionContext, Xid};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// The set of storage engines known to the process, built once at startup
/// and passed to whatever needs to resolve an engine by name.
pub struct EngineRegistry {
    config: Config,
    engines: RwLock<Vec<Arc<dyn StorageEngine>>>,
    cache: DefinitionCache,
}

impl EngineRegistry {
    pub fn new(config: Config) -> Self {
        let cache = DefinitionCache::new(config.table_definition_cache_size);
        EngineRegistry {
            config,
            engines: RwLock::new(Vec::new()),
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &DefinitionCache {
        &self.cache
    }

    fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn add(&self, engine: Arc<dyn StorageEngine>) -> Result<()> {
        let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
        if engines.iter().any(|e| e.name().eq_ignore_ascii_case(engine.name())) {
            return Err(err!(AlreadyExists, "Storage engine '{}' already registered", engine.name()));
        }
        info!(engine = engine.name(), capabilities = ?engine.capabilities(), "Registered storage engine");
        engines.push(engine);
        Ok(())
    }

    pub fn engines(&self) -> Vec<Arc<dyn StorageEngine>> {
        self.engines.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn StorageEngine>> {
        self.engines()
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
    }

    fn engine(&self, name: &str) -> Result<Arc<dyn StorageEngine>> {
        let name = if name.is_empty() { &self.config.default_engine } else { name };
        self.find_by_name(name)
            .ok_or_else(|| err!(NotFound, "Unknown storage engine '{}'", name))
    }

    pub fn default_engine(&self) -> Result<Arc<dyn StorageEngine>> {
        self.engine(&self.config.default_engine)
    }

    /// Initializes every engine, then drops definition files no engine
    /// backs any more and temporary files an interrupted write left behind.
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        for engine in self.engines() {
            engine.init()?;
            info!(engine = engine.name(), "Initialized storage engine");
        }
        self.reconcile()
    }

    fn reconcile(&self) -> Result<()> {
        for schema in self.schema_names()? {
            let dir = self.data_dir().join(&schema);
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("tmp") => {
                        warn!(path = %path.display(), "Removing interrupted write");
                        std::fs::remove_file(&path)?;
                    }
                    Some(DEFINITION_FILE_EXT) => self.reconcile_definition(&path)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn reconcile_definition(&self, path: &Path) -> Result<()> {
        let def = match definition::read_definition(path) {
            Ok(def) => def,
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable definition. {}", e);
                return Ok(());
            }
        };
        let id = TableIdentifier::of(&def)?;
        let backed = self
            .find_by_name(&def.engine)
            .map(|engine| engine.does_table_exist(&id))
            .unwrap_or(false);
        if !backed {
            warn!(table = %id, engine = %def.engine, "Removing definition of a table no engine holds");
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        let mut failure = None;
        for engine in self.engines() {
            match engine.shutdown() {
                Ok(()) => info!(engine = engine.name(), "Shut down storage engine"),
                Err(e) => {
                    warn!(engine = engine.name(), "Shutdown failed. {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    pub fn schema_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.data_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join(definition::SCHEMA_FILE_NAME).exists() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn create_schema(&self, schema: &SchemaDefinition) -> Result<()> {
        definition::check_identifier("schema", &schema.name)?;
        let dir = self.data_dir().join(&schema.name);
        if dir.join(definition::SCHEMA_FILE_NAME).exists() {
            return Err(err!(AlreadyExists, "Can't create schema '{}'; schema exists", schema.name));
        }
        std::fs::create_dir_all(&dir)?;
        definition::write_schema(&dir, schema)?;
        for engine in self.engines() {
            engine.create_schema(schema)?;
        }
        info!(schema = %schema.name, "Created schema");
        Ok(())
    }

    pub fn get_schema(&self, name: &str) -> Result<SchemaDefinition> {
        definition::read_schema(&self.data_dir().join(name.to_ascii_lowercase()))
    }

    pub fn alter_schema(&self, schema: &SchemaDefinition) -> Result<()> {
        let dir = self.data_dir().join(&schema.name);
        definition::read_schema(&dir)?;
        definition::write_schema(&dir, schema)?;
        for engine in self.engines() {
            engine.alter_schema(schema)?;
        }
        info!(schema = %schema.name, "Altered schema");
        Ok(())
    }

    /// Drops every table of the schema, then the schema itself.
    pub fn drop_schema(&self, trx: &TransactionContext, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let dir = self.data_dir().join(&name);
        definition::read_schema(&dir)?;
        for table in self.table_names(&name)? {
            self.drop_table(trx, &TableIdentifier::new(&name, &table)?)?;
        }
        for engine in self.engines() {
            engine.drop_schema(&name)?;
        }
        std::fs::remove_dir_all(&dir)?;
        info!(schema = %name, "Dropped schema");
        Ok(())
    }

    /// Creates a table through its engine. Durable tables get their
    /// definition file first; it is removed again if the engine fails.
    pub fn create_table(
        &self,
        trx: &TransactionContext,
        identifier: &TableIdentifier,
        mut def: TableDefinition,
    ) -> Result<()> {
        if def.engine.is_empty() {
            def.engine = self.config.default_engine.clone();
        }
        def.schema = identifier.schema().to_string();
        def.name = identifier.table().to_string();
        if identifier.is_temporary() {
            def = def.temporary();
        }
        def.validate()?;
        let engine = self.engine(&def.engine)?;
        check_capabilities(engine.name(), engine.capabilities(), &def)?;
        if self.does_table_exist(identifier) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", identifier));
        }
        if !identifier.is_temporary() {
            definition::read_schema(&identifier.schema_path(self.data_dir()))?;
        }

        info!(table = %identifier, engine = engine.name(), "Creating table");
        if identifier.is_temporary() {
            engine.create_table(trx, identifier, &def)?;
            self.cache.insert(&identifier.cache_key(), def);
            return Ok(());
        }

        let path = identifier.definition_path(self.data_dir());
        definition::write_definition(&path, &def)?;
        if let Err(e) = engine.create_table(trx, identifier, &def) {
            warn!(table = %identifier, "Create failed, removing definition. {}", e);
            remove_if_exists(&path)?;
            return Err(e);
        }
        info!(table = %identifier, "Created table");
        Ok(())
    }

    pub fn drop_table(&self, trx: &TransactionContext, identifier: &TableIdentifier) -> Result<()> {
        let def = self.get_table_definition(identifier)?;
        let engine = self.engine(&def.engine)?;
        engine.drop_table(trx, identifier)?;
        if !identifier.is_temporary() {
            remove_if_exists(&identifier.definition_path(self.data_dir()))?;
        }
        self.cache.remove(&identifier.cache_key());
        info!(table = %identifier, "Dropped table");
        Ok(())
    }

    pub fn rename_table(&self, trx: &TransactionContext, from: &TableIdentifier, to: &TableIdentifier) -> Result<()> {
        if from.is_temporary() != to.is_temporary() {
            return Err(err!(Unsupported, "Cannot rename between temporary and durable tables"));
        }
        let def = self.get_table_definition(from)?;
        if self.does_table_exist(to) {
            return Err(err!(AlreadyExists, "Table '{}' already exists", to));
        }
        let engine = self.engine(&def.engine)?;
        let renamed = def.renamed(to);

        if from.is_temporary() {
            engine.rename_table(trx, from, to)?;
            self.cache.remove(&from.cache_key());
            self.cache.insert(&to.cache_key(), renamed);
            return Ok(());
        }

        definition::read_schema(&to.schema_path(self.data_dir()))?;
        let new_path = to.definition_path(self.data_dir());
        definition::write_definition(&new_path, &renamed)?;
        if let Err(e) = engine.rename_table(trx, from, to) {
            warn!(from = %from, to = %to, "Rename failed, removing new definition. {}", e);
            remove_if_exists(&new_path)?;
            return Err(e);
        }
        remove_if_exists(&from.definition_path(self.data_dir()))?;
        self.cache.remove(&from.cache_key());
        info!(from = %from, to = %to, "Renamed table");
        Ok(())
    }

    /// Replaces a table's definition with `to`, which must describe the same
    /// table. The engine rebuilds first; the cached and persisted copies
    /// follow.
    pub fn alter_table(&self, trx: &TransactionContext, identifier: &TableIdentifier, to: TableDefinition) -> Result<()> {
        let from = self.get_table_definition(identifier)?;
        if to.schema != from.schema || to.name != from.name || !to.engine.eq_ignore_ascii_case(&from.engine) {
            return Err(err!(Unsupported, "ALTER cannot move '{}' or change its engine", identifier));
        }
        to.validate()?;
        let engine = self.engine(&from.engine)?;
        check_capabilities(engine.name(), engine.capabilities(), &to)?;
        engine.alter_table(trx, identifier, &from, &to)?;
        self.cache.remove(&identifier.cache_key());
        if identifier.is_temporary() {
            self.cache.insert(&identifier.cache_key(), to);
        } else {
            definition::write_definition(&identifier.definition_path(self.data_dir()), &to)?;
        }
        info!(table = %identifier, version = from.version, "Altered table");
        Ok(())
    }

    pub fn does_table_exist(&self, identifier: &TableIdentifier) -> bool {
        if self.cache.get(&identifier.cache_key()).is_some() {
            return true;
        }
        if identifier.is_temporary() {
            return false;
        }
        self.engines().iter().any(|e| e.does_table_exist(identifier))
    }

    /// Live cache first, then any engine holding its own copy, then the
    /// definition file. `NotFound` and `Corrupt` stay distinct.
    pub fn get_table_definition(&self, identifier: &TableIdentifier) -> Result<Arc<TableDefinition>> {
        let key = identifier.cache_key();
        if let Some(found) = self.cache.get(&key) {
            return Ok(found);
        }
        if identifier.is_temporary() {
            return Err(err!(NotFound, "Table '{}' doesn't exist", identifier));
        }
        self.cache.get_or_load(&key, || {
            for engine in self.engines() {
                if let Some(def) = engine.get_table_definition(identifier)? {
                    debug!(table = %identifier, engine = engine.name(), "Definition from engine");
                    return Ok(def);
                }
            }
            let path = identifier.definition_path(self.data_dir());
            definition::read_definition(&path).map_err(|e| match e {
                Error::NotFound(_) => err!(NotFound, "Table '{}' doesn't exist", identifier),
                other => other,
            })
        })
    }

    pub fn table_names(&self, schema: &str) -> Result<Vec<String>> {
        let schema = schema.to_ascii_lowercase();
        let mut names = BTreeSet::new();
        for engine in self.engines() {
            names.extend(engine.table_names(&schema)?);
        }
        Ok(names.into_iter().collect())
    }

    /// Opens a table for row access and returns it with its engine.
    pub fn open_table(&self, identifier: &TableIdentifier) -> Result<(Arc<dyn StorageEngine>, Arc<OpenTable>)> {
        let def = self.get_table_definition(identifier)?;
        let engine = self.engine(&def.engine)?;
        if !engine.does_table_exist(identifier) {
            return Err(err!(NotFound, "Table '{}' doesn't exist in engine '{}'", identifier, engine.name()));
        }
        let table = OpenTable::new(identifier.clone(), def)?;
        Ok((engine, Arc::new(table)))
    }

    fn two_phase_engines(&self) -> Vec<Arc<dyn StorageEngine>> {
        self.engines()
            .into_iter()
            .filter(|e| e.capabilities().contains(Capabilities::TWO_PHASE_COMMIT))
            .collect()
    }

    /// Prepared transactions of every engine, waiting for a decision.
    pub fn xa_recover(&self) -> Result<Vec<Xid>> {
        let mut xids = BTreeSet::new();
        for engine in self.two_phase_engines() {
            let found = engine.recover()?;
            if !found.is_empty() {
                info!(engine = engine.name(), prepared = found.len(), "Found prepared transactions");
            }
            xids.extend(found);
        }
        Ok(xids.into_iter().collect())
    }

    /// Commits or rolls back `xid` on every engine that prepared it.
    pub fn resolve_by_xid(&self, xid: &Xid, commit: bool) -> Result<()> {
        let mut resolved = 0;
        let mut failure = None;
        for engine in self.two_phase_engines() {
            let result = if commit {
                engine.commit_by_xid(xid)
            } else {
                engine.rollback_by_xid(xid)
            };
            match result {
                Ok(()) => {
                    resolved += 1;
                    info!(%xid, engine = engine.name(), commit, "Resolved prepared transaction");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(%xid, engine = engine.name(), "Resolution failed. {}", e);
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if resolved == 0 {
            return Err(err!(NotFound, "XID {} is not prepared in any engine", xid));
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
