use crate::definition::TableDefinition;
use crate::errors::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Process-wide cache of parsed table definitions keyed by
/// [`TableIdentifier::cache_key`](crate::definition::TableIdentifier::cache_key).
///
/// For durable tables it is a read-through copy of the definition file; for
/// temporary tables it holds the only copy. The lock is held for map access
/// only, never across a load.
#[derive(Debug)]
pub struct DefinitionCache {
    entries: Mutex<HashMap<String, Arc<TableDefinition>>>,
    capacity: usize,
}

impl DefinitionCache {
    pub fn new(capacity: usize) -> Self {
        DefinitionCache {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<TableDefinition>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Arc<TableDefinition>> {
        self.entries().get(key).cloned()
    }

    /// Inserts unless the key is present and returns the cached entry.
    /// Losing an insert race is not an error: the first definition stays.
    pub fn insert(&self, key: &str, definition: TableDefinition) -> Arc<TableDefinition> {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(key) {
            return existing.clone();
        }
        let definition = Arc::new(definition);
        entries.insert(key.to_string(), definition.clone());
        if entries.len() > self.capacity {
            warn!(entries = entries.len(), capacity = self.capacity, "Table definition cache over capacity");
        }
        debug!(table = %key.replace('\0', "."), "Cached table definition");
        definition
    }

    pub fn remove(&self, key: &str) -> Option<Arc<TableDefinition>> {
        let removed = self.entries().remove(key);
        if removed.is_some() {
            debug!(table = %key.replace('\0', "."), "Evicted table definition");
        }
        removed
    }

    /// Cached entry, or the result of `load` inserted once.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<TableDefinition>>
    where
        F: FnOnce() -> Result<TableDefinition>,
    {
        if let Some(found) = self.get(key) {
            return Ok(found);
        }
        let loaded = load()?;
        Ok(self.insert(key, loaded))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
