//! Checks a definition against what an engine declares it can store.

use super::Capabilities;
use crate::definition::TableDefinition;
use crate::errors::Result;

pub fn check_capabilities(engine: &str, capabilities: Capabilities, definition: &TableDefinition) -> Result<()> {
    if definition.is_temporary() && !capabilities.contains(Capabilities::TEMPORARY_TABLES) {
        return Err(err!(Unsupported, "Engine '{}' does not support temporary tables", engine));
    }
    if capabilities.contains(Capabilities::REQUIRES_PRIMARY_KEY) && definition.primary_key().is_none() {
        return Err(err!(Unsupported, "Engine '{}' requires a primary key on '{}'", engine, definition.name));
    }
    if definition.auto_increment_column().is_some() && !capabilities.contains(Capabilities::AUTO_INCREMENT) {
        return Err(err!(Unsupported, "Engine '{}' does not support AUTO_INCREMENT columns", engine));
    }
    for index in &definition.indexes {
        for part in &index.parts {
            let position = definition
                .column_position(&part.column)
                .ok_or_else(|| err!(Schema, "Key column '{}' doesn't exist in table", part.column))?;
            let column = &definition.columns[position];
            if part.prefix.is_some()
                && column.kind.is_string()
                && capabilities.contains(Capabilities::NO_PREFIX_CHAR_KEYS)
            {
                return Err(err!(
                    Unsupported,
                    "Engine '{}' does not support prefix keys on character column '{}'",
                    engine,
                    column.name
                ));
            }
            if column.nullable && !capabilities.contains(Capabilities::NULL_IN_KEY) {
                return Err(err!(
                    Unsupported,
                    "Engine '{}' does not support NULL in key '{}'; column '{}' is nullable",
                    engine,
                    index.name,
                    column.name
                ));
            }
        }
    }
    Ok(())
}

/// Transaction operations an engine without `TRANSACTIONS` must refuse.
pub fn require(engine: &str, capabilities: Capabilities, needed: Capabilities, what: &str) -> Result<()> {
    if capabilities.contains(needed) {
        Ok(())
    } else {
        Err(err!(Unsupported, "Engine '{}' does not support {}", engine, what))
    }
}
