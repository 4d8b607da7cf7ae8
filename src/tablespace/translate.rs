//! Index number translation between the table's declared indexes and the
//! engine's own catalog. Built on first index access of a cursor and
//! rebuilt when the definition changes underneath it.

use super::catalog::NativeCatalog;
use crate::engine::OpenTable;
use crate::errors::Result;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTranslation {
    version: u64,
    /// Native index number for each declared index.
    native: Vec<usize>,
}

impl IndexTranslation {
    pub fn build(table: &OpenTable, catalog: &NativeCatalog) -> Result<Self> {
        let mut native = Vec::with_capacity(table.keys.len());
        for key in &table.keys {
            let number = catalog
                .find(&key.name)
                .ok_or_else(|| err!(Schema, "Index '{}' of '{}' missing from the engine catalog", key.name, table.identifier))?;
            let index = &catalog.indexes[number];
            if index.parts.len() != key.parts.len() || index.unique != key.unique {
                return Err(err!(Schema, "Index '{}' of '{}' differs from the engine catalog", key.name, table.identifier));
            }
            for (part, native_part) in key.parts.iter().zip(&index.parts) {
                let field = table.fields.field(part.field);
                let column = catalog
                    .columns
                    .get(native_part.column)
                    .ok_or_else(|| err!(Corrupt, "Engine catalog of '{}' lost a column", table.identifier))?;
                if part.field != native_part.column || column.kind != *field.kind() || column.nullable != field.is_nullable() {
                    return Err(err!(
                        Schema,
                        "Column '{}' of index '{}' has a different type in the engine catalog",
                        field.name(),
                        key.name
                    ));
                }
            }
            native.push(number);
        }
        debug!(table = %table.identifier, indexes = native.len(), "Built index translation");
        Ok(IndexTranslation {
            version: table.definition.version,
            native,
        })
    }

    /// Whether the translation still matches the table.
    pub fn is_current(&self, table: &OpenTable) -> bool {
        self.version == table.definition.version && self.native.len() == table.keys.len()
    }

    pub fn native(&self, index: usize) -> Option<usize> {
        self.native.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec, IndexSpec, TableDefinition, TableIdentifier};
    use std::sync::Arc;

    fn open(def: &TableDefinition) -> OpenTable {
        OpenTable::new(TableIdentifier::of(def).unwrap(), Arc::new(def.clone())).unwrap()
    }

    fn definition() -> TableDefinition {
        TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Varchar { length: 8 }))
            .index(IndexSpec::index("zz", &["b"]))
            .index(IndexSpec::primary(&["a"]))
            .index(IndexSpec::index("bb", &["b", "a"]))
    }

    #[test]
    fn test_declared_order_maps_to_native_numbers() {
        let def = definition();
        let catalog = NativeCatalog::build(&def).unwrap();
        let translation = IndexTranslation::build(&open(&def), &catalog).unwrap();
        assert_eq!(translation.native(0), Some(2));
        assert_eq!(translation.native(1), Some(0));
        assert_eq!(translation.native(2), Some(1));
        assert_eq!(translation.native(3), None);
    }

    #[test]
    fn test_type_mismatch_rejected_and_staleness_detected() {
        let def = definition();
        let mut catalog = NativeCatalog::build(&def).unwrap();
        catalog.columns[1].kind = ColumnKind::Varchar { length: 9 };
        assert!(matches!(
            IndexTranslation::build(&open(&def), &catalog),
            Err(crate::errors::Error::Schema(_))
        ));

        let catalog = NativeCatalog::build(&def).unwrap();
        let translation = IndexTranslation::build(&open(&def), &catalog).unwrap();
        let altered = def.drop_index("zz").unwrap();
        assert!(!translation.is_current(&open(&altered)));
    }
}
