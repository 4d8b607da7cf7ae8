//! The engine's own catalog of a table. It numbers indexes its own way:
//! the clustered index is always 0 and secondaries follow ordered by name.

use crate::definition::{ColumnKind, TableDefinition};
use crate::errors::Result;
use bincode::{Decode, Encode};

/// Name of the clustered index synthesized for tables without a primary key.
pub const HIDDEN_CLUSTERED: &str = "GEN_CLUST_INDEX";

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NativePart {
    /// Column position.
    pub column: usize,
    /// Prefix in characters.
    pub prefix: Option<u32>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NativeIndex {
    pub name: String,
    pub parts: Vec<NativePart>,
    pub clustered: bool,
    pub unique: bool,
    /// Keyed by the generated row id instead of columns.
    pub hidden: bool,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NativeCatalog {
    pub columns: Vec<NativeColumn>,
    pub indexes: Vec<NativeIndex>,
}

impl NativeCatalog {
    pub fn build(definition: &TableDefinition) -> Result<Self> {
        let columns = definition
            .columns
            .iter()
            .map(|c| NativeColumn {
                name: c.name.to_ascii_lowercase(),
                kind: c.kind.clone(),
                nullable: c.nullable,
            })
            .collect();

        let mut native = Vec::with_capacity(definition.indexes.len() + 1);
        let mut secondaries = Vec::new();
        for spec in &definition.indexes {
            let mut parts = Vec::with_capacity(spec.parts.len());
            for part in &spec.parts {
                let column = definition
                    .column_position(&part.column)
                    .ok_or_else(|| err!(Schema, "Key column '{}' doesn't exist in table", part.column))?;
                parts.push(NativePart {
                    column,
                    prefix: part.prefix,
                });
            }
            let index = NativeIndex {
                name: spec.name.clone(),
                parts,
                clustered: spec.primary,
                unique: spec.unique,
                hidden: false,
            };
            if spec.primary {
                native.push(index);
            } else {
                secondaries.push(index);
            }
        }
        if native.is_empty() {
            native.push(NativeIndex {
                name: HIDDEN_CLUSTERED.to_string(),
                parts: Vec::new(),
                clustered: true,
                unique: true,
                hidden: true,
            });
        }
        secondaries.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        native.extend(secondaries);
        Ok(NativeCatalog {
            columns,
            indexes: native,
        })
    }

    pub fn clustered(&self) -> &NativeIndex {
        &self.indexes[0]
    }

    pub fn has_hidden_key(&self) -> bool {
        self.indexes[0].hidden
    }

    pub fn secondary_count(&self) -> usize {
        self.indexes.len() - 1
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.indexes.iter().position(|i| i.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnSpec, IndexSpec};

    #[test]
    fn test_numbering() {
        let def = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::index("zeta", &["b"]))
            .index(IndexSpec::primary(&["a"]))
            .index(IndexSpec::index("alpha", &["b", "a"]));
        let catalog = NativeCatalog::build(&def).unwrap();
        let names: Vec<&str> = catalog.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["PRIMARY", "alpha", "zeta"]);
        assert!(!catalog.has_hidden_key());
        assert_eq!(catalog.find("ZETA"), Some(2));
    }

    #[test]
    fn test_hidden_clustered_key() {
        let def = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::index("a", &["a"]));
        let catalog = NativeCatalog::build(&def).unwrap();
        assert!(catalog.has_hidden_key());
        assert_eq!(catalog.clustered().name, HIDDEN_CLUSTERED);
        assert_eq!(catalog.secondary_count(), 1);
    }
}
