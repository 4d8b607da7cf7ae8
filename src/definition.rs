use crate::charset;
use crate::encoding;
use crate::errors::{Error, Result};
use crate::key::MAX_KEY_PARTS;
use crate::row::FieldSet;
use bincode::{Decode, Encode};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// File extension of persisted table definitions.
pub const DEFINITION_FILE_EXT: &str = "dfe";
/// Schema option file name, one per schema directory.
pub const SCHEMA_FILE_NAME: &str = "db.opt";

pub const MAX_KEYS: usize = 64;
pub const MAX_DECIMAL_PRECISION: u8 = 38;
pub const MAX_DECIMAL_SCALE: u8 = 30;
pub const MAX_VARCHAR_BYTES: u32 = 65_535;

const DEFINITION_MAGIC: [u8; 4] = *b"TKDF";
const SCHEMA_MAGIC: [u8; 4] = *b"TKSC";
const DEFINITION_VERSION: u16 = 1;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z0-9_$]{1,64}$").unwrap();
}

pub fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(err!(Schema, "Incorrect {} name '{}'", kind, name))
    }
}

/// Persisted type tag of a column.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    TinyInt { unsigned: bool },
    SmallInt { unsigned: bool },
    Int { unsigned: bool },
    BigInt { unsigned: bool },
    Double,
    Decimal { precision: u8, scale: u8 },
    /// Length in characters.
    Char { length: u32 },
    /// Length in characters.
    Varchar { length: u32 },
    Blob,
    Text,
    Date,
    DateTime,
    Timestamp,
    Time,
    Enum { members: Vec<String> },
}

impl ColumnKind {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnKind::TinyInt { .. }
                | ColumnKind::SmallInt { .. }
                | ColumnKind::Int { .. }
                | ColumnKind::BigInt { .. }
        )
    }

    /// Character or byte string types, the only ones that accept a prefix
    /// length in an index.
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            ColumnKind::Char { .. } | ColumnKind::Varchar { .. } | ColumnKind::Blob | ColumnKind::Text
        )
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, ColumnKind::Blob | ColumnKind::Text)
    }

    /// Declared length in characters for character types.
    pub fn char_length(&self) -> Option<u32> {
        match self {
            ColumnKind::Char { length } | ColumnKind::Varchar { length } => Some(*length),
            ColumnKind::Blob | ColumnKind::Text => Some(MAX_VARCHAR_BYTES),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unsigned = |u: &bool| if *u { " UNSIGNED" } else { "" };
        match self {
            ColumnKind::TinyInt { unsigned: u } => write!(f, "TINYINT{}", unsigned(u)),
            ColumnKind::SmallInt { unsigned: u } => write!(f, "SMALLINT{}", unsigned(u)),
            ColumnKind::Int { unsigned: u } => write!(f, "INT{}", unsigned(u)),
            ColumnKind::BigInt { unsigned: u } => write!(f, "BIGINT{}", unsigned(u)),
            ColumnKind::Double => write!(f, "DOUBLE"),
            ColumnKind::Decimal { precision, scale } => write!(f, "DECIMAL({},{})", precision, scale),
            ColumnKind::Char { length } => write!(f, "CHAR({})", length),
            ColumnKind::Varchar { length } => write!(f, "VARCHAR({})", length),
            ColumnKind::Blob => write!(f, "BLOB"),
            ColumnKind::Text => write!(f, "TEXT"),
            ColumnKind::Date => write!(f, "DATE"),
            ColumnKind::DateTime => write!(f, "DATETIME"),
            ColumnKind::Timestamp => write!(f, "TIMESTAMP"),
            ColumnKind::Time => write!(f, "TIME"),
            ColumnKind::Enum { members } => write!(f, "ENUM('{}')", members.join("','")),
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Default value in text form, stored through the column on row creation.
    pub default: Option<String>,
    pub auto_increment: bool,
    pub charset: String,
    pub comment: String,
}

impl ColumnSpec {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        let charset = match kind {
            ColumnKind::Char { .. } | ColumnKind::Varchar { .. } | ColumnKind::Text | ColumnKind::Enum { .. } => {
                charset::UTF8MB4.name
            }
            _ => charset::BINARY.name,
        };
        ColumnSpec {
            name: name.to_string(),
            kind,
            nullable: true,
            default: None,
            auto_increment: false,
            charset: charset.to_string(),
            comment: String::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn charset(mut self, name: &str) -> Self {
        self.charset = name.to_string();
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct IndexPartSpec {
    pub column: String,
    /// Prefix length in characters; `None` indexes the whole value.
    pub prefix: Option<u32>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub parts: Vec<IndexPartSpec>,
    /// The clustering index. At most one per table.
    pub primary: bool,
    pub unique: bool,
    pub comment: String,
}

impl IndexSpec {
    pub fn primary(columns: &[&str]) -> Self {
        IndexSpec {
            name: "PRIMARY".to_string(),
            parts: parts_of(columns),
            primary: true,
            unique: true,
            comment: String::new(),
        }
    }

    pub fn unique(name: &str, columns: &[&str]) -> Self {
        IndexSpec {
            name: name.to_string(),
            parts: parts_of(columns),
            primary: false,
            unique: true,
            comment: String::new(),
        }
    }

    pub fn index(name: &str, columns: &[&str]) -> Self {
        IndexSpec {
            name: name.to_string(),
            parts: parts_of(columns),
            primary: false,
            unique: false,
            comment: String::new(),
        }
    }

    /// Restricts the part on `column` to its first `chars` characters.
    pub fn prefix(mut self, column: &str, chars: u32) -> Self {
        for part in self.parts.iter_mut() {
            if part.column.eq_ignore_ascii_case(column) {
                part.prefix = Some(chars);
            }
        }
        self
    }
}

fn parts_of(columns: &[&str]) -> Vec<IndexPartSpec> {
    columns
        .iter()
        .map(|c| IndexPartSpec {
            column: c.to_string(),
            prefix: None,
        })
        .collect()
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    Default,
    Dynamic,
    Compact,
    Redundant,
    Compressed,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    pub row_format: RowFormat,
    pub key_block_size: u32,
    pub comment: String,
    /// First value handed out by the auto-increment counter.
    pub auto_increment_value: u64,
    pub collation: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            row_format: RowFormat::Default,
            key_block_size: 0,
            comment: String::new(),
            auto_increment_value: 1,
            collation: charset::UTF8MB4.name.to_string(),
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Standard,
    /// Session-scoped; the definition lives only in the definition cache.
    Temporary,
}

/// Parsed schema record for one table.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: String,
    pub name: String,
    pub engine: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
    pub options: TableOptions,
    /// Bumped by every structural change.
    pub version: u64,
}

impl TableDefinition {
    pub fn new(schema: &str, name: &str) -> Self {
        TableDefinition {
            schema: schema.to_ascii_lowercase(),
            name: name.to_ascii_lowercase(),
            engine: String::new(),
            kind: TableKind::Standard,
            columns: Vec::new(),
            indexes: Vec::new(),
            options: TableOptions::default(),
            version: 1,
        }
    }

    pub fn engine(mut self, engine: &str) -> Self {
        self.engine = engine.to_string();
        self
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn temporary(mut self) -> Self {
        self.kind = TableKind::Temporary;
        self
    }

    pub fn options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == TableKind::Temporary
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index_position(&self, name: &str) -> Option<usize> {
        self.indexes
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// SQL-level number of the clustering index, if one is declared.
    pub fn primary_key(&self) -> Option<usize> {
        self.indexes.iter().position(|i| i.primary)
    }

    pub fn auto_increment_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.auto_increment)
    }

    /// Checks that the definition is internally consistent.
    pub fn validate(&self) -> Result<()> {
        check_identifier("schema", &self.schema)?;
        check_identifier("table", &self.name)?;
        if self.columns.is_empty() {
            return Err(err!(Schema, "Table '{}' must have at least one column", self.name));
        }

        let mut names = HashSet::new();
        let mut auto_increment = 0;
        for column in &self.columns {
            check_identifier("column", &column.name)?;
            if !names.insert(column.name.to_ascii_lowercase()) {
                return Err(err!(Schema, "Duplicate column name '{}'", column.name));
            }
            if charset::by_name(&column.charset).is_none() {
                return Err(err!(Schema, "Unknown character set '{}'", column.charset));
            }
            validate_kind(column)?;
            if column.auto_increment {
                auto_increment += 1;
                if !column.kind.is_integer() {
                    return Err(err!(Schema, "Incorrect column specifier for column '{}'", column.name));
                }
            }
        }
        if auto_increment > 1 {
            return Err(err!(Schema, "There can be only one auto column"));
        }

        if self.indexes.len() > MAX_KEYS {
            return Err(err!(Schema, "Too many keys specified; max {} keys allowed", MAX_KEYS));
        }
        let mut index_names = HashSet::new();
        let mut primaries = 0;
        for index in &self.indexes {
            if !index_names.insert(index.name.to_ascii_lowercase()) {
                return Err(err!(Schema, "Duplicate key name '{}'", index.name));
            }
            if index.primary {
                primaries += 1;
            }
            if index.parts.is_empty() || index.parts.len() > MAX_KEY_PARTS {
                return Err(err!(
                    Schema,
                    "Key '{}' must have between 1 and {} parts",
                    index.name,
                    MAX_KEY_PARTS
                ));
            }
            let mut seen = HashSet::new();
            for part in &index.parts {
                let pos = self.column_position(&part.column).ok_or_else(|| {
                    err!(Schema, "Key column '{}' doesn't exist in table", part.column)
                })?;
                if !seen.insert(pos) {
                    return Err(err!(Schema, "Duplicate column '{}' in key '{}'", part.column, index.name));
                }
                let column = &self.columns[pos];
                if index.primary && column.nullable {
                    return Err(err!(
                        Schema,
                        "All parts of a PRIMARY KEY must be NOT NULL; column '{}'",
                        column.name
                    ));
                }
                match part.prefix {
                    Some(prefix) => {
                        let max = column.kind.char_length().ok_or_else(|| {
                            err!(Schema, "Incorrect prefix key; column '{}' is not a string", column.name)
                        })?;
                        if prefix == 0 || prefix > max {
                            return Err(err!(Schema, "Incorrect prefix key on column '{}'", column.name));
                        }
                    }
                    None if column.kind.is_blob() => {
                        return Err(err!(
                            Schema,
                            "BLOB/TEXT column '{}' used in key specification without a key length",
                            column.name
                        ));
                    }
                    None => {}
                }
            }
        }
        if primaries > 1 {
            return Err(err!(Schema, "Multiple primary key defined"));
        }

        // Defaults must be storable without loss.
        FieldSet::new(self)?;
        Ok(())
    }

    pub fn add_column(&self, column: ColumnSpec) -> Result<TableDefinition> {
        let mut next = self.clone();
        next.columns.push(column);
        next.version += 1;
        next.validate()?;
        Ok(next)
    }

    pub fn drop_column(&self, name: &str) -> Result<TableDefinition> {
        let pos = self
            .column_position(name)
            .ok_or_else(|| err!(Schema, "Can't DROP '{}'; check that column exists", name))?;
        let mut next = self.clone();
        let removed = next.columns.remove(pos);
        // Indexes lose the dropped part; an index left empty disappears.
        for index in next.indexes.iter_mut() {
            index
                .parts
                .retain(|p| !p.column.eq_ignore_ascii_case(&removed.name));
        }
        next.indexes.retain(|i| !i.parts.is_empty());
        next.version += 1;
        next.validate()?;
        Ok(next)
    }

    pub fn add_index(&self, index: IndexSpec) -> Result<TableDefinition> {
        let mut next = self.clone();
        next.indexes.push(index);
        next.version += 1;
        next.validate()?;
        Ok(next)
    }

    pub fn drop_index(&self, name: &str) -> Result<TableDefinition> {
        let pos = self
            .index_position(name)
            .ok_or_else(|| err!(Schema, "Can't DROP '{}'; check that key exists", name))?;
        let mut next = self.clone();
        next.indexes.remove(pos);
        next.version += 1;
        next.validate()?;
        Ok(next)
    }

    /// Renamed copy, used when the table moves.
    pub fn renamed(&self, to: &TableIdentifier) -> TableDefinition {
        let mut next = self.clone();
        next.schema = to.schema().to_string();
        next.name = to.table().to_string();
        next
    }
}

fn validate_kind(column: &ColumnSpec) -> Result<()> {
    let mbmaxlen = charset::by_name(&column.charset)
        .map(|c| c.mbmaxlen)
        .unwrap_or(1) as u32;
    match &column.kind {
        ColumnKind::Decimal { precision, scale } => {
            if *precision == 0 || *precision > MAX_DECIMAL_PRECISION {
                return Err(err!(
                    Schema,
                    "Too big precision {} specified for column '{}'. Maximum is {}",
                    precision,
                    column.name,
                    MAX_DECIMAL_PRECISION
                ));
            }
            if scale > precision || *scale > MAX_DECIMAL_SCALE {
                return Err(err!(Schema, "Incorrect scale {} for column '{}'", scale, column.name));
            }
        }
        ColumnKind::Char { length } => {
            if *length == 0 || length * mbmaxlen > 255 * 4 {
                return Err(err!(Schema, "Column length too big for column '{}'", column.name));
            }
        }
        ColumnKind::Varchar { length } => {
            if *length == 0 || length * mbmaxlen > MAX_VARCHAR_BYTES {
                return Err(err!(Schema, "Column length too big for column '{}'", column.name));
            }
        }
        ColumnKind::Enum { members } => {
            if members.is_empty() || members.len() > u16::MAX as usize {
                return Err(err!(Schema, "Invalid member count for ENUM column '{}'", column.name));
            }
            let mut seen = HashSet::new();
            for member in members {
                if !seen.insert(member.to_lowercase()) {
                    return Err(err!(Schema, "Column '{}' has duplicated value '{}' in ENUM", column.name, member));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Identity of a table: schema + name, qualified by the owning session for
/// temporary tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    schema: String,
    table: String,
    session: Option<Uuid>,
}

impl TableIdentifier {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        check_identifier("schema", schema)?;
        check_identifier("table", table)?;
        Ok(TableIdentifier {
            schema: schema.to_ascii_lowercase(),
            table: table.to_ascii_lowercase(),
            session: None,
        })
    }

    pub fn temporary(schema: &str, table: &str, session: Uuid) -> Result<Self> {
        let mut id = TableIdentifier::new(schema, table)?;
        id.session = Some(session);
        Ok(id)
    }

    pub fn of(definition: &TableDefinition) -> Result<Self> {
        TableIdentifier::new(&definition.schema, &definition.name)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn session(&self) -> Option<Uuid> {
        self.session
    }

    pub fn is_temporary(&self) -> bool {
        self.session.is_some()
    }

    /// Key used by the definition cache.
    pub fn cache_key(&self) -> String {
        match self.session {
            Some(session) => format!("{}\0{}\0{}", self.schema, self.table, session),
            None => format!("{}\0{}", self.schema, self.table),
        }
    }

    pub fn schema_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.schema)
    }

    pub fn definition_path(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join(&self.schema)
            .join(format!("{}.{}", self.table, DEFINITION_FILE_EXT))
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct SchemaDefinition {
    pub name: String,
    pub collation: String,
}

impl SchemaDefinition {
    pub fn new(name: &str) -> Self {
        SchemaDefinition {
            name: name.to_ascii_lowercase(),
            collation: charset::UTF8MB4.name.to_string(),
        }
    }
}

pub fn encode_definition(definition: &TableDefinition) -> Result<Vec<u8>> {
    encoding::encode_record(DEFINITION_MAGIC, DEFINITION_VERSION, definition)
}

pub fn decode_definition(bytes: &[u8]) -> Result<TableDefinition> {
    encoding::decode_record(DEFINITION_MAGIC, DEFINITION_VERSION, bytes)
}

/// Reads a definition file. A missing file is `NotFound`, an unreadable one
/// is `Corrupt`.
pub fn read_definition(path: &Path) -> Result<TableDefinition> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(err!(NotFound, "Table definition '{}' not found", path.display()))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    decode_definition(&bytes)
        .map_err(|e| err!(Corrupt, "Table definition '{}' is malformed: {}", path.display(), e))
}

pub fn write_definition(path: &Path, definition: &TableDefinition) -> Result<()> {
    let bytes = encode_definition(definition)?;
    encoding::write_atomic(path, &bytes)?;
    debug!(path = %path.display(), "Wrote table definition.");
    Ok(())
}

pub fn read_schema(path: &Path) -> Result<SchemaDefinition> {
    let bytes = match std::fs::read(path.join(SCHEMA_FILE_NAME)) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(err!(NotFound, "Schema '{}' not found", path.display()))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    encoding::decode_record(SCHEMA_MAGIC, DEFINITION_VERSION, &bytes)
}

pub fn write_schema(path: &Path, schema: &SchemaDefinition) -> Result<()> {
    let bytes = encoding::encode_record(SCHEMA_MAGIC, DEFINITION_VERSION, schema)?;
    encoding::write_atomic(&path.join(SCHEMA_FILE_NAME), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn users() -> TableDefinition {
        TableDefinition::new("test", "users")
            .engine("tablespace")
            .column(ColumnSpec::new("id", ColumnKind::Int { unsigned: false }).not_null().auto_increment())
            .column(ColumnSpec::new("name", ColumnKind::Varchar { length: 10 }))
            .column(ColumnSpec::new("score", ColumnKind::Decimal { precision: 8, scale: 2 }).default_value("0.00"))
            .index(IndexSpec::primary(&["id"]))
            .index(IndexSpec::index("name_idx", &["name"]).prefix("name", 4))
    }

    #[test]
    fn test_validate_ok() {
        users().validate().unwrap();
        assert_eq!(users().primary_key(), Some(0));
        assert_eq!(users().auto_increment_column(), Some(0));
    }

    #[test]
    fn test_validate_rejects_inconsistent_definitions() {
        let dup = users().column(ColumnSpec::new("NAME", ColumnKind::Blob));
        assert!(matches!(dup.validate(), Err(Error::Schema(_))));

        let nullable_pk = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::primary(&["a"]));
        assert!(nullable_pk.validate().is_err());

        let blob_key = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("b", ColumnKind::Blob))
            .index(IndexSpec::index("b", &["b"]));
        assert!(blob_key.validate().is_err());

        let bad_prefix = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }))
            .index(IndexSpec::index("a", &["a"]).prefix("a", 2));
        assert!(bad_prefix.validate().is_err());

        let bad_default = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::TinyInt { unsigned: false }).default_value("1000"));
        assert!(bad_default.validate().is_err());
    }

    #[test]
    fn test_structural_changes_produce_new_definitions() {
        let base = users();
        let added = base
            .add_column(ColumnSpec::new("email", ColumnKind::Varchar { length: 64 }))
            .unwrap();
        assert_eq!(added.columns.len(), 4);
        assert_eq!(added.version, base.version + 1);
        assert_eq!(base.columns.len(), 3);

        let dropped = added.drop_column("name").unwrap();
        assert!(dropped.index_position("name_idx").is_none());

        let indexed = dropped.add_index(IndexSpec::unique("email_u", &["email"])).unwrap();
        assert_eq!(indexed.indexes.len(), 2);
        assert!(indexed.drop_index("nope").is_err());
        assert_eq!(indexed.drop_index("email_u").unwrap().indexes.len(), 1);

        // A failing change leaves nothing half-applied.
        assert!(base.add_index(IndexSpec::index("name_idx", &["id"])).is_err());
        assert_eq!(base.indexes.len(), 2);
    }

    #[test]
    fn test_definition_file_round_trips_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.dfe");
        write_definition(&path, &users()).unwrap();

        let first = std::fs::read(&path).unwrap();
        let decoded = read_definition(&path).unwrap();
        assert_eq!(decoded, users());
        assert_eq!(encode_definition(&decoded).unwrap(), first);
    }

    #[test]
    fn test_not_found_is_distinct_from_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.dfe");
        assert!(matches!(read_definition(&missing), Err(Error::NotFound(_))));

        let broken = dir.path().join("broken.dfe");
        std::fs::write(&broken, b"TKDF garbage").unwrap();
        assert!(matches!(read_definition(&broken), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_identifier() {
        let id = TableIdentifier::new("Test", "T1").unwrap();
        assert_eq!(id.to_string(), "test.t1");
        assert!(TableIdentifier::new("test", "bad name").is_err());
        let tmp = TableIdentifier::temporary("test", "t1", Uuid::new_v4()).unwrap();
        assert_ne!(tmp.cache_key(), id.cache_key());
        assert!(tmp.is_temporary());
        assert!(id
            .definition_path(Path::new("/data"))
            .ends_with("test/t1.dfe"));
    }
}
