use crate::definition::TableDefinition;
use crate::errors::Result;
use crate::field::{make_field, Field, Value};
use crate::warnings::Warnings;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Location of a column's null flag inside the row's leading bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullBit {
    pub byte: usize,
    pub mask: u8,
}

/// One table row in in-memory format: the null bitmap, then every column at
/// its fixed offset. Variable-length payloads of BLOB/TEXT columns live in a
/// side arena keyed by the column's offset; the in-row slot holds the length
/// and that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBuffer {
    data: Vec<u8>,
    blobs: BTreeMap<u32, Vec<u8>>,
}

impl RowBuffer {
    pub fn new(reclength: usize) -> Self {
        RowBuffer {
            data: vec![0u8; reclength],
            blobs: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.data[offset..offset + len]
    }

    pub fn is_null(&self, bit: &NullBit) -> bool {
        self.data[bit.byte] & bit.mask != 0
    }

    pub fn set_null(&mut self, bit: &NullBit, null: bool) {
        if null {
            self.data[bit.byte] |= bit.mask;
        } else {
            self.data[bit.byte] &= !bit.mask;
        }
    }

    pub fn blob(&self, key: u32) -> &[u8] {
        self.blobs.get(&key).map(|b| b.as_slice()).unwrap_or(&[])
    }

    pub fn set_blob(&mut self, key: u32, bytes: Vec<u8>) {
        self.blobs.insert(key, bytes);
    }

    pub fn clear_blob(&mut self, key: u32) {
        self.blobs.remove(&key);
    }
}

/// The columns of one table with their in-row layout.
#[derive(Debug)]
pub struct FieldSet {
    table: Arc<str>,
    fields: Vec<Box<dyn Field>>,
    null_bytes: usize,
    reclength: usize,
    auto_increment: Option<usize>,
    defaults: RowBuffer,
}

impl FieldSet {
    /// Lays the definition's columns out: null bitmap first, one bit per
    /// nullable column, then each column at the next free offset.
    pub fn new(definition: &TableDefinition) -> Result<Self> {
        let table: Arc<str> = Arc::from(format!("{}.{}", definition.schema, definition.name));
        let nullable = definition.columns.iter().filter(|c| c.nullable).count();
        let null_bytes = nullable.div_ceil(8);

        let mut fields = Vec::with_capacity(definition.columns.len());
        let mut offset = null_bytes;
        let mut null_index = 0;
        for (position, column) in definition.columns.iter().enumerate() {
            let null_bit = if column.nullable {
                let bit = NullBit {
                    byte: null_index / 8,
                    mask: 1 << (null_index % 8),
                };
                null_index += 1;
                Some(bit)
            } else {
                None
            };
            let field = make_field(column, Arc::clone(&table), position, offset, null_bit)?;
            offset += field.pack_length();
            fields.push(field);
        }

        let mut set = FieldSet {
            table,
            fields,
            null_bytes,
            reclength: offset,
            auto_increment: definition.auto_increment_column(),
            defaults: RowBuffer::new(offset),
        };
        set.defaults = set.build_defaults(definition)?;
        Ok(set)
    }

    fn build_defaults(&self, definition: &TableDefinition) -> Result<RowBuffer> {
        let mut row = RowBuffer::new(self.reclength);
        for (field, column) in self.fields.iter().zip(&definition.columns) {
            field.reset(&mut row);
            match &column.default {
                Some(text) => {
                    let status = field.store(&mut row, &Value::from(text.as_str()))?;
                    if status.is_warning() {
                        return Err(err!(Schema, "Invalid default value for '{}'", column.name));
                    }
                }
                None if column.nullable => field.set_null(&mut row),
                None => {}
            }
        }
        Ok(row)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn null_bytes(&self) -> usize {
        self.null_bytes
    }

    pub fn reclength(&self) -> usize {
        self.reclength
    }

    pub fn field(&self, position: usize) -> &dyn Field {
        self.fields[position].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Field> {
        self.fields.iter().map(|f| f.as_ref())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn find(&self, name: &str) -> Option<&dyn Field> {
        self.position(name).map(|p| self.field(p))
    }

    pub fn auto_increment_field(&self) -> Option<usize> {
        self.auto_increment
    }

    /// A zeroed row, every column present and not null.
    pub fn empty_row(&self) -> RowBuffer {
        RowBuffer::new(self.reclength)
    }

    /// A row holding each column's default; nullable columns without one are
    /// null.
    pub fn new_row(&self) -> RowBuffer {
        self.defaults.clone()
    }

    /// Builds a row from named values. Columns not named take their default.
    /// Storage warnings are collected, not raised.
    pub fn build_row(
        &self,
        columns: &[&str],
        values: &[Value],
        warnings: &mut Warnings,
    ) -> Result<RowBuffer> {
        if columns.len() != values.len() {
            return Err(err!(Schema, "Column count doesn't match value count"));
        }
        let mut row = self.new_row();
        for (name, value) in columns.iter().zip(values) {
            let field = self
                .find(name)
                .ok_or_else(|| err!(Schema, "Unknown column '{}' in '{}'", name, self.table))?;
            let status = field.store(&mut row, value)?;
            warnings.push_store_status(field.name(), 1, status);
        }
        Ok(row)
    }

    /// Column values of `row` in column order.
    pub fn values(&self, row: &RowBuffer) -> Vec<Value> {
        self.fields.iter().map(|f| f.value(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec};
    use crate::field::StoreStatus;

    fn definition() -> TableDefinition {
        TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Varchar { length: 5 }).charset("latin1"))
            .column(ColumnSpec::new("c", ColumnKind::SmallInt { unsigned: true }).default_value("7"))
    }

    #[test]
    fn test_layout_puts_null_bitmap_first() {
        let fields = FieldSet::new(&definition()).unwrap();
        assert_eq!(fields.null_bytes(), 1);
        assert_eq!(fields.field(0).meta().offset, 1);
        // int (4) then varchar(5) latin1 with a 1 byte length
        assert_eq!(fields.field(1).meta().offset, 5);
        assert_eq!(fields.field(2).meta().offset, 11);
        assert_eq!(fields.reclength(), 13);
        assert_eq!(fields.field(1).meta().null_bit, Some(NullBit { byte: 0, mask: 1 }));
        assert_eq!(fields.field(2).meta().null_bit, Some(NullBit { byte: 0, mask: 2 }));
        assert_eq!(fields.field(0).meta().null_bit, None);
    }

    #[test]
    fn test_null_flags_are_independent() {
        let fields = FieldSet::new(&definition()).unwrap();
        let mut row = fields.new_row();
        let b = fields.field(1);
        let c = fields.field(2);

        assert!(b.is_null(&row));
        assert!(!c.is_null(&row));

        c.set_null(&mut row);
        b.set_notnull(&mut row);
        assert!(!b.is_null(&row));
        assert!(c.is_null(&row));

        // Non-nullable columns report not-null and ignore set_null.
        let a = fields.field(0);
        a.set_null(&mut row);
        assert!(!a.is_null(&row));
    }

    #[test]
    fn test_build_row_applies_defaults_and_collects_warnings() {
        let fields = FieldSet::new(&definition()).unwrap();
        let mut warnings = Warnings::default();
        let row = fields
            .build_row(&["a", "b"], &[Value::Int(1), Value::from("toolong")], &mut warnings)
            .unwrap();

        assert_eq!(
            fields.values(&row),
            vec![Value::Int(1), Value::from("toolo"), Value::UInt(7)]
        );
        assert_eq!(warnings.len(), 1);

        let err = fields.build_row(&["zz"], &[Value::Int(1)], &mut warnings);
        assert!(err.is_err());
    }

    #[test]
    fn test_null_into_not_null_column() {
        let fields = FieldSet::new(&definition()).unwrap();
        let mut row = fields.new_row();
        let status = fields.field(0).store(&mut row, &Value::Null).unwrap();
        assert_eq!(status, StoreStatus::NullToNotNull);
        assert_eq!(fields.field(0).value(&row), Value::Int(0));
    }
}
