//! Typed columns over a row buffer.
//!
//! A [`Field`] knows its own in-row slot and how to move values between the
//! engine-neutral [`Value`] and the bytes at that slot. Comparison, the packed
//! wire form, key images and sort keys are all defined per column type.

mod blob;
mod decimal;
mod enumeration;
mod fstring;
mod integer;
mod real;
mod temporal;
mod varstring;

pub use decimal::Decimal;

use crate::charset::{self, Charset};
use crate::definition::{ColumnKind, ColumnSpec};
use crate::errors::Result;
use crate::row::{NullBit, RowBuffer};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Engine-neutral column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Decimal(Decimal),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual rendering, used when a value crosses into a string column.
    pub fn to_text(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Int(v) => v.to_string().into_bytes(),
            Value::UInt(v) => v.to_string().into_bytes(),
            Value::Double(v) => v.to_string().into_bytes(),
            Value::Decimal(d) => d.to_string().into_bytes(),
            Value::Bytes(b) => b.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string().into_bytes(),
            Value::DateTime(d) => d.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes(),
            Value::Time(t) => t.format("%H:%M:%S").to_string().into_bytes(),
        }
    }

    /// Signed integer view, if the value has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", String::from_utf8_lossy(&other.to_text())),
        }
    }
}

/// Outcome of storing a value. Anything but `Ok` is a warning for the
/// statement, the column holds the nearest representable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Ok,
    /// Data was cut or rounded to fit.
    Truncated,
    /// Numeric value clamped to the type's range.
    OutOfRange,
    /// NULL given for a NOT NULL column; the type's zero value was stored.
    NullToNotNull,
}

impl StoreStatus {
    pub fn is_warning(&self) -> bool {
        *self != StoreStatus::Ok
    }
}

#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: String,
    /// Owning table, as `schema.table`.
    pub table: Arc<str>,
    pub position: usize,
    /// Offset of the column's slot within the row buffer.
    pub offset: usize,
    pub pack_length: usize,
    pub null_bit: Option<NullBit>,
    pub auto_increment: bool,
}

/// A typed column bound to its slot in a row buffer.
pub trait Field: fmt::Debug + Send + Sync {
    fn meta(&self) -> &FieldMeta;

    fn kind(&self) -> &ColumnKind;

    /// Stores a non-null value, converting and clamping as needed.
    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus>;

    /// Reads the slot, ignoring the null flag.
    fn val(&self, row: &RowBuffer) -> Value;

    /// Orders this column's value in two rows. Null flags are not consulted.
    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering;

    /// Appends the packed form of the value, payload capped at `max_length`.
    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, max_length: usize);

    /// Reads a packed value back and returns the bytes consumed.
    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize>;

    /// Appends the key image of the value restricted to `length` key bytes
    /// and returns the bytes written.
    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, length: usize) -> usize;

    /// Restores the value from a key image of `length` key bytes.
    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], length: usize) -> Result<()>;

    /// Orders two key images produced by [`Field::key_image`].
    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Writes a byte-comparable sort key filling `out`.
    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]);

    /// Puts the type's zero value in the slot.
    fn reset(&self, row: &mut RowBuffer);

    fn charset(&self) -> &'static Charset {
        &charset::BINARY
    }

    /// Key images carry a 2 byte length prefix.
    fn is_var_key(&self) -> bool {
        false
    }

    fn sort_length(&self) -> usize {
        self.pack_length()
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn pack_length(&self) -> usize {
        self.meta().pack_length
    }

    fn is_nullable(&self) -> bool {
        self.meta().null_bit.is_some()
    }

    fn is_null(&self, row: &RowBuffer) -> bool {
        match &self.meta().null_bit {
            Some(bit) => row.is_null(bit),
            None => false,
        }
    }

    fn set_null(&self, row: &mut RowBuffer) {
        if let Some(bit) = &self.meta().null_bit {
            row.set_null(bit, true);
        }
    }

    fn set_notnull(&self, row: &mut RowBuffer) {
        if let Some(bit) = &self.meta().null_bit {
            row.set_null(bit, false);
        }
    }

    /// Raw slot bytes.
    fn raw<'r>(&self, row: &'r RowBuffer) -> &'r [u8] {
        let meta = self.meta();
        row.bytes(meta.offset, meta.pack_length)
    }

    fn raw_mut<'r>(&self, row: &'r mut RowBuffer) -> &'r mut [u8] {
        let meta = self.meta();
        row.bytes_mut(meta.offset, meta.pack_length)
    }

    /// Stores `value`, handling NULL against the column's nullability.
    fn store(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        if value.is_null() {
            if self.is_nullable() {
                self.reset(row);
                self.set_null(row);
                return Ok(StoreStatus::Ok);
            }
            self.reset(row);
            return Ok(StoreStatus::NullToNotNull);
        }
        self.set_notnull(row);
        self.store_value(row, value)
    }

    /// The column's value in `row`, `Value::Null` when the null flag is set.
    fn value(&self, row: &RowBuffer) -> Value {
        if self.is_null(row) {
            Value::Null
        } else {
            self.val(row)
        }
    }

    /// Row comparison with NULL ordered first.
    fn cmp_rows(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        match (self.is_null(a), self.is_null(b)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.cmp(a, b),
        }
    }
}

/// The narrow view of a column that sorting and aggregation code needs,
/// without the full store/pack surface.
pub trait ColumnSummary {
    fn column_name(&self) -> &str;
    fn type_name(&self) -> String;
    fn null_in(&self, row: &RowBuffer) -> bool;
    fn raw_image<'r>(&self, row: &'r RowBuffer) -> &'r [u8];
    fn sort_key_length(&self) -> usize;
    fn write_sort_key(&self, row: &RowBuffer, out: &mut [u8]);
}

impl<F: Field + ?Sized> ColumnSummary for F {
    fn column_name(&self) -> &str {
        self.name()
    }

    fn type_name(&self) -> String {
        self.kind().to_string()
    }

    fn null_in(&self, row: &RowBuffer) -> bool {
        self.is_null(row)
    }

    fn raw_image<'r>(&self, row: &'r RowBuffer) -> &'r [u8] {
        self.raw(row)
    }

    fn sort_key_length(&self) -> usize {
        self.sort_length()
    }

    fn write_sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        self.sort_key(row, out)
    }
}

/// Builds the field for a column spec at a given slot.
pub fn make_field(
    spec: &ColumnSpec,
    table: Arc<str>,
    position: usize,
    offset: usize,
    null_bit: Option<NullBit>,
) -> Result<Box<dyn Field>> {
    let cs = charset::by_name(&spec.charset)
        .ok_or_else(|| err!(Schema, "Unknown character set '{}'", spec.charset))?;
    let meta = FieldMeta {
        name: spec.name.clone(),
        table,
        position,
        offset,
        pack_length: 0,
        null_bit,
        auto_increment: spec.auto_increment,
    };
    let kind = spec.kind.clone();
    let field: Box<dyn Field> = match &spec.kind {
        ColumnKind::TinyInt { unsigned } => Box::new(integer::IntField::new(meta, kind, 1, *unsigned)),
        ColumnKind::SmallInt { unsigned } => Box::new(integer::IntField::new(meta, kind, 2, *unsigned)),
        ColumnKind::Int { unsigned } => Box::new(integer::IntField::new(meta, kind, 4, *unsigned)),
        ColumnKind::BigInt { unsigned } => Box::new(integer::IntField::new(meta, kind, 8, *unsigned)),
        ColumnKind::Double => Box::new(real::DoubleField::new(meta)),
        ColumnKind::Decimal { precision, scale } => {
            Box::new(decimal::DecimalField::new(meta, kind, *precision, *scale))
        }
        ColumnKind::Char { length } => {
            let cs = if cs.is_binary() { &charset::BINARY } else { cs };
            Box::new(fstring::CharField::new(meta, kind, *length as usize, cs))
        }
        ColumnKind::Varchar { length } => {
            Box::new(varstring::VarcharField::new(meta, kind, *length as usize, cs))
        }
        ColumnKind::Blob => Box::new(blob::BlobField::new(meta, kind, &charset::BINARY)),
        ColumnKind::Text => Box::new(blob::BlobField::new(meta, kind, cs)),
        ColumnKind::Date => Box::new(temporal::DateField::new(meta)),
        ColumnKind::DateTime => Box::new(temporal::DateTimeField::new(meta)),
        ColumnKind::Timestamp => Box::new(temporal::TimestampField::new(meta)),
        ColumnKind::Time => Box::new(temporal::TimeField::new(meta)),
        ColumnKind::Enum { members } => {
            Box::new(enumeration::EnumField::new(meta, kind, members.clone(), cs))
        }
    };
    Ok(field)
}

/// Parses a text value as a signed integer, reporting whether anything was
/// dropped (fraction, trailing garbage).
pub(crate) fn parse_int_text(text: &[u8]) -> (i128, bool) {
    let s = String::from_utf8_lossy(text);
    let s = s.trim();
    if let Ok(v) = s.parse::<i128>() {
        return (v, false);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => (f.round() as i128, true),
        _ => {
            // Leading numeric prefix, the rest is garbage.
            let end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            (s[..end].parse::<i128>().unwrap_or(0), true)
        }
    }
}

/// Writes the 2 byte little-endian length prefix used by variable key parts.
pub(crate) fn write_key_length(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
}

pub(crate) fn read_key_length(key: &[u8]) -> usize {
    if key.len() < 2 {
        return 0;
    }
    u16::from_le_bytes([key[0], key[1]]) as usize
}

/// Splits a variable key image into its payload, clamped to the bytes present.
pub(crate) fn var_key_payload(key: &[u8]) -> &[u8] {
    let len = read_key_length(key);
    let end = (2 + len).min(key.len());
    if key.len() < 2 {
        &[]
    } else {
        &key[2..end]
    }
}
