use super::{Field, FieldMeta, StoreStatus, Value};
use crate::charset::Charset;
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

/// ENUM: the 1-based member index in 1 byte (2 beyond 255 members). Index 0
/// is the empty string stored for unknown input.
#[derive(Debug)]
pub struct EnumField {
    meta: FieldMeta,
    kind: ColumnKind,
    members: Vec<String>,
    charset: &'static Charset,
}

impl EnumField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, members: Vec<String>, charset: &'static Charset) -> Self {
        meta.pack_length = if members.len() < 256 { 1 } else { 2 };
        EnumField {
            meta,
            kind,
            members,
            charset,
        }
    }

    fn index(&self, bytes: &[u8]) -> usize {
        if self.meta.pack_length == 1 {
            bytes[0] as usize
        } else {
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
    }

    fn write(&self, row: &mut RowBuffer, index: usize) {
        let width = self.meta.pack_length;
        let bytes = (index as u16).to_le_bytes();
        self.raw_mut(row).copy_from_slice(&bytes[..width]);
    }

    fn find(&self, name: &[u8]) -> Option<usize> {
        self.members
            .iter()
            .position(|m| self.charset.strnncollsp(m.as_bytes(), name) == Ordering::Equal)
            .map(|p| p + 1)
    }
}

impl Field for EnumField {
    fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    fn charset(&self) -> &'static Charset {
        self.charset
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let index = match value {
            Value::Int(_) | Value::UInt(_) => value
                .as_u64()
                .map(|i| i as usize)
                .filter(|i| *i >= 1 && *i <= self.members.len()),
            other => {
                let text = other.to_text();
                self.find(&text).or_else(|| {
                    // A numeric string names a member by position.
                    std::str::from_utf8(&text)
                        .ok()
                        .and_then(|s| s.trim().parse::<usize>().ok())
                        .filter(|i| *i >= 1 && *i <= self.members.len())
                })
            }
        };
        match index {
            Some(i) => {
                self.write(row, i);
                Ok(StoreStatus::Ok)
            }
            None => {
                self.write(row, 0);
                Ok(StoreStatus::Truncated)
            }
        }
    }

    fn val(&self, row: &RowBuffer) -> Value {
        let index = self.index(self.raw(row));
        match index.checked_sub(1).and_then(|i| self.members.get(i)) {
            Some(name) => Value::from(name.as_str()),
            None => Value::Bytes(Vec::new()),
        }
    }

    /// Members order by declaration position.
    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.index(self.raw(a)).cmp(&self.index(self.raw(b)))
    }

    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, _max_length: usize) {
        to.extend_from_slice(self.raw(row));
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        let width = self.meta.pack_length;
        if from.len() < width {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        if self.index(from) > self.members.len() {
            return Err(err!(Corrupt, "Packed value for '{}' is not a member", self.meta.name));
        }
        self.raw_mut(row).copy_from_slice(&from[..width]);
        Ok(width)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, _length: usize) -> usize {
        out.extend_from_slice(self.raw(row));
        self.meta.pack_length
    }

    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], _length: usize) -> Result<()> {
        self.unpack(row, key).map(|_| ())
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.index(a).cmp(&self.index(b))
    }

    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        let bytes = (self.index(self.raw(row)) as u16).to_be_bytes();
        let start = 2 - self.meta.pack_length;
        let n = out.len().min(self.meta.pack_length);
        out[..n].copy_from_slice(&bytes[start..start + n]);
    }

    fn reset(&self, row: &mut RowBuffer) {
        self.write(row, 0);
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::{StoreStatus, Value};
    use crate::row::FieldSet;

    #[test]
    fn test_enum_members() {
        let members = vec!["small".to_string(), "medium".to_string(), "large".to_string()];
        let def = TableDefinition::new("test", "e").column(ColumnSpec::new("size", ColumnKind::Enum { members }));
        let fields = FieldSet::new(&def).unwrap();
        let e = fields.field(0);
        let mut a = fields.new_row();
        let mut b = fields.new_row();

        assert_eq!(e.store(&mut a, &Value::from("LARGE")).unwrap(), StoreStatus::Ok);
        assert_eq!(e.value(&a), Value::from("large"));
        assert_eq!(e.store(&mut b, &Value::Int(1)).unwrap(), StoreStatus::Ok);
        assert_eq!(e.value(&b), Value::from("small"));
        assert_eq!(e.cmp(&b, &a), std::cmp::Ordering::Less);

        assert_eq!(e.store(&mut a, &Value::from("huge")).unwrap(), StoreStatus::Truncated);
        assert_eq!(e.value(&a), Value::from(""));
    }
}
