use super::{parse_int_text, Field, FieldMeta, StoreStatus, Value};
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

/// TINYINT, SMALLINT, INT and BIGINT: little-endian two's complement of
/// 1, 2, 4 or 8 bytes.
#[derive(Debug)]
pub struct IntField {
    meta: FieldMeta,
    kind: ColumnKind,
    width: usize,
    unsigned: bool,
}

impl IntField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, width: usize, unsigned: bool) -> Self {
        meta.pack_length = width;
        IntField {
            meta,
            kind,
            width,
            unsigned,
        }
    }

    fn range(&self) -> (i128, i128) {
        let bits = (self.width * 8) as u32;
        if self.unsigned {
            (0, (1i128 << bits) - 1)
        } else {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        }
    }

    /// Reads the slot widened to 128 bits, sign- or zero-extended.
    fn read(&self, bytes: &[u8]) -> i128 {
        let mut buf = [0u8; 8];
        buf[..self.width].copy_from_slice(&bytes[..self.width]);
        if self.unsigned {
            return u64::from_le_bytes(buf) as i128;
        }
        let shift = 64 - (self.width * 8) as u32;
        ((i64::from_le_bytes(buf) << shift) >> shift) as i128
    }

    fn write(&self, row: &mut RowBuffer, v: i128) {
        let bytes = (v as i64).to_le_bytes();
        let width = self.width;
        self.raw_mut(row).copy_from_slice(&bytes[..width]);
    }

    fn clamp(&self, v: i128) -> (i128, bool) {
        let (min, max) = self.range();
        if v < min {
            (min, true)
        } else if v > max {
            (max, true)
        } else {
            (v, false)
        }
    }

    /// Byte-comparable big-endian form with the sign bit flipped.
    fn comparable(&self, v: i128) -> Vec<u8> {
        let be = (v as i64).to_be_bytes();
        let mut out = be[8 - self.width..].to_vec();
        if !self.unsigned {
            out[0] ^= 0x80;
        }
        out
    }
}

impl Field for IntField {
    fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let (v, lossy) = match value {
            Value::Null => (0, false),
            Value::Int(v) => (*v as i128, false),
            Value::UInt(v) => (*v as i128, false),
            Value::Double(f) => {
                if f.is_nan() {
                    (0, true)
                } else {
                    let r = f.round();
                    // Saturating cast, the clamp below reports the overflow.
                    (r as i128, r != *f)
                }
            }
            Value::Decimal(d) => {
                let r = d.round_to_integer();
                (r, r * d.scale_factor() != d.unscaled())
            }
            Value::Bytes(text) => parse_int_text(text),
            other => parse_int_text(&other.to_text()),
        };
        let (v, clamped) = self.clamp(v);
        self.write(row, v);
        Ok(if clamped {
            StoreStatus::OutOfRange
        } else if lossy {
            StoreStatus::Truncated
        } else {
            StoreStatus::Ok
        })
    }

    fn val(&self, row: &RowBuffer) -> Value {
        let v = self.read(self.raw(row));
        if self.unsigned {
            Value::UInt(v as u64)
        } else {
            Value::Int(v as i64)
        }
    }

    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.read(self.raw(a)).cmp(&self.read(self.raw(b)))
    }

    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, _max_length: usize) {
        to.extend_from_slice(self.raw(row));
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        if from.len() < self.width {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        let width = self.width;
        self.raw_mut(row).copy_from_slice(&from[..width]);
        Ok(width)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, _length: usize) -> usize {
        out.extend_from_slice(self.raw(row));
        self.width
    }

    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], _length: usize) -> Result<()> {
        self.unpack(row, key).map(|_| ())
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.read(a).cmp(&self.read(b))
    }

    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        let bytes = self.comparable(self.read(self.raw(row)));
        let n = bytes.len().min(out.len());
        out[..n].copy_from_slice(&bytes[..n]);
    }

    fn reset(&self, row: &mut RowBuffer) {
        self.raw_mut(row).fill(0);
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::{StoreStatus, Value};
    use crate::row::FieldSet;

    fn fields() -> FieldSet {
        let def = TableDefinition::new("test", "ints")
            .column(ColumnSpec::new("t", ColumnKind::TinyInt { unsigned: false }))
            .column(ColumnSpec::new("tu", ColumnKind::TinyInt { unsigned: true }))
            .column(ColumnSpec::new("i", ColumnKind::Int { unsigned: false }))
            .column(ColumnSpec::new("b", ColumnKind::BigInt { unsigned: true }));
        FieldSet::new(&def).unwrap()
    }

    #[test]
    fn test_store_clamps_out_of_range() {
        let fields = fields();
        let mut row = fields.new_row();
        let t = fields.field(0);
        assert_eq!(t.store(&mut row, &Value::Int(300)).unwrap(), StoreStatus::OutOfRange);
        assert_eq!(t.value(&row), Value::Int(127));
        assert_eq!(t.store(&mut row, &Value::Int(-300)).unwrap(), StoreStatus::OutOfRange);
        assert_eq!(t.value(&row), Value::Int(-128));

        let tu = fields.field(1);
        assert_eq!(tu.store(&mut row, &Value::Int(-1)).unwrap(), StoreStatus::OutOfRange);
        assert_eq!(tu.value(&row), Value::UInt(0));

        let b = fields.field(3);
        assert_eq!(b.store(&mut row, &Value::UInt(u64::MAX)).unwrap(), StoreStatus::Ok);
        assert_eq!(b.value(&row), Value::UInt(u64::MAX));
    }

    #[test]
    fn test_store_converts_text_and_reals() {
        let fields = fields();
        let mut row = fields.new_row();
        let i = fields.field(2);
        assert_eq!(i.store(&mut row, &Value::from("-42")).unwrap(), StoreStatus::Ok);
        assert_eq!(i.value(&row), Value::Int(-42));
        assert_eq!(i.store(&mut row, &Value::Double(2.5)).unwrap(), StoreStatus::Truncated);
        assert_eq!(i.value(&row), Value::Int(3));
    }

    #[test]
    fn test_compare_sign_extends() {
        let fields = fields();
        let t = fields.field(0);
        let mut a = fields.new_row();
        let mut b = fields.new_row();
        t.store(&mut a, &Value::Int(-1)).unwrap();
        t.store(&mut b, &Value::Int(1)).unwrap();
        assert_eq!(t.cmp(&a, &b), std::cmp::Ordering::Less);

        let mut ka = Vec::new();
        let mut kb = Vec::new();
        t.key_image(&a, &mut ka, 1);
        t.key_image(&b, &mut kb, 1);
        assert_eq!(t.key_cmp(&ka, &kb), std::cmp::Ordering::Less);

        let mut sa = [0u8; 1];
        let mut sb = [0u8; 1];
        t.sort_key(&a, &mut sa);
        t.sort_key(&b, &mut sb);
        assert!(sa < sb);
    }
}
