use super::{Field, FieldMeta, StoreStatus, Value};
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

const WIDTH: usize = 8;

/// DOUBLE: IEEE-754 binary64, little-endian.
#[derive(Debug)]
pub struct DoubleField {
    meta: FieldMeta,
    kind: ColumnKind,
}

impl DoubleField {
    pub fn new(mut meta: FieldMeta) -> Self {
        meta.pack_length = WIDTH;
        DoubleField {
            meta,
            kind: ColumnKind::Double,
        }
    }

    fn read(bytes: &[u8]) -> f64 {
        let mut buf = [0u8; WIDTH];
        buf.copy_from_slice(&bytes[..WIDTH]);
        f64::from_le_bytes(buf)
    }
}

impl Field for DoubleField {
    fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let (v, status) = match value {
            Value::Double(f) if f.is_nan() => (0.0, StoreStatus::Truncated),
            Value::Double(f) if f.is_infinite() => {
                (f.signum() * f64::MAX, StoreStatus::OutOfRange)
            }
            Value::Double(f) => (*f, StoreStatus::Ok),
            Value::Int(v) => (*v as f64, StoreStatus::Ok),
            Value::UInt(v) => (*v as f64, StoreStatus::Ok),
            Value::Decimal(d) => (d.to_f64(), StoreStatus::Ok),
            other => {
                let text = String::from_utf8_lossy(&other.to_text()).trim().to_string();
                match text.parse::<f64>() {
                    Ok(f) if f.is_finite() => (f, StoreStatus::Ok),
                    _ => (0.0, StoreStatus::Truncated),
                }
            }
        };
        self.raw_mut(row).copy_from_slice(&v.to_le_bytes());
        Ok(status)
    }

    fn val(&self, row: &RowBuffer) -> Value {
        Value::Double(Self::read(self.raw(row)))
    }

    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.key_cmp(self.raw(a), self.raw(b))
    }

    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, _max_length: usize) {
        to.extend_from_slice(self.raw(row));
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        if from.len() < WIDTH {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        self.raw_mut(row).copy_from_slice(&from[..WIDTH]);
        Ok(WIDTH)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, _length: usize) -> usize {
        out.extend_from_slice(self.raw(row));
        WIDTH
    }

    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], _length: usize) -> Result<()> {
        self.unpack(row, key).map(|_| ())
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        Self::read(a).total_cmp(&Self::read(b))
    }

    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        let v = Self::read(self.raw(row));
        // -0.0 sorts with 0.0
        let bits = if v == 0.0 { 0u64 } else { v.to_bits() };
        let bits = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
        let bytes = bits.to_be_bytes();
        let n = out.len().min(WIDTH);
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

    #[test]
    fn test_double_store_and_order() {
        let def = TableDefinition::new("test", "d").column(ColumnSpec::new("d", ColumnKind::Double));
        let fields = FieldSet::new(&def).unwrap();
        let d = fields.field(0);

        let mut a = fields.new_row();
        let mut b = fields.new_row();
        d.store(&mut a, &Value::from("-1.5")).unwrap();
        d.store(&mut b, &Value::Int(2)).unwrap();
        assert_eq!(d.value(&a), Value::Double(-1.5));
        assert_eq!(d.cmp(&a, &b), std::cmp::Ordering::Less);

        let mut sa = [0u8; 8];
        let mut sb = [0u8; 8];
        d.sort_key(&a, &mut sa);
        d.sort_key(&b, &mut sb);
        assert!(sa < sb);

        assert_eq!(d.store(&mut a, &Value::from("abc")).unwrap(), StoreStatus::Truncated);
        assert_eq!(d.value(&a), Value::Double(0.0));
    }
}
