use super::varstring::truncation_status;
use super::{var_key_payload, write_key_length, Field, FieldMeta, StoreStatus, Value};
use crate::charset::Charset;
use crate::definition::{ColumnKind, MAX_VARCHAR_BYTES};
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

/// BLOB and TEXT. The slot holds a 4 byte length and the 4 byte arena key
/// under which the row buffer keeps the payload.
#[derive(Debug)]
pub struct BlobField {
    meta: FieldMeta,
    kind: ColumnKind,
    charset: &'static Charset,
}

const SLOT: usize = 8;

impl BlobField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, charset: &'static Charset) -> Self {
        meta.pack_length = SLOT;
        BlobField { meta, kind, charset }
    }

    fn arena_key(&self) -> u32 {
        self.meta.offset as u32
    }

    fn length(&self, row: &RowBuffer) -> usize {
        let raw = self.raw(row);
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
    }

    fn payload<'r>(&self, row: &'r RowBuffer) -> &'r [u8] {
        let data = row.blob(self.arena_key());
        &data[..self.length(row).min(data.len())]
    }

    fn put(&self, row: &mut RowBuffer, src: &[u8]) {
        let key = self.arena_key();
        let raw = self.raw_mut(row);
        raw[..4].copy_from_slice(&(src.len() as u32).to_le_bytes());
        raw[4..].copy_from_slice(&key.to_le_bytes());
        if src.is_empty() {
            row.clear_blob(key);
        } else {
            row.set_blob(key, src.to_vec());
        }
    }
}

impl Field for BlobField {
    fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    fn charset(&self) -> &'static Charset {
        self.charset
    }

    fn is_var_key(&self) -> bool {
        true
    }

    fn sort_length(&self) -> usize {
        // Sorting looks at a bounded prefix only.
        1024
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let text = value.to_text();
        let max = MAX_VARCHAR_BYTES as usize;
        let wf = self.charset.well_formed_len(&text, max, max);
        self.put(row, &text[..wf.length]);
        Ok(if wf.truncated {
            truncation_status(&text, wf.length, wf.ill_formed)
        } else {
            StoreStatus::Ok
        })
    }

    fn val(&self, row: &RowBuffer) -> Value {
        Value::Bytes(self.payload(row).to_vec())
    }

    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.charset.strnncollsp(self.payload(a), self.payload(b))
    }

    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, max_length: usize) {
        let payload = self.payload(row);
        let len = payload.len().min(max_length);
        to.extend_from_slice(&(len as u32).to_le_bytes());
        to.extend_from_slice(&payload[..len]);
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        if from.len() < 4 {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        let len = u32::from_le_bytes([from[0], from[1], from[2], from[3]]) as usize;
        let end = 4 + len;
        if from.len() < end {
            return Err(err!(Corrupt, "Packed value for '{}' has bad length {}", self.meta.name, len));
        }
        self.put(row, &from[4..end]);
        Ok(end)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, length: usize) -> usize {
        let payload = self.payload(row);
        let chars = length / self.charset.mbmaxlen;
        let f_length = self.charset.charpos(payload, chars).min(length);
        write_key_length(out, f_length);
        out.extend_from_slice(&payload[..f_length]);
        out.resize(out.len() + (length - f_length), 0);
        2 + f_length
    }

    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], length: usize) -> Result<()> {
        let payload = var_key_payload(key);
        let len = payload.len().min(length);
        self.put(row, &payload[..len]);
        Ok(())
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.charset.strnncollsp(var_key_payload(a), var_key_payload(b))
    }

    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        self.charset.strnxfrm(out, self.payload(row));
    }

    fn reset(&self, row: &mut RowBuffer) {
        self.put(row, &[]);
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::Value;
    use crate::row::FieldSet;

    #[test]
    fn test_two_blobs_keep_separate_payloads() {
        let def = TableDefinition::new("test", "b")
            .column(ColumnSpec::new("x", ColumnKind::Blob))
            .column(ColumnSpec::new("y", ColumnKind::Text));
        let fields = FieldSet::new(&def).unwrap();
        let (x, y) = (fields.field(0), fields.field(1));
        let mut row = fields.new_row();
        x.store(&mut row, &Value::from("first")).unwrap();
        y.store(&mut row, &Value::from("second")).unwrap();
        assert_eq!(x.value(&row), Value::from("first"));
        assert_eq!(y.value(&row), Value::from("second"));

        let copy = row.clone();
        x.store(&mut row, &Value::from("changed")).unwrap();
        assert_eq!(x.value(&copy), Value::from("first"));

        x.store(&mut row, &Value::Null).unwrap();
        assert!(x.is_null(&row));
        assert_eq!(y.value(&row), Value::from("second"));
    }
}
