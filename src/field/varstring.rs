use super::{var_key_payload, write_key_length, Field, FieldMeta, StoreStatus, Value};
use crate::charset::Charset;
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

/// VARCHAR(n): a 1 or 2 byte little-endian length followed by up to
/// `n * mbmaxlen` bytes. The length takes one byte while the byte capacity
/// stays below 256.
#[derive(Debug)]
pub struct VarcharField {
    meta: FieldMeta,
    kind: ColumnKind,
    char_length: usize,
    /// Capacity in bytes.
    field_length: usize,
    length_bytes: usize,
    charset: &'static Charset,
}

impl VarcharField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, char_length: usize, charset: &'static Charset) -> Self {
        let field_length = char_length * charset.mbmaxlen;
        let length_bytes = if field_length < 256 { 1 } else { 2 };
        meta.pack_length = length_bytes + field_length;
        VarcharField {
            meta,
            kind,
            char_length,
            field_length,
            length_bytes,
            charset,
        }
    }

    fn read_len(&self, bytes: &[u8]) -> usize {
        if self.length_bytes == 1 {
            bytes[0] as usize
        } else {
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
    }

    fn write_len(&self, bytes: &mut [u8], len: usize) {
        if self.length_bytes == 1 {
            bytes[0] = len as u8;
        } else {
            bytes[..2].copy_from_slice(&(len as u16).to_le_bytes());
        }
    }

    fn payload<'r>(&self, row: &'r RowBuffer) -> &'r [u8] {
        let raw = self.raw(row);
        let len = self.read_len(raw).min(self.field_length);
        &raw[self.length_bytes..self.length_bytes + len]
    }

    fn put(&self, row: &mut RowBuffer, src: &[u8]) {
        let length_bytes = self.length_bytes;
        let raw = self.raw_mut(row);
        raw[length_bytes..length_bytes + src.len()].copy_from_slice(src);
        self.write_len(raw, src.len());
    }
}

/// Truncation that only drops trailing spaces is not worth a warning.
pub(crate) fn truncation_status(src: &[u8], kept: usize, ill_formed: bool) -> StoreStatus {
    if ill_formed {
        return StoreStatus::Truncated;
    }
    if src[kept..].iter().all(|b| *b == b' ') {
        StoreStatus::Ok
    } else {
        StoreStatus::Truncated
    }
}

impl Field for VarcharField {
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
        self.field_length
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let text = value.to_text();
        let wf = self
            .charset
            .well_formed_len(&text, self.field_length, self.char_length);
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
        if self.length_bytes == 1 {
            to.push(len as u8);
        } else {
            to.extend_from_slice(&(len as u16).to_le_bytes());
        }
        to.extend_from_slice(&payload[..len]);
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        if from.len() < self.length_bytes {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        let len = self.read_len(from);
        let end = self.length_bytes + len;
        if len > self.field_length || from.len() < end {
            return Err(err!(Corrupt, "Packed value for '{}' has bad length {}", self.meta.name, len));
        }
        self.put(row, &from[self.length_bytes..end]);
        Ok(end)
    }

    /// Always a 2 byte length, the prefix cut at a character boundary, then
    /// zero padding up to `length`.
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
        let len = payload.len().min(length).min(self.field_length);
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
        self.raw_mut(row).fill(0);
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::{StoreStatus, Value};
    use crate::row::FieldSet;
    use std::cmp::Ordering;

    fn fields() -> FieldSet {
        let def = TableDefinition::new("test", "v")
            .column(ColumnSpec::new("short", ColumnKind::Varchar { length: 10 }).charset("latin1"))
            .column(ColumnSpec::new("wide", ColumnKind::Varchar { length: 100 }))
            .column(ColumnSpec::new("bin", ColumnKind::Varchar { length: 4 }).charset("binary"));
        FieldSet::new(&def).unwrap()
    }

    #[test]
    fn test_length_prefix_width() {
        let fields = fields();
        assert_eq!(fields.field(0).pack_length(), 1 + 10);
        // 100 chars * 4 bytes does not fit a one byte length
        assert_eq!(fields.field(1).pack_length(), 2 + 400);
    }

    #[test]
    fn test_store_truncates_at_character_boundary() {
        let fields = fields();
        let wide = fields.field(1);
        let mut row = fields.new_row();
        let long = "é".repeat(150);
        assert_eq!(wide.store(&mut row, &Value::from(long.as_str())).unwrap(), StoreStatus::Truncated);
        assert_eq!(wide.value(&row), Value::from("é".repeat(100).as_str()));

        let short = fields.field(0);
        assert_eq!(short.store(&mut row, &Value::from("abc         ")).unwrap(), StoreStatus::Ok);
        assert_eq!(short.value(&row), Value::from("abc       "));
    }

    #[test]
    fn test_pad_space_comparison() {
        let fields = fields();
        let short = fields.field(0);
        let mut a = fields.new_row();
        let mut b = fields.new_row();
        short.store(&mut a, &Value::from("abc")).unwrap();
        short.store(&mut b, &Value::from("ABC  ")).unwrap();
        assert_eq!(short.cmp(&a, &b), Ordering::Equal);

        let bin = fields.field(2);
        bin.store(&mut a, &Value::from("ab")).unwrap();
        bin.store(&mut b, &Value::from("ab ")).unwrap();
        assert_eq!(bin.cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_key_image_is_zero_padded_and_prefix_stable() {
        let fields = fields();
        let wide = fields.field(1);
        let mut row = fields.new_row();
        wide.store(&mut row, &Value::from("añbc")).unwrap();

        // three character prefix: 3 * 4 bytes of key
        let mut key = Vec::new();
        let written = wide.key_image(&row, &mut key, 12);
        assert_eq!(key.len(), 2 + 12);
        assert_eq!(written, 2 + 4);
        assert_eq!(&key[..2], &[4, 0]);
        assert_eq!(&key[2..6], "añb".as_bytes());
        assert!(key[6..].iter().all(|b| *b == 0));

        let mut again = Vec::new();
        wide.key_image(&row, &mut again, 12);
        assert_eq!(key, again);

        // The null bit is the caller's to clear, as key_restore does.
        let mut restored = fields.new_row();
        wide.set_notnull(&mut restored);
        wide.set_key_image(&mut restored, &key, 12).unwrap();
        assert_eq!(wide.value(&restored), Value::from("añb"));
    }

    #[test]
    fn test_pack_unpack() {
        let fields = fields();
        let wide = fields.field(1);
        let mut row = fields.new_row();
        wide.store(&mut row, &Value::from("hello")).unwrap();
        let mut packed = Vec::new();
        wide.pack(&row, &mut packed, usize::MAX);
        assert_eq!(packed, [&[5u8, 0][..], b"hello"].concat());

        let mut other = fields.new_row();
        wide.set_notnull(&mut other);
        assert_eq!(wide.unpack(&mut other, &packed).unwrap(), 7);
        assert_eq!(wide.value(&other), Value::from("hello"));
        assert!(wide.unpack(&mut other, &[9, 0, b'x']).is_err());
    }
}
