use super::varstring::truncation_status;
use super::{var_key_payload, write_key_length, Field, FieldMeta, StoreStatus, Value};
use crate::charset::Charset;
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;

/// CHAR(n): exactly `n * mbmaxlen` bytes, padded with spaces (zeros for the
/// binary character set).
#[derive(Debug)]
pub struct CharField {
    meta: FieldMeta,
    kind: ColumnKind,
    char_length: usize,
    field_length: usize,
    charset: &'static Charset,
}

impl CharField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, char_length: usize, charset: &'static Charset) -> Self {
        let field_length = char_length * charset.mbmaxlen;
        meta.pack_length = field_length;
        CharField {
            meta,
            kind,
            char_length,
            field_length,
            charset,
        }
    }

    fn pad(&self) -> u8 {
        if self.charset.is_binary() {
            0
        } else {
            b' '
        }
    }

    /// The stored value without its padding.
    fn trimmed<'r>(&self, row: &'r RowBuffer) -> &'r [u8] {
        let raw = self.raw(row);
        let pad = self.pad();
        let mut end = raw.len();
        while end > 0 && raw[end - 1] == pad {
            end -= 1;
        }
        &raw[..end]
    }

    fn put(&self, row: &mut RowBuffer, src: &[u8]) {
        let pad = self.pad();
        let raw = self.raw_mut(row);
        raw[..src.len()].copy_from_slice(src);
        raw[src.len()..].fill(pad);
    }

    /// Width of the length prefix in the packed form.
    fn pack_prefix(&self) -> usize {
        if self.field_length > 255 {
            2
        } else {
            1
        }
    }
}

impl Field for CharField {
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
        Value::Bytes(self.trimmed(row).to_vec())
    }

    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.charset.strnncollsp(self.trimmed(a), self.trimmed(b))
    }

    /// Trailing padding is dropped on the wire.
    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, max_length: usize) {
        let value = self.trimmed(row);
        let len = value.len().min(max_length);
        if self.pack_prefix() == 1 {
            to.push(len as u8);
        } else {
            to.extend_from_slice(&(len as u16).to_le_bytes());
        }
        to.extend_from_slice(&value[..len]);
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        let prefix = self.pack_prefix();
        if from.len() < prefix {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        let len = if prefix == 1 {
            from[0] as usize
        } else {
            u16::from_le_bytes([from[0], from[1]]) as usize
        };
        let end = prefix + len;
        if len > self.field_length || from.len() < end {
            return Err(err!(Corrupt, "Packed value for '{}' has bad length {}", self.meta.name, len));
        }
        self.put(row, &from[prefix..end]);
        Ok(end)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, length: usize) -> usize {
        let value = self.trimmed(row);
        let chars = length / self.charset.mbmaxlen;
        let f_length = self.charset.charpos(value, chars).min(length);
        write_key_length(out, f_length);
        out.extend_from_slice(&value[..f_length]);
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
        self.charset.strnxfrm(out, self.trimmed(row));
    }

    fn reset(&self, row: &mut RowBuffer) {
        self.put(row, &[]);
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::{StoreStatus, Value};
    use crate::row::FieldSet;

    #[test]
    fn test_char_pads_and_trims() {
        let def = TableDefinition::new("test", "c")
            .column(ColumnSpec::new("c", ColumnKind::Char { length: 4 }).charset("latin1"));
        let fields = FieldSet::new(&def).unwrap();
        let c = fields.field(0);
        let mut row = fields.new_row();

        assert_eq!(c.store(&mut row, &Value::from("ab")).unwrap(), StoreStatus::Ok);
        assert_eq!(c.raw(&row), b"ab  ");
        assert_eq!(c.value(&row), Value::from("ab"));

        assert_eq!(c.store(&mut row, &Value::from("abcdef")).unwrap(), StoreStatus::Truncated);
        assert_eq!(c.value(&row), Value::from("abcd"));

        let mut packed = Vec::new();
        c.pack(&row, &mut packed, usize::MAX);
        assert_eq!(packed, b"\x04abcd");
        let mut other = fields.new_row();
        c.unpack(&mut other, &packed).unwrap();
        assert_eq!(c.raw(&other), b"abcd");
    }
}
