//! Byte-comparable native index keys.
//!
//! Each part starts with a null flag when the column is nullable (0 = NULL,
//! so NULL sorts first). Character columns are folded to collation weights
//! and escape encoded (0x00 becomes 0x00 0xFF, the part ends with 0x00 0x01)
//! so a part never is a prefix of a longer one. Other columns use their
//! fixed-width sort key. Plain byte order of two keys is then index order.

use super::catalog::{NativeIndex, NativePart};
use crate::field::Field;
use crate::row::{FieldSet, RowBuffer};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

pub fn row_id_key(row_id: u64) -> Vec<u8> {
    row_id.to_be_bytes().to_vec()
}

pub fn row_id_of(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn encode_part(field: &dyn Field, part: &NativePart, row: &RowBuffer, out: &mut Vec<u8>) {
    if field.is_nullable() {
        if field.is_null(row) {
            out.push(0);
            return;
        }
        out.push(1);
    }
    if field.kind().is_string() {
        let text = field.val(row).to_text();
        let charset = field.charset();
        let end = match part.prefix {
            Some(chars) => charset.charpos(&text, chars as usize),
            None => text.len(),
        };
        for b in charset.fold(&text[..end]) {
            out.push(b);
            if b == ESCAPE {
                out.push(ESCAPED_ZERO);
            }
        }
        out.push(ESCAPE);
        out.push(TERMINATOR);
    } else {
        let start = out.len();
        out.resize(start + field.sort_length(), 0);
        field.sort_key(row, &mut out[start..]);
    }
}

/// Appends the key of `row` over the first `parts` parts of `index`.
pub fn index_key(index: &NativeIndex, fields: &FieldSet, row: &RowBuffer, parts: usize, out: &mut Vec<u8>) {
    for part in index.parts.iter().take(parts) {
        encode_part(fields.field(part.column), part, row, out);
    }
}

pub fn full_key(index: &NativeIndex, fields: &FieldSet, row: &RowBuffer) -> Vec<u8> {
    let mut out = Vec::new();
    index_key(index, fields, row, index.parts.len(), &mut out);
    out
}

/// Whether any key column of `row` is NULL. Unique indexes do not compare
/// such keys.
pub fn has_null(index: &NativeIndex, fields: &FieldSet, row: &RowBuffer) -> bool {
    index
        .parts
        .iter()
        .any(|p| fields.field(p.column).is_null(row))
}
