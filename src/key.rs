//! Index key descriptors and key images.
//!
//! A key image is the concatenation, part by part, of an optional null
//! indicator byte (1 = NULL) and the column's key image. Variable-length
//! parts always use a 2 byte length followed by zero padding, so every image
//! of one key has the same width.

use crate::definition::{IndexSpec, TableDefinition};
use crate::errors::Result;
use crate::row::{FieldSet, RowBuffer};
use std::cmp::Ordering;

pub const MAX_KEY_PARTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPart {
    /// Position of the column in the field set.
    pub field: usize,
    /// Key bytes for the column value, worst-case character width.
    pub length: usize,
    /// Bytes the part occupies in a key image.
    pub store_length: usize,
    pub nullable: bool,
    pub var_key: bool,
    /// The part covers only a prefix of the column.
    pub prefix: bool,
}

#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub name: String,
    pub parts: heapless::Vec<KeyPart, MAX_KEY_PARTS>,
    pub primary: bool,
    pub unique: bool,
    pub key_length: usize,
}

impl KeyInfo {
    pub fn from_spec(spec: &IndexSpec, fields: &FieldSet) -> Result<Self> {
        let mut parts = heapless::Vec::new();
        let mut key_length = 0;
        for part in &spec.parts {
            let position = fields
                .position(&part.column)
                .ok_or_else(|| err!(Schema, "Key column '{}' doesn't exist in table", part.column))?;
            let field = fields.field(position);
            let var_key = field.is_var_key();
            let length = match (var_key, part.prefix) {
                (true, Some(chars)) => chars as usize * field.charset().mbmaxlen,
                (true, None) => field.sort_length(),
                (false, _) => field.pack_length(),
            };
            let nullable = field.is_nullable();
            let store_length = length + usize::from(nullable) + if var_key { 2 } else { 0 };
            key_length += store_length;
            let prefix = var_key && length < field.sort_length();
            parts
                .push(KeyPart {
                    field: position,
                    length,
                    store_length,
                    nullable,
                    var_key,
                    prefix,
                })
                .map_err(|_| err!(Schema, "Too many key parts in '{}'; max {}", spec.name, MAX_KEY_PARTS))?;
        }
        Ok(KeyInfo {
            name: spec.name.clone(),
            parts,
            primary: spec.primary,
            unique: spec.unique,
            key_length,
        })
    }

    /// Key descriptors for every index of a definition, in declaration order.
    pub fn for_definition(definition: &TableDefinition, fields: &FieldSet) -> Result<Vec<KeyInfo>> {
        definition
            .indexes
            .iter()
            .map(|spec| KeyInfo::from_spec(spec, fields))
            .collect()
    }

    /// Width of an image covering the first `parts` parts.
    pub fn prefix_length(&self, parts: usize) -> usize {
        self.parts.iter().take(parts).map(|p| p.store_length).sum()
    }
}

/// Appends the full key image of `row`.
pub fn key_copy(key: &KeyInfo, fields: &FieldSet, row: &RowBuffer, out: &mut Vec<u8>) {
    for part in &key.parts {
        let field = fields.field(part.field);
        if part.nullable {
            if field.is_null(row) {
                out.push(1);
                out.resize(out.len() + part.store_length - 1, 0);
                continue;
            }
            out.push(0);
        }
        let start = out.len();
        field.key_image(row, out, part.length);
        // Fixed parts write exactly their width; keep the image stable anyway.
        let expected = part.store_length - usize::from(part.nullable);
        out.resize(start + expected, 0);
    }
}

/// Writes the key columns of `image` back into `row`. The image may cover a
/// leading subset of the parts.
pub fn key_restore(key: &KeyInfo, fields: &FieldSet, row: &mut RowBuffer, image: &[u8]) -> Result<()> {
    let mut pos = 0;
    for part in &key.parts {
        if pos >= image.len() {
            break;
        }
        if pos + part.store_length > image.len() {
            return Err(err!(Encoding, "Key image for '{}' cut inside a part", key.name));
        }
        let field = fields.field(part.field);
        let mut data = pos;
        if part.nullable {
            if image[pos] != 0 {
                field.set_null(row);
                pos += part.store_length;
                continue;
            }
            field.set_notnull(row);
            data += 1;
        }
        field.set_key_image(row, &image[data..pos + part.store_length], part.length)?;
        pos += part.store_length;
    }
    Ok(())
}

/// Compares two key images part by part with each column's collation.
/// Comparison stops at the end of the shorter image, so a leading-parts
/// image compares equal to every full image that starts with it.
pub fn key_cmp(key: &KeyInfo, fields: &FieldSet, a: &[u8], b: &[u8]) -> Ordering {
    let limit = a.len().min(b.len());
    let mut pos = 0;
    for part in &key.parts {
        if pos + part.store_length > limit {
            break;
        }
        let mut data = pos;
        if part.nullable {
            match (a[pos] != 0, b[pos] != 0) {
                (true, true) => {
                    pos += part.store_length;
                    continue;
                }
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                (false, false) => {}
            }
            data += 1;
        }
        let end = pos + part.store_length;
        let ord = fields.field(part.field).key_cmp(&a[data..end], &b[data..end]);
        if ord != Ordering::Equal {
            return ord;
        }
        pos = end;
    }
    Ordering::Equal
}

/// Appends a byte-comparable sort key: NULL sorts first, then each part's
/// sort key of the part's length.
pub fn make_sort_key(key: &KeyInfo, fields: &FieldSet, row: &RowBuffer, out: &mut Vec<u8>) {
    for part in &key.parts {
        let field = fields.field(part.field);
        if part.nullable {
            if field.is_null(row) {
                out.push(0);
                out.resize(out.len() + part.length, 0);
                continue;
            }
            out.push(1);
        }
        let start = out.len();
        out.resize(start + part.length, 0);
        field.sort_key(row, &mut out[start..]);
    }
}
