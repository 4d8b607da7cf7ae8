//! Conversion between the in-row format and the engine's record format.
//!
//! A record holds the columns in order: a null-flag byte for nullable
//! columns, then fixed-width values byte-reversed into big-endian order,
//! decimals as is, and variable-length values as a 4 byte big-endian length
//! followed by the packed value. A [`Template`] lists the per-column steps
//! once for a read set and is reused for every row of a scan.

use crate::errors::Result;
use crate::definition::ColumnKind;
use crate::row::{FieldSet, RowBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Reverse,
    Copy,
    Variable,
}

impl Conversion {
    fn of(kind: &ColumnKind) -> Self {
        match kind {
            ColumnKind::Decimal { .. } => Conversion::Copy,
            k if k.is_string() => Conversion::Variable,
            _ => Conversion::Reverse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    pub field: usize,
    pub conversion: Conversion,
    pub nullable: bool,
    pub width: usize,
    /// Part of the read set; other columns are skipped when decoding.
    pub wanted: bool,
}

#[derive(Debug, Clone)]
pub struct Template {
    entries: Vec<TemplateEntry>,
    read_set: Option<Vec<usize>>,
}

impl Template {
    /// `None` reads every column.
    pub fn build(fields: &FieldSet, read_set: Option<&[usize]>) -> Self {
        let entries = fields
            .iter()
            .enumerate()
            .map(|(i, field)| TemplateEntry {
                field: i,
                conversion: Conversion::of(field.kind()),
                nullable: field.is_nullable(),
                width: field.pack_length(),
                wanted: read_set.map_or(true, |set| set.contains(&i)),
            })
            .collect();
        Template {
            entries,
            read_set: read_set.map(|s| s.to_vec()),
        }
    }

    pub fn read_set(&self) -> Option<&[usize]> {
        self.read_set.as_deref()
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    /// Every column is written whatever the read set.
    pub fn encode(&self, fields: &FieldSet, row: &RowBuffer) -> Vec<u8> {
        let mut out = Vec::with_capacity(fields.reclength() + self.entries.len());
        for entry in &self.entries {
            let field = fields.field(entry.field);
            if entry.nullable {
                if field.is_null(row) {
                    out.push(1);
                    continue;
                }
                out.push(0);
            }
            match entry.conversion {
                Conversion::Reverse => out.extend(field.raw(row).iter().rev()),
                Conversion::Copy => out.extend_from_slice(field.raw(row)),
                Conversion::Variable => {
                    let mut packed = Vec::new();
                    field.pack(row, &mut packed, usize::MAX);
                    out.extend_from_slice(&(packed.len() as u32).to_be_bytes());
                    out.extend_from_slice(&packed);
                }
            }
        }
        out
    }

    pub fn decode(&self, fields: &FieldSet, record: &[u8], row: &mut RowBuffer) -> Result<()> {
        let mut pos = 0;
        let take = |pos: usize, len: usize| -> Result<&[u8]> {
            record
                .get(pos..pos + len)
                .ok_or_else(|| err!(Corrupt, "Record of '{}' truncated", fields.table_name()))
        };
        for entry in &self.entries {
            let field = fields.field(entry.field);
            if entry.nullable {
                let flag = take(pos, 1)?[0];
                pos += 1;
                if flag != 0 {
                    if entry.wanted {
                        field.reset(row);
                        field.set_null(row);
                    }
                    continue;
                }
                if entry.wanted {
                    field.set_notnull(row);
                }
            }
            match entry.conversion {
                Conversion::Reverse | Conversion::Copy => {
                    let bytes = take(pos, entry.width)?;
                    if entry.wanted {
                        let slot = field.raw_mut(row);
                        if entry.conversion == Conversion::Reverse {
                            for (dst, src) in slot.iter_mut().zip(bytes.iter().rev()) {
                                *dst = *src;
                            }
                        } else {
                            slot.copy_from_slice(bytes);
                        }
                    }
                    pos += entry.width;
                }
                Conversion::Variable => {
                    let len = take(pos, 4)?;
                    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
                    pos += 4;
                    let bytes = take(pos, len)?;
                    if entry.wanted {
                        field.unpack(row, bytes)?;
                    }
                    pos += len;
                }
            }
        }
        if pos != record.len() {
            return Err(err!(Corrupt, "Record of '{}' has trailing bytes", fields.table_name()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnSpec, TableDefinition};
    use crate::field::Value;

    fn fields() -> FieldSet {
        let def = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("id", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("name", ColumnKind::Varchar { length: 10 }))
            .column(ColumnSpec::new("price", ColumnKind::Decimal { precision: 6, scale: 2 }))
            .column(ColumnSpec::new("body", ColumnKind::Text));
        FieldSet::new(&def).unwrap()
    }

    #[test]
    fn test_record_layout() {
        let fields = fields();
        let mut row = fields.new_row();
        fields.field(0).store(&mut row, &Value::Int(258)).unwrap();
        fields.field(1).store(&mut row, &Value::from("ab")).unwrap();
        let template = Template::build(&fields, None);
        let record = template.encode(&fields, &row);
        // id big-endian, then name's null flag and length-prefixed value
        assert_eq!(&record[..4], &[0, 0, 1, 2]);
        assert_eq!(record[4], 0);
        assert_eq!(&record[5..9], &[0, 0, 0, 3]);

        let mut back = fields.empty_row();
        template.decode(&fields, &record, &mut back).unwrap();
        assert_eq!(fields.values(&back), fields.values(&row));
    }

    #[test]
    fn test_read_set_leaves_other_columns() {
        let fields = fields();
        let mut row = fields.new_row();
        fields.field(0).store(&mut row, &Value::Int(7)).unwrap();
        fields.field(3).store(&mut row, &Value::from("long text")).unwrap();
        let record = Template::build(&fields, None).encode(&fields, &row);

        let partial = Template::build(&fields, Some(&[0]));
        let mut back = fields.empty_row();
        partial.decode(&fields, &record, &mut back).unwrap();
        assert_eq!(fields.field(0).value(&back), Value::Int(7));
        assert_eq!(fields.field(3).value(&back), Value::Bytes(Vec::new()));
        assert_eq!(partial.read_set(), Some(&[0usize][..]));
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let fields = fields();
        let row = fields.new_row();
        let template = Template::build(&fields, None);
        let record = template.encode(&fields, &row);
        let mut back = fields.empty_row();
        assert!(matches!(
            template.decode(&fields, &record[..record.len() - 1], &mut back),
            Err(crate::errors::Error::Corrupt(_))
        ));
    }
}
