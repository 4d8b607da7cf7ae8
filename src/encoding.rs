//! Byte-level encodings that leave the process: framed bincode records for
//! everything persisted, and the packed wire form of a row.

use crate::errors::{Error, Result};
use crate::row::{FieldSet, RowBuffer};
use bincode::{config, Decode, Encode};
use std::io::Write;
use std::path::Path;

/// magic (4) | version (2) | payload length (4) | crc32 (4)
pub const RECORD_HEADER_SIZE: usize = 14;

/// Encodes `value` behind a header carrying a magic number, a format
/// version and a checksum of the payload.
pub fn encode_record<T: Encode>(magic: [u8; 4], version: u16, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::encode_to_vec(value, config::standard())?;
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn decode_record<T: Decode<()>>(magic: [u8; 4], version: u16, bytes: &[u8]) -> Result<T> {
    let (payload, _) = split_record(magic, version, bytes)?;
    let (decoded, _): (T, usize) = bincode::decode_from_slice(payload, config::standard())?;
    Ok(decoded)
}

/// Validates the header of the first record in `bytes` and returns its
/// payload and the total number of bytes the record occupies.
pub fn split_record(magic: [u8; 4], version: u16, bytes: &[u8]) -> Result<(&[u8], usize)> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Err(err!(Corrupt, "Record header truncated ({} bytes)", bytes.len()));
    }
    if bytes[..4] != magic {
        return Err(err!(Corrupt, "Bad record magic {:?}", &bytes[..4]));
    }
    let found = u16::from_le_bytes([bytes[4], bytes[5]]);
    if found != version {
        return Err(err!(Corrupt, "Unsupported record version {} (expected {})", found, version));
    }
    let len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let crc = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
    let end = RECORD_HEADER_SIZE + len;
    if bytes.len() < end {
        return Err(err!(Corrupt, "Record payload truncated: need {}, have {}", end, bytes.len()));
    }
    let payload = &bytes[RECORD_HEADER_SIZE..end];
    if crc32fast::hash(payload) != crc {
        return Err(err!(Corrupt, "Record checksum mismatch"));
    }
    Ok((payload, end))
}

/// Replaces `path` with `bytes` through a synced temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Appends one framed record to `path` and syncs it.
pub fn append_record(path: &Path, record: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(record)?;
    file.sync_data()?;
    Ok(())
}

/// Encodes a header into a fixed-size frame, zero padded.
pub fn encode_header<T: Encode, const N: usize>(header: &T) -> Result<[u8; N]> {
    let encoded = bincode::encode_to_vec(header, config::standard())?;
    if encoded.len() > N {
        return Err(Error::Encoding(format!(
            "Header size ({}) does not fit within the frame ({}).",
            encoded.len(),
            N
        )));
    }
    let mut frame = [0u8; N];
    frame[..encoded.len()].copy_from_slice(&encoded);
    Ok(frame)
}

pub fn decode_header<T: Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (decoded, _): (T, usize) = bincode::decode_from_slice(bytes, config::standard())?;
    Ok(decoded)
}

/// Packs a row into its compact wire form: the null bitmap followed by every
/// non-null column's packed value in column order.
pub fn pack_row(fields: &FieldSet, row: &RowBuffer) -> Vec<u8> {
    let mut out = Vec::with_capacity(fields.reclength());
    out.extend_from_slice(&row.data()[..fields.null_bytes()]);
    for field in fields.iter() {
        if field.is_null(row) {
            continue;
        }
        field.pack(row, &mut out, usize::MAX);
    }
    out
}

/// Inverse of [`pack_row`].
pub fn unpack_row(fields: &FieldSet, packed: &[u8]) -> Result<RowBuffer> {
    let null_bytes = fields.null_bytes();
    if packed.len() < null_bytes {
        return Err(err!(Corrupt, "Packed row shorter than its null bitmap"));
    }
    let mut row = fields.empty_row();
    row.data_mut()[..null_bytes].copy_from_slice(&packed[..null_bytes]);
    let mut pos = null_bytes;
    for field in fields.iter() {
        if field.is_null(&row) {
            continue;
        }
        pos += field.unpack(&mut row, &packed[pos..])?;
    }
    if pos != packed.len() {
        return Err(err!(
            Corrupt,
            "Packed row has {} trailing bytes",
            packed.len() - pos
        ));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::Value;
    use tempfile::TempDir;

    #[derive(Encode, Decode, Debug, PartialEq)]
    struct Probe {
        id: u32,
        name: String,
    }

    #[test]
    fn test_record_checksum_detects_damage() {
        let probe = Probe {
            id: 7,
            name: "seven".into(),
        };
        let mut bytes = encode_record(*b"TEST", 1, &probe).unwrap();
        let decoded: Probe = decode_record(*b"TEST", 1, &bytes).unwrap();
        assert_eq!(decoded, probe);

        assert!(matches!(
            decode_record::<Probe>(*b"TEST", 2, &bytes),
            Err(Error::Corrupt(_))
        ));
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode_record::<Probe>(*b"TEST", 1, &bytes),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("nested").join("file.bin.tmp").exists());
    }

    #[test]
    fn test_pack_row_skips_nulls() {
        let def = TableDefinition::new("test", "t")
            .column(ColumnSpec::new("a", ColumnKind::Int { unsigned: false }).not_null())
            .column(ColumnSpec::new("b", ColumnKind::Varchar { length: 20 }))
            .column(ColumnSpec::new("c", ColumnKind::Blob));
        let fields = FieldSet::new(&def).unwrap();

        let mut row = fields.new_row();
        fields.field(0).store(&mut row, &Value::Int(-5)).unwrap();
        fields.field(2).store(&mut row, &Value::from("payload")).unwrap();

        let packed = pack_row(&fields, &row);
        // bitmap + 4 byte int + 4 byte blob length + payload
        assert_eq!(packed.len(), 1 + 4 + 4 + 7);

        let back = unpack_row(&fields, &packed).unwrap();
        assert_eq!(fields.values(&back), fields.values(&row));
        assert!(fields.field(1).is_null(&back));
    }
}
