use crate::errors::{Error, Result};
use bincode::{Decode, Encode};
use std::fmt;
use std::str::FromStr;

/// Global transaction identifier shared by every engine taking part in one
/// two-phase commit.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid {
    pub format_id: u32,
    pub gtrid: String,
    pub bqual: String,
}

pub const DEFAULT_FORMAT_ID: u32 = 1;
const MAX_PART_LEN: usize = 64;

impl Xid {
    pub fn new(gtrid: &str) -> Self {
        Xid {
            format_id: DEFAULT_FORMAT_ID,
            gtrid: gtrid.to_string(),
            bqual: String::new(),
        }
    }

    pub fn with_branch(mut self, bqual: &str) -> Self {
        self.bqual = bqual.to_string();
        self
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.format_id, self.gtrid, self.bqual)
    }
}

/// Accepts `format:gtrid:bqual` as printed by `Display`, or a bare gtrid.
impl FromStr for Xid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        let xid = match parts.as_slice() {
            [gtrid] => Xid::new(gtrid),
            [format, gtrid, bqual] => Xid {
                format_id: format.parse()?,
                gtrid: gtrid.to_string(),
                bqual: bqual.to_string(),
            },
            _ => return Err(err!(Transaction, "Malformed XID '{}'", s)),
        };
        if xid.gtrid.is_empty() || xid.gtrid.len() > MAX_PART_LEN || xid.bqual.len() > MAX_PART_LEN {
            return Err(err!(Transaction, "Malformed XID '{}'", s));
        }
        Ok(xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let xid = Xid::new("abc-1").with_branch("b");
        assert_eq!(xid.to_string(), "1:abc-1:b");
        assert_eq!("1:abc-1:b".parse::<Xid>().unwrap(), xid);
        assert_eq!("abc-1".parse::<Xid>().unwrap(), Xid::new("abc-1"));
        assert!("x:y".parse::<Xid>().is_err());
        assert!("".parse::<Xid>().is_err());
    }
}
