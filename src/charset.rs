//! Character sets and their collations.
//!
//! Only what the column layer needs: byte width bounds, well-formedness,
//! character positions, PAD SPACE comparison and sort keys.

use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Binary,
    Latin1,
    Utf8mb4,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Charset {
    pub name: &'static str,
    /// Worst-case bytes per character.
    pub mbmaxlen: usize,
    kind: Kind,
}

pub static BINARY: Charset = Charset {
    name: "binary",
    mbmaxlen: 1,
    kind: Kind::Binary,
};

pub static LATIN1: Charset = Charset {
    name: "latin1",
    mbmaxlen: 1,
    kind: Kind::Latin1,
};

pub static UTF8MB4: Charset = Charset {
    name: "utf8mb4",
    mbmaxlen: 4,
    kind: Kind::Utf8mb4,
};

/// Names and aliases accepted in column definitions.
static BY_NAME: Lazy<HashMap<&'static str, &'static Charset>> = Lazy::new(|| {
    HashMap::from([
        ("binary", &BINARY),
        ("latin1", &LATIN1),
        ("utf8", &UTF8MB4),
        ("utf8mb3", &UTF8MB4),
        ("utf8mb4", &UTF8MB4),
    ])
});

/// Looks a character set up by name (case-insensitive).
pub fn by_name(name: &str) -> Option<&'static Charset> {
    BY_NAME.get(name.to_ascii_lowercase().as_str()).copied()
}

/// Byte length of the UTF-8 sequence introduced by `lead`, 0 if invalid.
fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

/// Length of the valid UTF-8 sequence at the start of `bytes`, if any.
fn utf8_char_len(bytes: &[u8]) -> Option<usize> {
    let width = utf8_width(*bytes.first()?);
    if width == 0 || bytes.len() < width {
        return None;
    }
    std::str::from_utf8(&bytes[..width]).ok().map(|_| width)
}

/// Result of copying a possibly ill-formed, possibly too long input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellFormed {
    /// Bytes that may be copied.
    pub length: usize,
    /// The input held an ill-formed sequence before the cut.
    pub ill_formed: bool,
    /// The input was longer than what fits.
    pub truncated: bool,
}

impl Charset {
    pub fn is_binary(&self) -> bool {
        self.kind == Kind::Binary
    }

    /// Longest well-formed prefix of `src` holding at most `max_chars`
    /// characters and `max_bytes` bytes. Never splits a multi-byte character.
    pub fn well_formed_len(&self, src: &[u8], max_bytes: usize, max_chars: usize) -> WellFormed {
        match self.kind {
            Kind::Binary | Kind::Latin1 => {
                let length = src.len().min(max_bytes).min(max_chars);
                WellFormed {
                    length,
                    ill_formed: false,
                    truncated: length < src.len(),
                }
            }
            Kind::Utf8mb4 => {
                let mut pos = 0;
                let mut chars = 0;
                while pos < src.len() && chars < max_chars {
                    let width = match utf8_char_len(&src[pos..]) {
                        Some(w) => w,
                        None => {
                            return WellFormed {
                                length: pos,
                                ill_formed: true,
                                truncated: true,
                            }
                        }
                    };
                    if pos + width > max_bytes {
                        break;
                    }
                    pos += width;
                    chars += 1;
                }
                WellFormed {
                    length: pos,
                    ill_formed: false,
                    truncated: pos < src.len(),
                }
            }
        }
    }

    /// Byte offset just past the first `nchars` characters of `src`.
    pub fn charpos(&self, src: &[u8], nchars: usize) -> usize {
        match self.kind {
            Kind::Binary | Kind::Latin1 => src.len().min(nchars),
            Kind::Utf8mb4 => {
                let mut pos = 0;
                let mut chars = 0;
                while pos < src.len() && chars < nchars {
                    let width = utf8_char_len(&src[pos..]).unwrap_or(1);
                    pos = (pos + width).min(src.len());
                    chars += 1;
                }
                pos
            }
        }
    }

    /// Number of characters in `src`.
    pub fn numchars(&self, src: &[u8]) -> usize {
        match self.kind {
            Kind::Binary | Kind::Latin1 => src.len(),
            Kind::Utf8mb4 => {
                let mut pos = 0;
                let mut chars = 0;
                while pos < src.len() {
                    pos += utf8_char_len(&src[pos..]).unwrap_or(1);
                    chars += 1;
                }
                chars
            }
        }
    }

    /// Folds `src` into its collation weight string (trailing spaces kept).
    fn weights(&self, src: &[u8]) -> Vec<u8> {
        match self.kind {
            Kind::Binary => src.to_vec(),
            Kind::Latin1 => src.iter().map(|b| b.to_ascii_uppercase()).collect(),
            Kind::Utf8mb4 => String::from_utf8_lossy(src)
                .chars()
                .flat_map(|c| c.to_uppercase())
                .collect::<String>()
                .into_bytes(),
        }
    }

    /// Collation-aware comparison with PAD SPACE semantics: trailing spaces
    /// are not significant unless the character set is binary.
    pub fn strnncollsp(&self, a: &[u8], b: &[u8]) -> Ordering {
        if self.is_binary() {
            return a.cmp(b);
        }
        let wa = self.weights(a);
        let wb = self.weights(b);
        let ta = trim_trailing_spaces(&wa);
        let tb = trim_trailing_spaces(&wb);
        ta.cmp(tb)
    }

    /// Writes a byte-comparable sort key of exactly `out.len()` bytes,
    /// space padded.
    pub fn strnxfrm(&self, out: &mut [u8], src: &[u8]) -> usize {
        let weights = self.weights(src);
        let trimmed = if self.is_binary() {
            &weights[..]
        } else {
            trim_trailing_spaces(&weights)
        };
        let n = trimmed.len().min(out.len());
        out[..n].copy_from_slice(&trimmed[..n]);
        let pad = if self.is_binary() { 0 } else { b' ' };
        for b in out[n..].iter_mut() {
            *b = pad;
        }
        out.len()
    }

    /// Collation weights with trailing spaces removed; equal for values that
    /// compare equal.
    pub fn fold(&self, src: &[u8]) -> Vec<u8> {
        let weights = self.weights(src);
        if self.is_binary() {
            weights
        } else {
            trim_trailing_spaces(&weights).to_vec()
        }
    }
}

fn trim_trailing_spaces(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_well_formed_never_splits() {
        // "héllo": é is 2 bytes
        let src = "héllo".as_bytes();
        let wf = UTF8MB4.well_formed_len(src, 2, 10);
        assert_eq!(wf.length, 1);
        assert!(wf.truncated);
        let wf = UTF8MB4.well_formed_len(src, 3, 10);
        assert_eq!(wf.length, 3);
        let wf = UTF8MB4.well_formed_len(src, 40, 2);
        assert_eq!(wf.length, 3);
        assert!(!UTF8MB4.well_formed_len(src, 40, 10).truncated);
    }

    #[test]
    fn test_utf8_ill_formed() {
        let src = [b'a', 0xFF, b'b'];
        let wf = UTF8MB4.well_formed_len(&src, 10, 10);
        assert_eq!(wf.length, 1);
        assert!(wf.ill_formed);
    }

    #[test]
    fn test_pad_space_and_case() {
        assert_eq!(LATIN1.strnncollsp(b"abc", b"ABC  "), Ordering::Equal);
        assert_eq!(UTF8MB4.strnncollsp("É".as_bytes(), "é".as_bytes()), Ordering::Equal);
        assert_eq!(BINARY.strnncollsp(b"abc", b"abc "), Ordering::Less);
        assert_eq!(LATIN1.strnncollsp(b"abc", b"abd"), Ordering::Less);
    }

    #[test]
    fn test_charpos() {
        let src = "aéb".as_bytes();
        assert_eq!(UTF8MB4.charpos(src, 2), 3);
        assert_eq!(UTF8MB4.numchars(src), 3);
        assert_eq!(LATIN1.charpos(b"abc", 5), 3);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("UTF8").map(|c| c.name), Some("utf8mb4"));
        assert!(by_name("koi8r").is_none());
    }
}
