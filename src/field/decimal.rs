use super::{Field, FieldMeta, StoreStatus, Value};
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const DIGITS_PER_GROUP: usize = 9;
const GROUP_BASE: u128 = 1_000_000_000;
/// Bytes needed for a partial group of n digits.
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

fn pow10(n: u32) -> i128 {
    10i128.pow(n)
}

/// Fixed-point number: `unscaled / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    unscaled: i128,
    scale: u8,
}

impl Decimal {
    pub fn new(unscaled: i128, scale: u8) -> Self {
        Decimal { unscaled, scale }
    }

    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn scale_factor(&self) -> i128 {
        pow10(self.scale as u32)
    }

    /// Rounds half away from zero to `scale` digits. The flag reports a
    /// dropped non-zero digit.
    pub fn rescale(&self, scale: u8) -> (Decimal, bool) {
        if scale >= self.scale {
            let factor = pow10((scale - self.scale) as u32);
            return (Decimal::new(self.unscaled.saturating_mul(factor), scale), false);
        }
        let factor = pow10((self.scale - scale) as u32);
        let quotient = self.unscaled / factor;
        let remainder = self.unscaled % factor;
        let mut rounded = quotient;
        if remainder.abs() * 2 >= factor {
            rounded += self.unscaled.signum();
        }
        (Decimal::new(rounded, scale), remainder != 0)
    }

    pub fn round_to_integer(&self) -> i128 {
        self.rescale(0).0.unscaled
    }

    pub fn to_f64(&self) -> f64 {
        self.unscaled as f64 / 10f64.powi(self.scale as i32)
    }

    pub fn from_f64(v: f64, scale: u8) -> Option<Decimal> {
        if !v.is_finite() {
            return None;
        }
        let scaled = (v * 10f64.powi(scale as i32)).round();
        if scaled.abs() >= 1e38 {
            return None;
        }
        Some(Decimal::new(scaled as i128, scale))
    }
}

impl FromStr for Decimal {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if (int_part.is_empty() && frac_part.is_empty())
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || int_part.len() + frac_part.len() > 38
        {
            return Err(err!(Encoding, "Incorrect decimal value: '{}'", s));
        }
        let mut unscaled: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            unscaled = unscaled * 10 + (b - b'0') as i128;
        }
        if negative {
            unscaled = -unscaled;
        }
        Ok(Decimal::new(unscaled, frac_part.len() as u8))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let abs = self.unscaled.unsigned_abs();
        if self.scale == 0 {
            return write!(f, "{}{}", sign, abs);
        }
        let factor = 10u128.pow(self.scale as u32);
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / factor,
            abs % factor,
            width = self.scale as usize
        )
    }
}

/// DECIMAL(p, s) in the sortable binary form: nine decimal digits per four
/// bytes, big-endian, leftover digits in the fewest bytes that hold them.
/// Negative values are stored with every byte inverted and the first byte's
/// top bit marks the sign, so unsigned byte comparison orders values.
#[derive(Debug)]
pub struct DecimalField {
    meta: FieldMeta,
    kind: ColumnKind,
    precision: u8,
    scale: u8,
}

fn bin_size(precision: u8, scale: u8) -> usize {
    let intg = (precision - scale) as usize;
    let frac = scale as usize;
    (intg / DIGITS_PER_GROUP) * 4
        + DIG2BYTES[intg % DIGITS_PER_GROUP]
        + (frac / DIGITS_PER_GROUP) * 4
        + DIG2BYTES[frac % DIGITS_PER_GROUP]
}

fn put_be(out: &mut Vec<u8>, v: u128, n: usize) {
    for k in (0..n).rev() {
        out.push((v >> (8 * k)) as u8);
    }
}

fn get_be(bytes: &[u8]) -> u128 {
    bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128)
}

impl DecimalField {
    pub fn new(mut meta: FieldMeta, kind: ColumnKind, precision: u8, scale: u8) -> Self {
        meta.pack_length = bin_size(precision, scale);
        DecimalField {
            meta,
            kind,
            precision,
            scale,
        }
    }

    fn max_unscaled(&self) -> i128 {
        pow10(self.precision as u32) - 1
    }

    fn encode(&self, d: Decimal) -> Vec<u8> {
        let intg = (self.precision - self.scale) as usize;
        let frac = self.scale as usize;
        let abs = d.unscaled.unsigned_abs();
        let frac_factor = 10u128.pow(frac as u32);
        let int_part = abs / frac_factor;
        let frac_part = abs % frac_factor;

        let mut out = Vec::with_capacity(self.meta.pack_length);
        let intg0 = intg / DIGITS_PER_GROUP;
        let intg0x = intg % DIGITS_PER_GROUP;
        let lead = int_part / 10u128.pow((intg0 * DIGITS_PER_GROUP) as u32);
        put_be(&mut out, lead, DIG2BYTES[intg0x]);
        for i in (0..intg0).rev() {
            let group = (int_part / GROUP_BASE.pow(i as u32)) % GROUP_BASE;
            put_be(&mut out, group, 4);
        }

        let frac0 = frac / DIGITS_PER_GROUP;
        let frac0x = frac % DIGITS_PER_GROUP;
        for i in 0..frac0 {
            let shift = (frac - DIGITS_PER_GROUP * (i + 1)) as u32;
            let group = (frac_part / 10u128.pow(shift)) % GROUP_BASE;
            put_be(&mut out, group, 4);
        }
        put_be(&mut out, frac_part % 10u128.pow(frac0x as u32), DIG2BYTES[frac0x]);

        if d.unscaled < 0 {
            for b in out.iter_mut() {
                *b = !*b;
            }
        }
        if let Some(first) = out.first_mut() {
            *first ^= 0x80;
        }
        out
    }

    fn decode(&self, bytes: &[u8]) -> Decimal {
        let mut buf = bytes[..self.meta.pack_length].to_vec();
        if buf.is_empty() {
            return Decimal::new(0, self.scale);
        }
        buf[0] ^= 0x80;
        let negative = bytes[0] & 0x80 == 0;
        if negative {
            for b in buf.iter_mut() {
                *b = !*b;
            }
        }

        let intg = (self.precision - self.scale) as usize;
        let frac = self.scale as usize;
        let mut pos = 0;
        let mut take = |n: usize| {
            let v = get_be(&buf[pos..pos + n]);
            pos += n;
            v
        };

        let intg0 = intg / DIGITS_PER_GROUP;
        let mut int_part = take(DIG2BYTES[intg % DIGITS_PER_GROUP]);
        for _ in 0..intg0 {
            int_part = int_part * GROUP_BASE + take(4);
        }
        let frac0x = frac % DIGITS_PER_GROUP;
        let mut frac_part: u128 = 0;
        for _ in 0..frac / DIGITS_PER_GROUP {
            frac_part = frac_part * GROUP_BASE + take(4);
        }
        frac_part = frac_part * 10u128.pow(frac0x as u32) + take(DIG2BYTES[frac0x]);

        let abs = int_part * 10u128.pow(frac as u32) + frac_part;
        let unscaled = abs as i128;
        Decimal::new(if negative { -unscaled } else { unscaled }, self.scale)
    }

    fn convert(&self, value: &Value) -> (Decimal, StoreStatus) {
        let parsed = match value {
            Value::Decimal(d) => Some(*d),
            Value::Int(v) => Some(Decimal::new(*v as i128, 0)),
            Value::UInt(v) => Some(Decimal::new(*v as i128, 0)),
            Value::Double(f) => Decimal::from_f64(*f, self.scale),
            other => String::from_utf8_lossy(&other.to_text()).parse::<Decimal>().ok(),
        };
        let d = match parsed {
            Some(d) => d,
            None => return (Decimal::new(0, self.scale), StoreStatus::Truncated),
        };
        let (d, lossy) = d.rescale(self.scale);
        let max = self.max_unscaled();
        if d.unscaled > max {
            (Decimal::new(max, self.scale), StoreStatus::OutOfRange)
        } else if d.unscaled < -max {
            (Decimal::new(-max, self.scale), StoreStatus::OutOfRange)
        } else if lossy {
            (d, StoreStatus::Truncated)
        } else {
            (d, StoreStatus::Ok)
        }
    }
}

impl Field for DecimalField {
    fn meta(&self) -> &FieldMeta {
        &self.meta
    }

    fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let (d, status) = self.convert(value);
        let bytes = self.encode(d);
        self.raw_mut(row).copy_from_slice(&bytes);
        Ok(status)
    }

    fn val(&self, row: &RowBuffer) -> Value {
        Value::Decimal(self.decode(self.raw(row)))
    }

    fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
        self.raw(a).cmp(self.raw(b))
    }

    fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, _max_length: usize) {
        to.extend_from_slice(self.raw(row));
    }

    fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
        let n = self.meta.pack_length;
        if from.len() < n {
            return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
        }
        self.raw_mut(row).copy_from_slice(&from[..n]);
        Ok(n)
    }

    fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, _length: usize) -> usize {
        out.extend_from_slice(self.raw(row));
        self.meta.pack_length
    }

    fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], _length: usize) -> Result<()> {
        self.unpack(row, key).map(|_| ())
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        let n = self.meta.pack_length;
        a[..n.min(a.len())].cmp(&b[..n.min(b.len())])
    }

    fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
        let raw = self.raw(row);
        let n = out.len().min(raw.len());
        out[..n].copy_from_slice(&raw[..n]);
    }

    fn reset(&self, row: &mut RowBuffer) {
        let bytes = self.encode(Decimal::new(0, self.scale));
        self.raw_mut(row).copy_from_slice(&bytes);
    }
}
