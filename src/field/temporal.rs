//! DATE, DATETIME, TIMESTAMP and TIME.
//!
//! DATE is the integer YYYYMMDD in 4 bytes, DATETIME the integer
//! YYYYMMDDhhmmss in 8 bytes, TIMESTAMP seconds since the Unix epoch in
//! 8 bytes and TIME seconds since midnight in 4 bytes. All little-endian;
//! the all-zero value is the "zero date" stored for invalid input.

use super::{Field, FieldMeta, StoreStatus, Value};
use crate::definition::ColumnKind;
use crate::errors::Result;
use crate::row::RowBuffer;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::cmp::Ordering;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT: &str = "%H:%M:%S";

fn text_of(value: &Value) -> String {
    String::from_utf8_lossy(&value.to_text()).trim().to_string()
}

fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Int(_) | Value::UInt(_) => {
            let n = value.as_i64()?;
            if n > 99_991_231 {
                datetime_from_number(n)
            } else {
                date_from_number(n).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        }
        _ => {
            let text = text_of(value);
            NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(&text, DATE_FORMAT)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
    }
}

fn date_from_number(n: i64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt((n / 10_000) as i32, ((n / 100) % 100) as u32, (n % 100) as u32)
}

fn datetime_from_number(n: i64) -> Option<NaiveDateTime> {
    let date = date_from_number(n / 1_000_000)?;
    let t = n % 1_000_000;
    date.and_hms_opt((t / 10_000) as u32, ((t / 100) % 100) as u32, (t % 100) as u32)
}

fn date_to_number(d: &NaiveDate) -> i64 {
    d.year() as i64 * 10_000 + d.month() as i64 * 100 + d.day() as i64
}

fn datetime_to_number(dt: &NaiveDateTime) -> i64 {
    date_to_number(&dt.date()) * 1_000_000
        + dt.hour() as i64 * 10_000
        + dt.minute() as i64 * 100
        + dt.second() as i64
}

/// Status for a value that had to give up its time portion.
fn dropped_time(dt: &NaiveDateTime) -> StoreStatus {
    if dt.time() == NaiveTime::default() {
        StoreStatus::Ok
    } else {
        StoreStatus::Truncated
    }
}

macro_rules! fixed_width_field {
    ($name:ident, $width:expr, $int:ty, $kind:expr) => {
        #[derive(Debug)]
        pub struct $name {
            meta: FieldMeta,
            kind: ColumnKind,
        }

        impl $name {
            pub fn new(mut meta: FieldMeta) -> Self {
                meta.pack_length = $width;
                $name { meta, kind: $kind }
            }

            fn read(bytes: &[u8]) -> $int {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$int>::from_le_bytes(buf)
            }

            fn write(&self, row: &mut RowBuffer, v: $int) {
                self.raw_mut(row).copy_from_slice(&v.to_le_bytes());
            }

            fn number(&self, row: &RowBuffer) -> $int {
                Self::read(self.raw(row))
            }
        }
    };
}

/// Shared trait body for the fixed-width temporal fields.
macro_rules! fixed_width_impl {
    ($width:expr) => {
        fn meta(&self) -> &FieldMeta {
            &self.meta
        }

        fn kind(&self) -> &ColumnKind {
            &self.kind
        }

        fn cmp(&self, a: &RowBuffer, b: &RowBuffer) -> Ordering {
            self.number(a).cmp(&self.number(b))
        }

        fn pack(&self, row: &RowBuffer, to: &mut Vec<u8>, _max_length: usize) {
            to.extend_from_slice(self.raw(row));
        }

        fn unpack(&self, row: &mut RowBuffer, from: &[u8]) -> Result<usize> {
            if from.len() < $width {
                return Err(err!(Corrupt, "Packed value for '{}' truncated", self.meta.name));
            }
            self.raw_mut(row).copy_from_slice(&from[..$width]);
            Ok($width)
        }

        fn key_image(&self, row: &RowBuffer, out: &mut Vec<u8>, _length: usize) -> usize {
            out.extend_from_slice(self.raw(row));
            $width
        }

        fn set_key_image(&self, row: &mut RowBuffer, key: &[u8], _length: usize) -> Result<()> {
            self.unpack(row, key).map(|_| ())
        }

        fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
            Self::read(a).cmp(&Self::read(b))
        }

        fn sort_key(&self, row: &RowBuffer, out: &mut [u8]) {
            let mut bytes = self.number(row).to_be_bytes();
            bytes[0] ^= 0x80;
            let n = out.len().min($width);
            out[..n].copy_from_slice(&bytes[..n]);
        }

        fn reset(&self, row: &mut RowBuffer) {
            self.raw_mut(row).fill(0);
        }
    };
}

fixed_width_field!(DateField, 4, i32, ColumnKind::Date);
fixed_width_field!(DateTimeField, 8, i64, ColumnKind::DateTime);
fixed_width_field!(TimestampField, 8, i64, ColumnKind::Timestamp);
fixed_width_field!(TimeField, 4, i32, ColumnKind::Time);

impl Field for DateField {
    fixed_width_impl!(4);

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        match parse_datetime(value) {
            Some(dt) => {
                self.write(row, date_to_number(&dt.date()) as i32);
                Ok(dropped_time(&dt))
            }
            None => {
                self.write(row, 0);
                Ok(StoreStatus::Truncated)
            }
        }
    }

    fn val(&self, row: &RowBuffer) -> Value {
        match date_from_number(self.number(row) as i64) {
            Some(d) => Value::Date(d),
            None => Value::from("0000-00-00"),
        }
    }
}

impl Field for DateTimeField {
    fixed_width_impl!(8);

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        match parse_datetime(value) {
            Some(dt) => {
                self.write(row, datetime_to_number(&dt));
                Ok(StoreStatus::Ok)
            }
            None => {
                self.write(row, 0);
                Ok(StoreStatus::Truncated)
            }
        }
    }

    fn val(&self, row: &RowBuffer) -> Value {
        match datetime_from_number(self.number(row)) {
            Some(dt) => Value::DateTime(dt),
            None => Value::from("0000-00-00 00:00:00"),
        }
    }
}

impl Field for TimestampField {
    fixed_width_impl!(8);

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        match parse_datetime(value) {
            Some(dt) => {
                let secs = dt.and_utc().timestamp();
                if secs < 0 {
                    self.write(row, 0);
                    return Ok(StoreStatus::OutOfRange);
                }
                self.write(row, secs);
                Ok(StoreStatus::Ok)
            }
            None => {
                self.write(row, 0);
                Ok(StoreStatus::Truncated)
            }
        }
    }

    fn val(&self, row: &RowBuffer) -> Value {
        match DateTime::from_timestamp(self.number(row), 0) {
            Some(dt) => Value::DateTime(dt.naive_utc()),
            None => Value::from("0000-00-00 00:00:00"),
        }
    }
}

impl Field for TimeField {
    fixed_width_impl!(4);

    fn store_value(&self, row: &mut RowBuffer, value: &Value) -> Result<StoreStatus> {
        let parsed = match value {
            Value::Time(t) => Some(*t),
            Value::DateTime(dt) => Some(dt.time()),
            _ => NaiveTime::parse_from_str(&text_of(value), TIME_FORMAT).ok(),
        };
        match parsed {
            Some(t) => {
                self.write(row, t.num_seconds_from_midnight() as i32);
                Ok(StoreStatus::Ok)
            }
            None => {
                self.write(row, 0);
                Ok(StoreStatus::Truncated)
            }
        }
    }

    fn val(&self, row: &RowBuffer) -> Value {
        let secs = self.number(row).max(0) as u32;
        Value::Time(NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::{ColumnKind, ColumnSpec, TableDefinition};
    use crate::field::{StoreStatus, Value};
    use crate::row::FieldSet;
    use chrono::{NaiveDate, NaiveTime};

    fn fields() -> FieldSet {
        let def = TableDefinition::new("test", "dt")
            .column(ColumnSpec::new("d", ColumnKind::Date))
            .column(ColumnSpec::new("dt", ColumnKind::DateTime))
            .column(ColumnSpec::new("ts", ColumnKind::Timestamp))
            .column(ColumnSpec::new("t", ColumnKind::Time));
        FieldSet::new(&def).unwrap()
    }

    #[test]
    fn test_date_stores_yyyymmdd() {
        let fields = fields();
        let d = fields.field(0);
        let mut row = fields.new_row();
        assert_eq!(d.store(&mut row, &Value::from("2024-02-29")).unwrap(), StoreStatus::Ok);
        assert_eq!(d.raw(&row), &20240229i32.to_le_bytes());
        assert_eq!(d.value(&row), Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        assert_eq!(d.store(&mut row, &Value::from("2023-02-30")).unwrap(), StoreStatus::Truncated);
        assert_eq!(d.value(&row), Value::from("0000-00-00"));

        assert_eq!(d.store(&mut row, &Value::from("2024-01-01 10:00:00")).unwrap(), StoreStatus::Truncated);
    }

    #[test]
    fn test_datetime_timestamp_and_time() {
        let fields = fields();
        let mut row = fields.new_row();
        let when = NaiveDate::from_ymd_opt(2001, 9, 9)
            .unwrap()
            .and_hms_opt(1, 46, 40)
            .unwrap();

        fields.field(1).store(&mut row, &Value::DateTime(when)).unwrap();
        assert_eq!(fields.field(1).value(&row), Value::DateTime(when));

        fields.field(2).store(&mut row, &Value::DateTime(when)).unwrap();
        assert_eq!(fields.field(2).raw(&row), &1_000_000_000i64.to_le_bytes());
        assert_eq!(fields.field(2).value(&row), Value::DateTime(when));

        fields.field(3).store(&mut row, &Value::from("12:30:05")).unwrap();
        assert_eq!(
            fields.field(3).value(&row),
            Value::Time(NaiveTime::from_hms_opt(12, 30, 5).unwrap())
        );
    }

    #[test]
    fn test_temporal_order() {
        let fields = fields();
        let dt = fields.field(1);
        let mut a = fields.new_row();
        let mut b = fields.new_row();
        dt.store(&mut a, &Value::from("1999-12-31 23:59:59")).unwrap();
        dt.store(&mut b, &Value::from("2000-01-01 00:00:00")).unwrap();
        assert_eq!(dt.cmp(&a, &b), std::cmp::Ordering::Less);
    }
}
