use crate::field::StoreStatus;
use std::fmt;

pub const WARN_DATA_OUT_OF_RANGE: u32 = 1264;
pub const WARN_DATA_TRUNCATED: u32 = 1265;
pub const WARN_NULL_TO_NOTNULL: u32 = 1263;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub level: Level,
    pub code: u32,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.level, self.code, self.message)
    }
}

/// Warnings raised while a statement runs.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    list: Vec<Warning>,
}

impl Warnings {
    pub fn push(&mut self, level: Level, code: u32, message: String) {
        self.list.push(Warning {
            level,
            code,
            message,
        });
    }

    /// Records the warning matching a column store outcome, if any.
    pub fn push_store_status(&mut self, column: &str, row: u64, status: StoreStatus) {
        match status {
            StoreStatus::Ok => {}
            StoreStatus::Truncated => self.push(
                Level::Warning,
                WARN_DATA_TRUNCATED,
                format!("Data truncated for column '{}' at row {}", column, row),
            ),
            StoreStatus::OutOfRange => self.push(
                Level::Warning,
                WARN_DATA_OUT_OF_RANGE,
                format!("Out of range value for column '{}' at row {}", column, row),
            ),
            StoreStatus::NullToNotNull => self.push(
                Level::Warning,
                WARN_NULL_TO_NOTNULL,
                format!("Column '{}' cannot be null at row {}", column, row),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn count(&self, level: Level) -> usize {
        self.list.iter().filter(|w| w.level == level).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.list.iter()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_status_mapping() {
        let mut warnings = Warnings::default();
        warnings.push_store_status("a", 1, StoreStatus::Ok);
        warnings.push_store_status("a", 1, StoreStatus::OutOfRange);
        warnings.push_store_status("b", 2, StoreStatus::Truncated);
        assert_eq!(warnings.len(), 2);
        let codes: Vec<u32> = warnings.iter().map(|w| w.code).collect();
        assert_eq!(codes, vec![WARN_DATA_OUT_OF_RANGE, WARN_DATA_TRUNCATED]);
        assert_eq!(warnings.count(Level::Warning), 2);
        warnings.clear();
        assert!(warnings.is_empty());
    }
}
