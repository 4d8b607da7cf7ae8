use crate::errors::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Named failure points the engine checks at its fragile steps. A point
/// fires once after being armed, optionally letting a number of checks pass
/// first.
#[derive(Debug, Default)]
pub struct FaultPoints {
    armed: Mutex<HashMap<String, usize>>,
}

pub const CREATE_INDEX: &str = "create_index";
pub const COMMIT_FLUSH: &str = "commit_flush";
pub const PREPARE: &str = "prepare";
pub const RESOLVE: &str = "resolve";

impl FaultPoints {
    pub fn arm(&self, name: &str) {
        self.arm_after(name, 0);
    }

    /// Fires on the check after `skip` passing ones.
    pub fn arm_after(&self, name: &str, skip: usize) {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), skip);
    }

    pub fn disarm(&self, name: &str) {
        self.armed.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
    }

    pub fn check(&self, name: &str) -> Result<()> {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        match armed.get_mut(name) {
            Some(0) => {
                armed.remove(name);
                warn!(point = name, "Injected fault");
                Err(err!(Engine, "tablespace: injected failure at '{}' (out of space)", name))
            }
            Some(skip) => {
                *skip -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_skips() {
        let faults = FaultPoints::default();
        faults.arm_after(CREATE_INDEX, 1);
        assert!(faults.check(CREATE_INDEX).is_ok());
        assert!(faults.check(CREATE_INDEX).is_err());
        assert!(faults.check(CREATE_INDEX).is_ok());
        assert!(faults.check(PREPARE).is_ok());
    }
}
