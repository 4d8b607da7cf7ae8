//! Table-scoped auto-increment counter.
//!
//! The counter always holds the next value to hand out. It only moves
//! forward: a reservation advances it past the block it returns, and an
//! explicit value advances it to `explicit + 1` when that is larger. Values
//! reserved but never used are not returned to the counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A contiguous block `first..first + count` handed to one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    next: u64,
    end: u64,
}

impl Reservation {
    pub fn empty() -> Self {
        Reservation { next: 0, end: 0 }
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    /// Whether `value` would still be handed out from this block.
    pub fn covers(&self, value: u64) -> bool {
        value >= self.next && value < self.end
    }

    pub fn take(&mut self) -> Option<u64> {
        if self.next < self.end {
            let value = self.next;
            self.next += 1;
            Some(value)
        } else {
            None
        }
    }

    /// Drops unused values once an explicit value overtook the block.
    pub fn discard_below(&mut self, explicit: u64) {
        if explicit >= self.next {
            self.next = self.end;
        }
    }
}

#[derive(Debug)]
pub struct AutoIncrement {
    next: Mutex<u64>,
    acquisitions: AtomicU64,
}

impl AutoIncrement {
    pub fn new(next: u64) -> Self {
        AutoIncrement {
            next: Mutex::new(next.max(1)),
            acquisitions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.next.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserves `count` consecutive values under one lock acquisition.
    pub fn reserve(&self, count: u64) -> Reservation {
        let count = count.max(1);
        let mut next = self.lock();
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let first = *next;
        *next = first.saturating_add(count);
        Reservation {
            next: first,
            end: *next,
        }
    }

    /// Records a value the caller supplied explicitly.
    pub fn observe(&self, explicit: u64) {
        let mut next = self.lock();
        if explicit >= *next {
            *next = explicit.saturating_add(1);
        }
    }

    pub fn next_value(&self) -> u64 {
        *self.lock()
    }

    /// Moves the counter forward only.
    pub fn set_next(&self, value: u64) {
        let mut next = self.lock();
        if value > *next {
            *next = value;
        }
    }

    /// Number of reservations made, each one lock acquisition.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}
