//! Host-side clock
//!
//! [`ManualClock`] is a [`Clock`] whose time only moves when told to. Clones
//! share the same time, so a simulation can keep one handle while the
//! runtime owns another.

use alloc::rc::Rc;
use core::cell::Cell;

use hestia_hal::Clock;

/// Manually advanced millisecond clock
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(start_ms)),
        }
    }

    /// Move time forward
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(delta_ms));
    }

    /// Jump to an absolute time; earlier times are ignored
    pub fn set(&self, now_ms: u64) {
        if now_ms > self.now_ms.get() {
            self.now_ms.set(now_ms);
        }
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u64 {
        self.now_ms.get()
    }
}
