//! Virtual relay output
//!
//! An output with no hardware behind it. Clones share the same level, so a
//! web UI or simulation can observe a relay the runtime owns, from any
//! thread.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use hestia_core::traits::RelayOutput;

#[derive(Debug, Clone, Default)]
pub struct VirtualRelayOutput {
    on: Arc<AtomicBool>,
    switches: Arc<AtomicU32>,
}

impl VirtualRelayOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of level changes so far
    pub fn switch_count(&self) -> u32 {
        self.switches.load(Ordering::Relaxed)
    }
}

impl RelayOutput for VirtualRelayOutput {
    fn set(&mut self, on: bool) {
        if self.on.swap(on, Ordering::AcqRel) != on {
            self.switches.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }
}
