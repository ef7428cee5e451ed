//! Device-level local actions
//!
//! Buttons, the web UI and remote commands request device actions through a
//! small queue. The queue is drained once per tick, after supervision and
//! before element work, so a request never runs in the middle of a hook.

use heapless::Deque;

/// Maximum number of queued requests
pub const ACTION_QUEUE_LEN: usize = 8;

/// Minimum time in configuration mode before the combined action resets
pub const FACTORY_RESET_GUARD_MS: u64 = 2000;

/// Device actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LocalAction {
    SoftRestart,
    EnterConfigMode,
    /// Leave configuration mode by restarting
    LeaveConfigMode,
    ToggleConfigMode,
    ResetToFactorySettings,
    StartLocalWebServer,
    StopLocalWebServer,
    CheckSwUpdate,
    /// Enter configuration mode, or reset to factory settings when already
    /// in it for more than [`FACTORY_RESET_GUARD_MS`]
    EnterConfigModeOrResetToFactory,
}

/// Bounded FIFO of pending actions
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: Deque<LocalAction, ACTION_QUEUE_LEN>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action; returns `false` when the queue is full
    pub fn push(&mut self, action: LocalAction) -> bool {
        if self.pending.push_back(action).is_err() {
            warn!("Action queue full, dropping {:?}", action);
            return false;
        }
        true
    }

    pub fn pop(&mut self) -> Option<LocalAction> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
