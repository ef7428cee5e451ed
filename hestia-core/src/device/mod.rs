//! Device runtime
//!
//! The runtime owns the element registry and every collaborator, brings the
//! device up in a fixed order and then runs the cooperative main loop.
//!
//! # Boot Order
//!
//! ```text
//! storage → protocol config → element config → state (validated) →
//! element init → timers → identity checks → protocol verify → mode
//! ```
//!
//! # Tick
//!
//! ```text
//! commit config → supervise → local actions → iterate_always + state save
//!   → network setup → mode: protocols + connected round-robin | update | -
//! ```

mod actions;
mod mode;
mod runtime;
mod status;
mod supervisor;

pub use actions::{ActionQueue, LocalAction, ACTION_QUEUE_LEN, FACTORY_RESET_GUARD_MS};
pub use mode::{DeviceMode, InitialMode, ModeEvent};
pub use runtime::{DeviceRuntime, NETWORK_RETRY_MS};
pub use status::{DeviceStatus, StatusLog, STATUS_HISTORY_LEN};
pub use supervisor::{RestartCause, Supervisor, Verdict, CONFIG_MODE_TIMEOUT_MS};

use heapless::String;

/// Default firmware update endpoint
pub const DEFAULT_SW_UPDATE_URL: &str = "https://updates.hestia.local/check";

/// Name used when none is configured
pub const DEFAULT_DEVICE_NAME: &str = "HESTIA-DEVICE";

/// Conditions that stop the device from booting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// `begin()` was already called
    AlreadyInitialized,
    MissingNetworkInterface,
    InvalidGuid,
    InvalidAuthKey,
    /// No protocol layer is enabled
    AllProtocolsDisabled,
    /// A protocol layer rejected its configuration and no config store
    /// exists to fix it
    ConfigVerificationFailed,
}

impl From<BootError> for DeviceStatus {
    fn from(error: BootError) -> Self {
        match error {
            BootError::AlreadyInitialized => DeviceStatus::AlreadyInitialized,
            BootError::MissingNetworkInterface => DeviceStatus::MissingNetworkInterface,
            BootError::InvalidGuid => DeviceStatus::InvalidGuid,
            BootError::InvalidAuthKey => DeviceStatus::InvalidAuthKey,
            BootError::AllProtocolsDisabled => DeviceStatus::AllProtocolsDisabled,
            BootError::ConfigVerificationFailed => DeviceStatus::Uninitialized,
        }
    }
}

/// Runtime policy
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// What to do with an incomplete configuration
    pub initial_mode: InitialMode,
    /// Inactivity timeout of a requested configuration mode
    pub config_mode_timeout_ms: u64,
    /// Restart after this long without a connection; 0 disables
    pub connection_fail_reset_s: u32,
    /// Minimum interval between periodic state saves
    pub state_save_period_ms: u64,
    /// Name used when the config store has none
    pub device_name: String<32>,
    pub sw_version: String<21>,
    /// Update endpoint used when the config store has none
    pub sw_update_url: String<96>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_mode: InitialMode::default(),
            config_mode_timeout_ms: CONFIG_MODE_TIMEOUT_MS,
            connection_fail_reset_s: 0,
            state_save_period_ms: crate::storage::state::MIN_SAVE_PERIOD_MS,
            device_name: bounded(DEFAULT_DEVICE_NAME),
            sw_version: bounded(env!("CARGO_PKG_VERSION")),
            sw_update_url: bounded(DEFAULT_SW_UPDATE_URL),
        }
    }
}

/// Copy `s` into a bounded string, truncating at a character boundary
pub(crate) fn bounded<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
