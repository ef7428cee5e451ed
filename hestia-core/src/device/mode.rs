//! Device operating modes
//!
//! The operating mode decides what the main loop does after the
//! always-running element work: drive the protocol layers, serve the local
//! configuration UI, run a firmware update, or nothing at all.

/// Operating modes
///
/// The numeric codes are persisted and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum DeviceMode {
    /// Nothing stored; treated as Normal at boot
    #[default]
    NotSet = 0,
    /// Factory test; incomplete configuration is not an error
    Test = 1,
    /// Connected operation
    Normal = 2,
    /// Local configuration (access point + web UI), protocols stopped
    Config = 3,
    /// Firmware update in progress
    SwUpdate = 4,
    /// Running without any network
    Offline = 5,
}

impl DeviceMode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DeviceMode::NotSet),
            1 => Some(DeviceMode::Test),
            2 => Some(DeviceMode::Normal),
            3 => Some(DeviceMode::Config),
            4 => Some(DeviceMode::SwUpdate),
            5 => Some(DeviceMode::Offline),
            _ => None,
        }
    }

    /// Whether protocol layers are iterated in this mode
    ///
    /// An unset mode behaves like Normal.
    pub fn runs_protocols(self) -> bool {
        matches!(self, DeviceMode::NotSet | DeviceMode::Normal | DeviceMode::Test)
    }

    /// Whether the network interface is used at all
    pub fn uses_network(self) -> bool {
        !matches!(self, DeviceMode::Offline)
    }

    /// Process an event and return the next mode
    pub fn transition(self, event: ModeEvent) -> Self {
        use DeviceMode::*;
        use ModeEvent::*;

        match (self, event) {
            // Boot: the stored mode is resolved against config completeness
            (_, ConfigIncomplete) => Config,
            (NotSet | Config, ConfigComplete) => Normal,
            (Config, NoConfigOffline) => Offline,

            // Configuration mode can be entered from any mode except an update
            (SwUpdate, EnterConfig) => SwUpdate,
            (_, EnterConfig) => Config,

            // Firmware update is never started from configuration mode
            (Normal | Test | Offline, StartSwUpdate) => SwUpdate,
            (SwUpdate, SwUpdateDone) => Normal,

            // Default: stay in current mode
            _ => self,
        }
    }
}

/// Events changing the operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeEvent {
    /// Device or protocol configuration is missing required fields
    ConfigIncomplete,
    /// Configuration is complete
    ConfigComplete,
    /// Configuration is empty and the device may run without network
    NoConfigOffline,
    /// Local or remote request for configuration mode
    EnterConfig,
    /// Firmware update requested
    StartSwUpdate,
    /// Updater finished or gave up
    SwUpdateDone,
}

/// Mode policy applied when the configuration is incomplete at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitialMode {
    /// Enter configuration mode
    #[default]
    ConfigMode,
    /// Run offline when nothing at all is configured
    Offline,
}
