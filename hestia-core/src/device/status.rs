//! Device status reporting
//!
//! Every lifecycle change goes through [`StatusLog::set`], which logs it and
//! keeps a short history for diagnostics.

use heapless::HistoryBuffer;

/// Number of status changes kept in the history
pub const STATUS_HISTORY_LEN: usize = 16;

/// Device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceStatus {
    #[default]
    Uninitialized,
    AlreadyInitialized,
    Initialized,
    MissingNetworkInterface,
    InvalidGuid,
    InvalidAuthKey,
    AllProtocolsDisabled,
    ConfigMode,
    OfflineMode,
    NetworkDisconnected,
    RegisterInProgress,
    RegisteredAndReady,
    SoftwareReset,
    SwDownload,
    SwUpdateFailed,
    SwUpdateComplete,
    ProtocolDisconnected,
}

impl DeviceStatus {
    /// Whether the device cannot run until externally corrected
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            DeviceStatus::MissingNetworkInterface
                | DeviceStatus::InvalidGuid
                | DeviceStatus::InvalidAuthKey
                | DeviceStatus::AllProtocolsDisabled
        )
    }
}

/// Current status plus the recent history
#[derive(Debug, Default)]
pub struct StatusLog {
    current: DeviceStatus,
    history: HistoryBuffer<DeviceStatus, STATUS_HISTORY_LEN>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> DeviceStatus {
        self.current
    }

    /// Record a status
    ///
    /// A repeated status is ignored unless `always_log` is set. Returns
    /// whether it was recorded.
    pub fn set(&mut self, status: DeviceStatus, always_log: bool) -> bool {
        if status == self.current && !always_log {
            return false;
        }
        if status.is_fatal() {
            error!("Status: {:?}", status);
        } else {
            info!("Status: {:?}", status);
        }
        self.current = status;
        self.history.write(status);
        true
    }

    /// Recorded statuses, oldest first
    pub fn history(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.history.oldest_ordered()
    }
}
