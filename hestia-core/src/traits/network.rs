//! Network interface traits

use crate::storage::ConfigStore;

/// Network interface operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkMode {
    /// Connect to the configured network
    Normal,
    /// Provide a local access point for configuration
    Config,
}

/// A network interface (Wi-Fi, Ethernet, cellular)
pub trait NetworkInterface {
    /// Load interface settings
    ///
    /// Returns `false` when required settings (such as Wi-Fi credentials)
    /// are missing.
    fn load_config(&mut self, _config: &mut ConfigStore) -> bool {
        true
    }

    /// Start bringing the interface up
    fn setup(&mut self);

    /// Whether the interface has connectivity
    fn is_ready(&mut self) -> bool;

    /// Periodic work
    fn iterate(&mut self) {}

    /// Switch between normal and configuration operation
    fn set_mode(&mut self, mode: NetworkMode);

    /// Shut the interface down
    fn uninit(&mut self);
}

/// Local configuration web server
pub trait LocalWebServer {
    fn start(&mut self);

    fn stop(&mut self);
}
