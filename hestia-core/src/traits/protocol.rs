//! Protocol layer traits

use hestia_protocol::{ChannelConfigMessage, ChannelValue, TimerReport};

use crate::storage::ConfigStore;

/// Outgoing messages from elements to the server
///
/// Each send returns `false` when the message could not be queued; the
/// element keeps its pending flag and retries on a later tick.
pub trait Uplink {
    fn send_channel_value(&mut self, channel: u8, value: &ChannelValue) -> bool;

    fn send_remaining_time(&mut self, report: &TimerReport) -> bool;

    fn send_channel_config(&mut self, message: &ChannelConfigMessage) -> bool;
}

/// A protocol stack (cloud session, MQTT, ...)
///
/// Framing, transport and encryption are implementation details. The
/// runtime only polls the layer and asks it about its state.
pub trait ProtocolLayer: Uplink {
    /// Load this layer's settings
    ///
    /// Returns `true` when the configuration is complete.
    fn on_load_config(&mut self, config: &mut ConfigStore) -> bool;

    /// Whether this layer has no configuration at all
    fn is_config_empty(&self) -> bool;

    /// Whether this layer is enabled
    fn is_enabled(&self) -> bool;

    /// Check the loaded configuration
    fn verify_config(&mut self) -> bool;

    /// Prepare the layer after configuration is loaded
    fn on_init(&mut self) {}

    /// Drive the session; returns `true` while registered and connected
    fn iterate(&mut self, now_ms: u64) -> bool;

    /// Whether the layer wants the network interface restarted
    fn is_network_restart_requested(&mut self) -> bool {
        false
    }

    /// Close the session
    fn disconnect(&mut self);

    /// A channel's configuration changed locally
    fn notify_config_change(&mut self, _channel: u8) {}

    /// Seconds spent without a working connection, 0 when connected
    fn connection_fail_time_s(&self) -> u32 {
        0
    }

    /// Consume a "registration completed" event
    fn take_registered_event(&mut self) -> bool {
        false
    }
}
