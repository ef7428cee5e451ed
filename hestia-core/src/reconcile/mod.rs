//! Channel configuration reconciliation
//!
//! A configurable channel has three sources for its settings:
//!
//! - compiled defaults, used only while nothing is persisted
//! - locally persisted values, which win over defaults at boot
//! - values pushed by the server, which overwrite the live settings
//!
//! Changes made on the device must reach the server. A local change raises
//! the per-channel change flag in the config store; the flag survives
//! reboots and is cleared only once the server accepts the configuration
//! sent by the channel.
//!
//! ```text
//!                 local change          send block          accepted
//!   None ──────────────────────► LocalChangePending ──► SetChannelConfigSent ──► None
//!    ▲                                   ▲                      │
//!    │ server config                     │ registered,          │ rejected
//!    │                                   │ flag still set       ▼
//!  WaitingForServerConfig ◄── registered, no flag ───────────  None (flag kept)
//! ```

use hestia_protocol::{ChannelConfigMessage, ConfigType};

use crate::element::{Channel, Context};
use crate::traits::Uplink;

/// Delay before configuration changes are committed to storage
pub const CONFIG_SAVE_DELAY_MS: u32 = 2000;

/// Where a configuration change comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigOrigin {
    /// Made on the device (web UI, local API); must be echoed to the server
    Local,
    /// Pushed by the server
    Server,
    /// Re-applied from storage; nothing to persist or report
    Reload,
}

impl ConfigOrigin {
    /// Whether the change must be written to the config store
    pub fn persists(self) -> bool {
        !matches!(self, ConfigOrigin::Reload)
    }
}

/// Synchronization state of a channel's configuration with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelConfigState {
    #[default]
    None,
    /// Local values must be sent to the server
    LocalChangePending,
    /// Local values sent, waiting for the result
    SetChannelConfigSent,
    /// Registered; the server is expected to push its configuration
    WaitingForServerConfig,
}

/// Update a field, returning whether it changed
pub fn set_field<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}

/// Record the outcome of a configuration update
///
/// The caller has already applied (and, when the origin persists, stored)
/// the new values. A local change additionally raises the change flag and
/// tells the protocol layers; local and server changes schedule a commit.
pub fn record_update(
    ctx: &mut Context<'_>,
    channel: &mut Channel,
    config_type: ConfigType,
    origin: ConfigOrigin,
    changed: bool,
) {
    if !changed {
        return;
    }
    match origin {
        ConfigOrigin::Local => {
            raise_change_flag(ctx, channel, config_type);
        }
        ConfigOrigin::Server => {
            ctx.config.save_with_delay(CONFIG_SAVE_DELAY_MS, ctx.now_ms);
        }
        ConfigOrigin::Reload => {}
    }
}

/// Mark the channel's configuration as needing to be sent
pub fn raise_change_flag(ctx: &mut Context<'_>, channel: &mut Channel, config_type: ConfigType) {
    let number = channel.number();
    debug!("Channel {}: local config change", number);
    channel.set_config_state(ChannelConfigState::LocalChangePending);
    ctx.config.set_channel_config_change_flag(number, config_type);
    ctx.config.save_with_delay(CONFIG_SAVE_DELAY_MS, ctx.now_ms);
    ctx.notify_config_change(number);
}

/// Restore the synchronization state at boot from the persisted flag
pub fn load_change_flag(ctx: &mut Context<'_>, channel: &mut Channel, config_type: ConfigType) {
    if ctx
        .config
        .is_channel_config_change_flag_set(channel.number(), config_type)
    {
        channel.set_config_state(ChannelConfigState::LocalChangePending);
    }
}

/// Whether local values still wait to be sent
///
/// While they do, server-pushed live values are not applied.
pub fn is_local_change_pending(
    ctx: &mut Context<'_>,
    channel: &Channel,
    config_type: ConfigType,
) -> bool {
    matches!(
        channel.config_state(),
        ChannelConfigState::LocalChangePending | ChannelConfigState::SetChannelConfigSent
    ) && ctx
        .config
        .is_channel_config_change_flag_set(channel.number(), config_type)
}

/// Session registered: decide whether to send or wait for the server
pub fn on_registered(ctx: &mut Context<'_>, channel: &mut Channel, config_type: ConfigType) {
    let state = if ctx
        .config
        .is_channel_config_change_flag_set(channel.number(), config_type)
    {
        ChannelConfigState::LocalChangePending
    } else {
        ChannelConfigState::WaitingForServerConfig
    };
    channel.set_config_state(state);
}

/// Server configuration received and handled
pub fn on_server_config(channel: &mut Channel) {
    if channel.config_state() == ChannelConfigState::WaitingForServerConfig {
        channel.set_config_state(ChannelConfigState::None);
    }
}

/// Send the channel's configuration if a local change is pending
///
/// Returns `false` when a message was sent (or attempted), ending this
/// element's turn in the connected round-robin.
pub fn send_pending_config(
    channel: &mut Channel,
    uplink: &mut dyn Uplink,
    build: impl FnOnce(&Channel) -> Option<ChannelConfigMessage>,
) -> bool {
    if channel.config_state() != ChannelConfigState::LocalChangePending {
        return true;
    }
    let Some(message) = build(channel) else {
        channel.set_config_state(ChannelConfigState::None);
        return true;
    };
    if uplink.send_channel_config(&message) {
        debug!("Channel {}: config sent", channel.number());
        channel.set_config_state(ChannelConfigState::SetChannelConfigSent);
    }
    false
}

/// Server answered a configuration sent by the channel
///
/// Acceptance clears the change flag; a rejection keeps it so the values
/// are sent again after the next registration.
pub fn on_set_config_result(
    ctx: &mut Context<'_>,
    channel: &mut Channel,
    config_type: ConfigType,
    accepted: bool,
) {
    if channel.config_state() != ChannelConfigState::SetChannelConfigSent {
        return;
    }
    channel.set_config_state(ChannelConfigState::None);
    if accepted {
        ctx.config
            .clear_channel_config_change_flag(channel.number(), config_type);
        ctx.config.save_with_delay(CONFIG_SAVE_DELAY_MS, ctx.now_ms);
    } else {
        warn!("Channel {}: server rejected config", channel.number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::testing::{Harness, RecordingUplink};
    use hestia_protocol::ChannelFunction;

    fn message(channel: &Channel) -> Option<ChannelConfigMessage> {
        ChannelConfigMessage::new(channel.number(), 0, ConfigType::Default, &[1, 2])
    }

    #[test]
    fn test_reload_changes_nothing() {
        let mut h = Harness::new();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        record_update(&mut h.ctx(), &mut channel, ConfigType::Default, ConfigOrigin::Reload, true);
        assert_eq!(channel.config_state(), ChannelConfigState::None);
        assert!(!h.config.is_save_pending());
        assert!(h.changes.is_empty());
    }

    #[test]
    fn test_server_change_commits_without_flag() {
        let mut h = Harness::new();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        record_update(&mut h.ctx(), &mut channel, ConfigType::Default, ConfigOrigin::Server, true);
        assert!(h.config.is_save_pending());
        assert!(!h.config.is_channel_config_change_flag_set(0, ConfigType::Default));
        assert_eq!(channel.config_state(), ChannelConfigState::None);
    }

    #[test]
    fn test_local_change_raises_flag() {
        let mut h = Harness::new();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        record_update(&mut h.ctx(), &mut channel, ConfigType::Default, ConfigOrigin::Local, false);
        assert!(!h.config.is_channel_config_change_flag_set(0, ConfigType::Default));

        record_update(&mut h.ctx(), &mut channel, ConfigType::Default, ConfigOrigin::Local, true);
        assert!(h.config.is_channel_config_change_flag_set(0, ConfigType::Default));
        assert!(h.config.is_save_pending());
        assert_eq!(channel.config_state(), ChannelConfigState::LocalChangePending);
        assert_eq!(h.changes, [0]);
    }

    #[test]
    fn test_send_and_accept_clears_flag() {
        let mut h = Harness::new();
        let mut uplink = RecordingUplink::default();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        raise_change_flag(&mut h.ctx(), &mut channel, ConfigType::Default);

        assert!(!send_pending_config(&mut channel, &mut uplink, message));
        assert_eq!(uplink.configs.len(), 1);
        assert_eq!(channel.config_state(), ChannelConfigState::SetChannelConfigSent);
        assert!(is_local_change_pending(&mut h.ctx(), &channel, ConfigType::Default));

        // Sent once only
        assert!(send_pending_config(&mut channel, &mut uplink, message));
        assert_eq!(uplink.configs.len(), 1);

        on_set_config_result(&mut h.ctx(), &mut channel, ConfigType::Default, true);
        assert!(!h.config.is_channel_config_change_flag_set(0, ConfigType::Default));
        assert_eq!(channel.config_state(), ChannelConfigState::None);
    }

    #[test]
    fn test_rejection_keeps_flag_until_next_registration() {
        let mut h = Harness::new();
        let mut uplink = RecordingUplink::default();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        raise_change_flag(&mut h.ctx(), &mut channel, ConfigType::Default);
        send_pending_config(&mut channel, &mut uplink, message);

        on_set_config_result(&mut h.ctx(), &mut channel, ConfigType::Default, false);
        assert!(h.config.is_channel_config_change_flag_set(0, ConfigType::Default));
        assert!(send_pending_config(&mut channel, &mut uplink, message));

        on_registered(&mut h.ctx(), &mut channel, ConfigType::Default);
        assert_eq!(channel.config_state(), ChannelConfigState::LocalChangePending);
        assert!(!send_pending_config(&mut channel, &mut uplink, message));
        assert_eq!(uplink.configs.len(), 2);
    }

    #[test]
    fn test_registered_without_flag_waits_for_server() {
        let mut h = Harness::new();
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        on_registered(&mut h.ctx(), &mut channel, ConfigType::Default);
        assert_eq!(channel.config_state(), ChannelConfigState::WaitingForServerConfig);
        on_server_config(&mut channel);
        assert_eq!(channel.config_state(), ChannelConfigState::None);
    }

    #[test]
    fn test_flag_restored_at_boot() {
        let mut h = Harness::new();
        h.config.set_channel_config_change_flag(0, ConfigType::Default);
        let mut channel = Channel::new(ChannelFunction::GeneralPurposeMeasurement);
        load_change_flag(&mut h.ctx(), &mut channel, ConfigType::Default);
        assert_eq!(channel.config_state(), ChannelConfigState::LocalChangePending);
    }
}
