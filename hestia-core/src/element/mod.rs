//! Element lifecycle contract
//!
//! Every channel (and every non-channel component that needs lifecycle
//! callbacks) implements [`Element`]. The runtime drives all registered
//! elements through the same phases:
//!
//! ```text
//! on_load_config → on_load_state → on_init → ┬→ iterate_always ─┐
//!                                            │  iterate_connected│ (every tick)
//!                                            └─ on_save_state ◄──┘
//! ```
//!
//! Hooks receive a [`Context`] holding the storage services and the current
//! time instead of reaching for global state.

pub mod channel;
pub mod registry;

use alloc::vec::Vec;

use hestia_protocol::{ChannelConfigMessage, ConfigResult, ConfigType, NewValue};

use crate::reconcile::ConfigOrigin;
use crate::storage::{ConfigStore, StateStorage};
use crate::traits::Uplink;

pub use channel::Channel;
pub use registry::{Cursor, Registry, SharedRegistry};

/// Errors from commands addressed to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// No element owns this channel number
    UnknownChannel,
    /// Value not valid for this channel
    InvalidValue,
    /// Channel does not accept this command
    NotSupported,
    /// Registry already locked further up the call stack
    Busy,
}

/// Local actions on a channel (buttons, automations, web UI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    TurnOn,
    TurnOff,
    Toggle,
    /// Turn on ignoring any stored duration
    TurnOnWithoutTimer,
    TurnOnFor(u32),
    TurnOffFor(u32),
}

/// Services available to element hooks
pub struct Context<'a> {
    pub config: &'a mut ConfigStore,
    pub state: &'a mut StateStorage,
    pub now_ms: u64,
    config_changes: &'a mut Vec<u8>,
}

impl<'a> Context<'a> {
    pub fn new(
        config: &'a mut ConfigStore,
        state: &'a mut StateStorage,
        now_ms: u64,
        config_changes: &'a mut Vec<u8>,
    ) -> Self {
        Self {
            config,
            state,
            now_ms,
            config_changes,
        }
    }

    /// Tell the protocol layers that a channel's configuration changed
    pub fn notify_config_change(&mut self, channel: u8) {
        if !self.config_changes.contains(&channel) {
            self.config_changes.push(channel);
        }
    }
}

/// Lifecycle contract for registered elements
///
/// All hooks have empty default bodies; elements override what they need.
/// Elements are `Send` so the registry can be shared with timer callbacks
/// running outside the main loop.
pub trait Element: Send {
    /// The channel exposed by this element, if any
    fn channel(&self) -> Option<&Channel> {
        None
    }

    fn channel_mut(&mut self) -> Option<&mut Channel> {
        None
    }

    /// Read configuration from the config store
    fn on_load_config(&mut self, _ctx: &mut Context<'_>) {}

    /// Read state from the state section, in registration order
    fn on_load_state(&mut self, _ctx: &mut Context<'_>) {}

    /// Hardware bring-up
    fn on_init(&mut self, _ctx: &mut Context<'_>) {}

    /// Write state to the state section, in registration order
    ///
    /// Must write the same number of bytes on every call, including dry runs.
    fn on_save_state(&mut self, _ctx: &mut Context<'_>) {}

    /// Registration with the server completed
    fn on_registered(&mut self, _ctx: &mut Context<'_>) {}

    /// Periodic work, every tick
    fn iterate_always(&mut self, _ctx: &mut Context<'_>) {}

    /// Periodic work while connected
    ///
    /// Returns `false` after sending something, which ends the round for
    /// this tick. The default sends a pending channel value.
    fn iterate_connected(&mut self, _ctx: &mut Context<'_>, uplink: &mut dyn Uplink) -> bool {
        send_pending_value(self, uplink)
    }

    /// Fixed-frequency timer callback, possibly from interrupt context
    fn on_timer(&mut self) {}

    /// High-frequency timer callback, possibly from interrupt context
    fn on_fast_timer(&mut self) {}

    /// Called before a soft restart
    fn on_soft_reset(&mut self, _ctx: &mut Context<'_>) {}

    /// Value command from the server
    fn handle_new_value(
        &mut self,
        _ctx: &mut Context<'_>,
        _value: &NewValue,
    ) -> Result<(), CommandError> {
        Err(CommandError::NotSupported)
    }

    /// Channel configuration from the server, or reloaded from storage
    fn handle_channel_config(
        &mut self,
        _ctx: &mut Context<'_>,
        _message: &ChannelConfigMessage,
        _origin: ConfigOrigin,
    ) -> ConfigResult {
        ConfigResult::NotSupported
    }

    /// Server's answer to a configuration this element sent
    fn handle_set_channel_config_result(
        &mut self,
        _ctx: &mut Context<'_>,
        _config_type: ConfigType,
        _accepted: bool,
    ) {
    }

    /// Local action
    fn handle_action(&mut self, _ctx: &mut Context<'_>, _action: Action) -> Result<(), CommandError> {
        Err(CommandError::NotSupported)
    }
}

/// Send the channel value if it changed since the last send
///
/// Returns `false` when something was sent.
pub fn send_pending_value<E: Element + ?Sized>(element: &mut E, uplink: &mut dyn Uplink) -> bool {
    let Some(channel) = element.channel_mut() else {
        return true;
    };
    if !channel.is_value_pending() {
        return true;
    }
    if uplink.send_channel_value(channel.number(), channel.value()) {
        channel.clear_value_pending();
    }
    false
}
