//! Per-channel state shared by all channel elements

use hestia_protocol::{ChannelFunction, ChannelValue};

use crate::reconcile::ChannelConfigState;

/// A logical channel exposed to the server
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    number: u8,
    function: ChannelFunction,
    default_function: ChannelFunction,
    value: ChannelValue,
    value_pending: bool,
    config_state: ChannelConfigState,
}

impl Channel {
    /// Create a channel; the number is assigned at registration
    pub fn new(default_function: ChannelFunction) -> Self {
        Self {
            number: 0,
            function: default_function,
            default_function,
            value: ChannelValue::zero(),
            value_pending: false,
            config_state: ChannelConfigState::None,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub(crate) fn set_number(&mut self, number: u8) {
        self.number = number;
    }

    pub fn function(&self) -> ChannelFunction {
        self.function
    }

    pub fn default_function(&self) -> ChannelFunction {
        self.default_function
    }

    pub fn set_function(&mut self, function: ChannelFunction) {
        self.function = function;
    }

    pub fn value(&self) -> &ChannelValue {
        &self.value
    }

    /// Update the value; a change marks it pending for the server
    pub fn set_value(&mut self, value: ChannelValue) {
        if self.value != value {
            self.value = value;
            self.value_pending = true;
        }
    }

    pub fn set_bool(&mut self, on: bool) {
        self.set_value(ChannelValue::from_bool(on));
    }

    pub fn set_f64(&mut self, value: f64) {
        self.set_value(ChannelValue::from_f64(value));
    }

    pub fn is_value_pending(&self) -> bool {
        self.value_pending
    }

    /// Force the current value to be sent again
    pub fn mark_value_pending(&mut self) {
        self.value_pending = true;
    }

    pub fn clear_value_pending(&mut self) {
        self.value_pending = false;
    }

    pub fn config_state(&self) -> ChannelConfigState {
        self.config_state
    }

    pub fn set_config_state(&mut self, state: ChannelConfigState) {
        self.config_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_pending_only_on_change() {
        let mut channel = Channel::new(ChannelFunction::PowerSwitch);
        channel.set_bool(false);
        assert!(!channel.is_value_pending());
        channel.set_bool(true);
        assert!(channel.is_value_pending());
        channel.clear_value_pending();
        channel.set_bool(true);
        assert!(!channel.is_value_pending());
    }
}
