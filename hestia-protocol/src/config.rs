//! Channel configuration messages

use heapless::Vec;

/// Maximum channel configuration payload size in bytes
pub const MAX_CHANNEL_CONFIG_SIZE: usize = 128;

/// Configuration block selector
///
/// A channel may carry several independent configuration blocks; the type
/// selects how the payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConfigType {
    /// Main channel configuration
    Default = 0,
    /// Weekly schedule
    WeeklySchedule = 2,
    /// Alternative weekly schedule
    AltWeeklySchedule = 3,
    /// Optical meter reader settings
    OcrConfig = 4,
    /// Extended main configuration
    ExtendedDefault = 5,
}

impl ConfigType {
    /// Get the type as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create a type from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConfigType::Default),
            2 => Some(ConfigType::WeeklySchedule),
            3 => Some(ConfigType::AltWeeklySchedule),
            4 => Some(ConfigType::OcrConfig),
            5 => Some(ConfigType::ExtendedDefault),
            _ => None,
        }
    }

    /// Bit used for this type in per-channel change flags
    pub fn flag_bit(self) -> u8 {
        1 << (self.as_u8() & 0x07)
    }
}

/// Channel function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum ChannelFunction {
    None = 0,
    ControllingTheGatewayLock = 10,
    ControllingTheGate = 20,
    ControllingTheGarageDoor = 30,
    ControllingTheDoorLock = 50,
    PowerSwitch = 130,
    LightSwitch = 140,
    StaircaseTimer = 150,
    GeneralPurposeMeasurement = 520,
}

impl ChannelFunction {
    /// Get the function code
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Create a function from its code
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ChannelFunction::None),
            10 => Some(ChannelFunction::ControllingTheGatewayLock),
            20 => Some(ChannelFunction::ControllingTheGate),
            30 => Some(ChannelFunction::ControllingTheGarageDoor),
            50 => Some(ChannelFunction::ControllingTheDoorLock),
            130 => Some(ChannelFunction::PowerSwitch),
            140 => Some(ChannelFunction::LightSwitch),
            150 => Some(ChannelFunction::StaircaseTimer),
            520 => Some(ChannelFunction::GeneralPurposeMeasurement),
            _ => None,
        }
    }

    /// Functions driven by short pulses (gates, doors, locks)
    pub fn is_impulse(self) -> bool {
        matches!(
            self,
            ChannelFunction::ControllingTheGatewayLock
                | ChannelFunction::ControllingTheGate
                | ChannelFunction::ControllingTheGarageDoor
                | ChannelFunction::ControllingTheDoorLock
        )
    }

    /// Staircase light: on for a configured time, then off
    pub fn is_staircase(self) -> bool {
        self == ChannelFunction::StaircaseTimer
    }
}

/// Channel configuration message, in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfigMessage {
    /// Channel number
    pub channel: u8,
    /// Channel function code the configuration applies to
    pub function: i32,
    /// Payload layout selector
    pub config_type: ConfigType,
    /// Encoded configuration block
    pub payload: Vec<u8, MAX_CHANNEL_CONFIG_SIZE>,
}

impl ChannelConfigMessage {
    /// Build a message from an encoded block
    ///
    /// Returns `None` if the block exceeds [`MAX_CHANNEL_CONFIG_SIZE`].
    pub fn new(channel: u8, function: i32, config_type: ConfigType, block: &[u8]) -> Option<Self> {
        let mut payload = Vec::new();
        payload.extend_from_slice(block).ok()?;
        Some(Self {
            channel,
            function,
            config_type,
            payload,
        })
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Result of applying a channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigResult {
    /// Configuration applied
    Success,
    /// Payload size or content invalid; nothing applied
    DataError,
    /// Config type not handled by this channel
    TypeNotSupported,
    /// Function not supported by this channel
    FunctionNotSupported,
    /// Channel does not accept configuration
    NotSupported,
    /// Applied, but the device holds newer local values that must be sent
    LocalConfigPending,
}

impl ConfigResult {
    /// Whether the configuration was accepted
    pub fn is_accepted(self) -> bool {
        matches!(self, ConfigResult::Success | ConfigResult::LocalConfigPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_type_codes() {
        for ty in [
            ConfigType::Default,
            ConfigType::WeeklySchedule,
            ConfigType::AltWeeklySchedule,
            ConfigType::OcrConfig,
            ConfigType::ExtendedDefault,
        ] {
            assert_eq!(ConfigType::from_u8(ty.as_u8()), Some(ty));
        }
        assert_eq!(ConfigType::from_u8(1), None);
    }

    #[test]
    fn test_flag_bits_distinct() {
        assert_eq!(ConfigType::Default.flag_bit(), 0x01);
        assert_eq!(ConfigType::WeeklySchedule.flag_bit(), 0x04);
        assert_ne!(ConfigType::OcrConfig.flag_bit(), ConfigType::Default.flag_bit());
    }

    #[test]
    fn test_function_timing_kinds() {
        assert!(ChannelFunction::StaircaseTimer.is_staircase());
        assert!(!ChannelFunction::StaircaseTimer.is_impulse());
        assert!(ChannelFunction::ControllingTheGate.is_impulse());
        assert!(ChannelFunction::ControllingTheDoorLock.is_impulse());
        assert!(!ChannelFunction::PowerSwitch.is_impulse());
        assert!(!ChannelFunction::PowerSwitch.is_staircase());
        assert_eq!(ChannelFunction::from_i32(150), Some(ChannelFunction::StaircaseTimer));
        assert_eq!(ChannelFunction::from_i32(151), None);
    }

    #[test]
    fn test_message_too_large() {
        let block = [0u8; MAX_CHANNEL_CONFIG_SIZE + 1];
        assert!(ChannelConfigMessage::new(0, 0, ConfigType::Default, &block).is_none());

        let msg = ChannelConfigMessage::new(0, 0, ConfigType::Default, &block[..4]).unwrap();
        assert_eq!(msg.size(), 4);
    }
}
