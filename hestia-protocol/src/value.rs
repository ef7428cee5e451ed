//! Channel values and value commands

/// Size of a channel value in bytes
pub const CHANNEL_VALUE_SIZE: usize = 8;

/// Raw channel value as exchanged with the server
///
/// Binary channels (relays) use byte 0 as the level: `0` off, `1` on.
/// Measurement channels carry an `f64` in little-endian byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelValue(pub [u8; CHANNEL_VALUE_SIZE]);

impl ChannelValue {
    /// All-zero value
    pub const fn zero() -> Self {
        Self([0; CHANNEL_VALUE_SIZE])
    }

    /// Binary level value
    pub fn from_bool(on: bool) -> Self {
        let mut value = Self::zero();
        value.0[0] = on as u8;
        value
    }

    /// Decode a binary level
    ///
    /// Returns `None` for anything other than `0` or `1`.
    pub fn as_bool(&self) -> Option<bool> {
        match self.0[0] {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    /// Measurement value
    pub fn from_f64(value: f64) -> Self {
        Self(value.to_le_bytes())
    }

    /// Decode a measurement value
    pub fn as_f64(&self) -> f64 {
        f64::from_le_bytes(self.0)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; CHANNEL_VALUE_SIZE] {
        &self.0
    }
}

/// Value command received from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NewValue {
    /// Target channel number
    pub channel: u8,
    /// Requested value
    pub value: ChannelValue,
    /// Optional duration; 0 means "no explicit duration"
    pub duration_ms: u32,
}

impl NewValue {
    /// Binary level command
    pub fn level(channel: u8, on: bool, duration_ms: u32) -> Self {
        Self {
            channel,
            value: ChannelValue::from_bool(on),
            duration_ms,
        }
    }
}

/// Remaining-time report for a channel countdown
///
/// Sent whenever a countdown is armed, cleared or expires. An idle channel
/// reports zero remaining time and a zero target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerReport {
    /// Channel number
    pub channel: u8,
    /// Time left until the scheduled transition
    pub remaining_ms: u32,
    /// Level the channel switches to when the countdown expires
    pub target_level: u8,
    /// Reserved (sender id), always zero from the device
    pub sender_id: i32,
}

impl TimerReport {
    /// Report for a channel without a running countdown
    pub fn idle(channel: u8) -> Self {
        Self {
            channel,
            remaining_ms: 0,
            target_level: 0,
            sender_id: 0,
        }
    }

    /// Check whether this report describes an idle channel
    pub fn is_idle(&self) -> bool {
        self.remaining_ms == 0 && self.target_level == 0 && self.sender_id == 0
    }
}
