//! Time base and system control

/// Monotonic millisecond clock
///
/// The value must never go backwards. All runtime timeouts are stored as
/// absolute timestamps and compared against this clock.
pub trait Clock {
    /// Milliseconds since boot
    fn millis(&self) -> u64;
}

/// Platform reset control
pub trait SystemControl {
    /// Restart the device
    ///
    /// On real hardware this does not return.
    fn soft_reset(&mut self);

    /// Whether the previous boot ended in [`SystemControl::soft_reset`]
    fn last_reset_was_soft(&self) -> bool {
        false
    }
}
