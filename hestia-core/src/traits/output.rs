//! Output and sensor traits

/// Errors that can occur reading a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// No reading available yet
    NotReady,
    /// Sensor did not respond
    Disconnected,
    /// Reading out of the sensor's range
    OutOfRange,
}

/// Trait for relay output control
///
/// Implementations drive a relay coil, SSR or a purely virtual output.
pub trait RelayOutput: Send {
    /// Switch the output on or off
    fn set(&mut self, on: bool);

    /// Check if the output is currently on
    fn is_on(&self) -> bool;
}

/// Trait for raw measurement sources
///
/// The value is reported as read. Divider, multiplier and offset from the
/// channel configuration are display settings applied by the server.
pub trait MeasurementDriver: Send {
    /// Prepare the sensor
    fn init(&mut self) {}

    /// Read the current raw value
    ///
    /// Takes `&mut self` because bus reads typically require mutable access.
    fn read(&mut self) -> Result<f64, SensorError>;
}
