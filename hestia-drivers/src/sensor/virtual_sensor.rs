//! Virtual measurement source
//!
//! Reports whatever value software last fed it: a reading pushed by another
//! device, a computed value, or a simulated sensor in tests.

use alloc::sync::Arc;
use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use hestia_core::traits::{MeasurementDriver, SensorError};

/// Software-fed measurement driver
///
/// Clones share the value and may feed it from another thread or an
/// interrupt. Reads fail with [`SensorError::NotReady`] until the first
/// value arrives and with [`SensorError::OutOfRange`] for NaN or infinite
/// values.
#[derive(Clone)]
pub struct VirtualSensor {
    value: Arc<Mutex<CriticalSectionRawMutex, Cell<Option<f64>>>>,
}

impl Default for VirtualSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSensor {
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(Cell::new(None))),
        }
    }

    pub fn with_value(value: f64) -> Self {
        let sensor = Self::new();
        sensor.set(value);
        sensor
    }

    pub fn set(&self, value: f64) {
        self.value.lock(|cell| cell.set(Some(value)));
    }

    /// Forget the current value
    pub fn clear(&self) {
        self.value.lock(|cell| cell.set(None));
    }

    fn current(&self) -> Option<f64> {
        self.value.lock(|cell| cell.get())
    }
}

impl MeasurementDriver for VirtualSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        match self.current() {
            Some(value) if value.is_finite() => Ok(value),
            Some(_) => Err(SensorError::OutOfRange),
            None => Err(SensorError::NotReady),
        }
    }
}
