//! Measurement driver implementations

pub mod virtual_sensor;

pub use virtual_sensor::VirtualSensor;
