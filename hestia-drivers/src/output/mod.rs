//! Relay output implementations

pub mod gpio;
pub mod virtual_output;

pub use gpio::{EmbeddedPin, GpioRelayOutput};
pub use virtual_output::VirtualRelayOutput;
