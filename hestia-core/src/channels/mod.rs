//! Channel elements

pub mod countdown;
pub mod measurement;
pub mod relay;

pub use countdown::Countdown;
pub use measurement::{GeneralPurposeMeasurement, MeasurementConfig, MeasurementDefaults};
pub use relay::{Relay, RelayStateRecord, StateOnInit};
