//! Collaborator traits
//!
//! The runtime is written against these interfaces; concrete protocol
//! stacks, network drivers, updaters and output drivers live outside this
//! crate.

pub mod network;
pub mod output;
pub mod protocol;
pub mod update;

pub use network::{LocalWebServer, NetworkInterface, NetworkMode};
pub use output::{MeasurementDriver, RelayOutput, SensorError};
pub use protocol::{ProtocolLayer, Uplink};
pub use update::{SwUpdate, UpdaterFactory};
