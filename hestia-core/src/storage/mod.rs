//! Persistent storage services
//!
//! - [`ConfigStore`]: typed configuration values with debounced commits
//! - [`StateStorage`]: binary channel state with layout validation
//! - [`memory`]: RAM-backed backends for hosts and tests

pub mod config_store;
mod device;
pub mod memory;
pub mod state;
pub mod tags;

pub use device::IDENTITY_SIZE;
pub use config_store::{ConfigStore, IntoConfigKey, StoredValue, MAX_VALUE_SIZE};
pub use memory::{MemoryKv, MemoryMedium};
pub use state::StateStorage;
