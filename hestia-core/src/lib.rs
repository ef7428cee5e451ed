//! Board-agnostic device runtime for Hestia endpoints
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Configuration store with debounced commits and change flags
//! - Persisted channel state with layout validation
//! - Element lifecycle contract and the owning registry
//! - Channel configuration reconciliation (defaults / local / server)
//! - Relay channel with countdown, staircase and impulse timing
//! - General-purpose measurement channel
//! - Device runtime: boot, operating modes, supervision, local actions
//! - Collaborator traits (protocol layer, network, updater, outputs)

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod channels;
pub mod clock;
pub mod device;
pub mod element;
pub mod reconcile;
pub mod storage;
pub mod traits;

pub use device::{BootError, DeviceMode, DeviceRuntime, DeviceStatus, LocalAction, RuntimeConfig};
pub use element::{Action, CommandError, Context, Element, Registry, SharedRegistry};
pub use storage::{ConfigStore, StateStorage};
