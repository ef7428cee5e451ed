//! Hestia Platform Abstraction Layer
//!
//! This crate defines the traits a board support package implements so the
//! device runtime can run unchanged on different hardware platforms.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  hestia-core (runtime, channels)        │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  hestia-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ board flash / │       │ board GPIO /  │
//! │ EEPROM driver │       │ clock / reset │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::OutputPin`], [`gpio::InputPin`] - Digital I/O
//! - [`storage::KvBackend`] - Persistent key-value configuration storage
//! - [`storage::StateMedium`] - Byte-addressed state storage
//! - [`system::Clock`], [`system::SystemControl`] - Time base and reset

#![no_std]
#![deny(unsafe_code)]

pub mod gpio;
pub mod storage;
pub mod system;

// Re-export key traits at crate root for convenience
pub use gpio::{InputPin, OutputPin};
pub use storage::{ConfigKey, KvBackend, StateMedium, StorageError, MAX_KEY_LEN};
pub use system::{Clock, SystemControl};
