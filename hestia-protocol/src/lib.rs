//! Runtime ↔ protocol-layer messages
//!
//! This crate defines the data carried between the device runtime and the
//! protocol layers that maintain the session with the remote server. The
//! wire framing itself belongs to the protocol layer; everything here is
//! the decoded form.
//!
//! # Message Overview
//!
//! ```text
//!            server → device                 device → server
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │ NewValue {ch, value, dur}    │  │ channel value {ch, value}    │
//! │ ChannelConfigMessage         │  │ TimerReport {ch, remaining}  │
//! │ set-config result {ch, ok}   │  │ ChannelConfigMessage         │
//! └──────────────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! Channel configuration payloads use fixed little-endian layouts
//! ([`blocks`]); the `config_type` of a message selects the layout.

#![no_std]
#![deny(unsafe_code)]

pub mod blocks;
pub mod config;
pub mod value;

pub use blocks::{BlockError, MeasurementConfigBlock, StaircaseTimerBlock, Unit};
pub use config::{
    ChannelConfigMessage, ChannelFunction, ConfigResult, ConfigType, MAX_CHANNEL_CONFIG_SIZE,
};
pub use value::{ChannelValue, NewValue, TimerReport, CHANNEL_VALUE_SIZE};
