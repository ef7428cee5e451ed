//! Driver implementations
//!
//! This crate provides concrete implementations of the output and sensor
//! traits defined in hestia-core:
//!
//! - Relay outputs (GPIO active high/low, `embedded-hal` pins, virtual)
//! - Measurement drivers (virtual sensor fed by software)

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

pub mod output;
pub mod sensor;
