//! # metrology-meter
//!
//! Meter capability traits and device drivers.
//!
//! This crate provides:
//! - The `Meter` and `ElectricMeter` capability traits
//! - Capability flags and static meter parameters
//! - The Pulsar electricity meter driver

pub mod error;
pub mod meter;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pulsar;

pub use error::MeterError;
pub use meter::{ElectricMeter, Meter, MeterFlags, Params, Reading};
pub use pulsar::PulsarElectro;
