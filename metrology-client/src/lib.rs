//! # metrology-client
//!
//! Client library for Pulsar devices on a shared bus.
//!
//! This crate provides:
//! - A connection that correlates concurrent requests with their responses
//! - Per-request timeouts and device error mapping
//! - The Pulsar read-channels / read-parameter request set
//! - Serial and serial-over-TCP transports

pub mod client;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod stream;

pub use client::{PulsarClient, Version};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use stream::{Parity, SerialConfig, Transport};
