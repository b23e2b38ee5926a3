//! # metrology-protocol
//!
//! Wire protocol implementation for Pulsar meters.
//!
//! This crate provides:
//! - Binary framing with a one-byte length field and CRC-16/MODBUS validation
//! - Incremental decoding of frames delivered in arbitrary chunks
//! - Device addresses and function codes
//! - The device error-code table shared by every meter family

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::Decoder;
pub use error::{DeviceError, ProtocolError};
pub use frame::{crc16, Address, Frame, FRAME_OVERHEAD, MAX_FRAME_SIZE};

/// Maximum frame payload size (the length byte covers the whole frame).
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// Function codes understood by Pulsar devices.
pub mod function {
    /// Reserved for error responses; the first payload byte carries the code.
    pub const ERROR: u8 = 0x00;
    /// Read the counter channels selected by a 32-bit mask.
    pub const READ_CHANNELS: u8 = 0x01;
    /// Read a single device parameter by 16-bit index.
    pub const READ_PARAM: u8 = 0x0A;
}
