//! Binary frame format for Pulsar devices.
//!
//! Frame layout (10 bytes overhead + payload), multi-byte fields little-endian:
//!
//! ```text
//! +---------+----------+--------+---------+----------------+--------+
//! | address | function | length | payload | correlation id | crc16  |
//! | 4 bytes | 1 byte   | 1 byte | N bytes | 2 bytes        | 2 bytes|
//! +---------+----------+--------+---------+----------------+--------+
//! ```
//!
//! `length` is the total frame length (`10 + N`). The CRC is CRC-16/MODBUS
//! over every byte that precedes it.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use std::fmt;
use std::str::FromStr;

/// Size of the fixed part of a frame (4+1+1+2+2 = 10).
pub const FRAME_OVERHEAD: usize = 10;

/// Largest frame representable by the one-byte length field.
pub const MAX_FRAME_SIZE: usize = u8::MAX as usize;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes CRC-16/MODBUS (init 0xFFFF, reflected polynomial 0xA001).
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// A 4-byte device address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 4]);

impl Address {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    /// Parses a hexadecimal address, most significant byte first
    /// (`"0x08833976"` or `"08833976"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let value = u32::from_str_radix(digits, 16)
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        Ok(Self(value.to_be_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", u32::from_be_bytes(self.0))
    }
}

/// A parsed Pulsar frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device address.
    pub address: Address,
    /// Command (request) or response code.
    pub function: u8,
    /// Command-specific data.
    pub payload: Bytes,
    /// Request/response matching key, chosen by the requester.
    pub correlation_id: u16,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(address: Address, function: u8, payload: Bytes, correlation_id: u16) -> Self {
        Self {
            address,
            function,
            payload,
            correlation_id,
        }
    }

    /// Total encoded length of this frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Returns whether this frame is a device error response.
    pub fn is_error(&self) -> bool {
        self.function == crate::function::ERROR
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total_len = self.encoded_len();
        let mut buf = BytesMut::with_capacity(total_len);

        buf.put_slice(&self.address.0);
        buf.put_u8(self.function);
        buf.put_u8(total_len as u8);
        buf.put_slice(&self.payload);
        buf.put_u16_le(self.correlation_id);

        let crc = crc16(&buf);
        buf.put_u16_le(crc);

        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Err(ProtocolError::NeedMoreData)` without consuming anything
    /// when the buffer does not yet hold a whole frame. On success exactly the
    /// frame's bytes are consumed.
    pub fn decode(buf: &mut BytesMut) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::NeedMoreData {
                needed: FRAME_OVERHEAD - buf.len(),
            });
        }

        let total_len = buf[5] as usize;
        if total_len < FRAME_OVERHEAD {
            return Err(ProtocolError::InvalidLength(total_len));
        }
        if buf.len() < total_len {
            return Err(ProtocolError::NeedMoreData {
                needed: total_len - buf.len(),
            });
        }

        let crc_expected = u16::from_le_bytes([buf[total_len - 2], buf[total_len - 1]]);
        let crc_actual = crc16(&buf[..total_len - 2]);
        if crc_actual != crc_expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        let mut frame = buf.split_to(total_len);
        let mut address = [0u8; 4];
        frame.copy_to_slice(&mut address);
        let function = frame.get_u8();
        let _length = frame.get_u8();
        let payload = frame.split_to(total_len - FRAME_OVERHEAD).freeze();
        let correlation_id = frame.get_u16_le();

        Ok(Self {
            address: Address(address),
            function,
            payload,
            correlation_id,
        })
    }
}
