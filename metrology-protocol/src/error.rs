//! Protocol error types and the device error-code table.

use thiserror::Error;

/// Protocol-level errors that can occur during framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incomplete frame: need {needed} more bytes")]
    NeedMoreData { needed: usize },

    #[error("invalid frame length: {0} (minimum 10)")]
    InvalidLength(usize),

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("frame too large: payload of {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid device address: {0:?}")]
    InvalidAddress(String),
}

impl ProtocolError {
    /// Returns whether decoding can continue once more bytes arrive.
    ///
    /// Every other error means the buffered bytes are garbage and the
    /// decoder must resynchronize.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::NeedMoreData { .. })
    }
}

/// Errors reported by a device in a function `0x00` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DeviceError {
    #[error("the requested function code is unknown")]
    UnknownFunction,

    #[error("error in request bitmask")]
    BitMask,

    #[error("invalid request length")]
    RequestLength,

    #[error("missing or invalid parameter")]
    Parameter,

    #[error("the entry is blocked, authorization is required")]
    AuthorizationRequired,

    #[error("the written parameter is outside the allowed range")]
    WriteValueOutOfRange,

    #[error("the requested archive type is missing")]
    UnknownArchiveType,

    #[error("exceeding the maximum number of archived values per packet")]
    ArchiveCountExceeded,

    #[error("unknown device error, code: {0}")]
    Unknown(u8),
}

/// Code → error table shared by every Pulsar device family.
const DEVICE_ERRORS: [(u8, DeviceError); 8] = [
    (0x01, DeviceError::UnknownFunction),
    (0x02, DeviceError::BitMask),
    (0x03, DeviceError::RequestLength),
    (0x04, DeviceError::Parameter),
    (0x05, DeviceError::AuthorizationRequired),
    (0x06, DeviceError::WriteValueOutOfRange),
    (0x07, DeviceError::UnknownArchiveType),
    (0x08, DeviceError::ArchiveCountExceeded),
];

impl DeviceError {
    /// Maps the error-code byte of an error response.
    pub fn from_code(code: u8) -> Self {
        DEVICE_ERRORS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, err)| *err)
            .unwrap_or(DeviceError::Unknown(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_table() {
        assert_eq!(DeviceError::from_code(0x01), DeviceError::UnknownFunction);
        assert_eq!(DeviceError::from_code(0x02), DeviceError::BitMask);
        assert_eq!(DeviceError::from_code(0x03), DeviceError::RequestLength);
        assert_eq!(DeviceError::from_code(0x04), DeviceError::Parameter);
        assert_eq!(
            DeviceError::from_code(0x05),
            DeviceError::AuthorizationRequired
        );
        assert_eq!(
            DeviceError::from_code(0x06),
            DeviceError::WriteValueOutOfRange
        );
        assert_eq!(DeviceError::from_code(0x07), DeviceError::UnknownArchiveType);
        assert_eq!(
            DeviceError::from_code(0x08),
            DeviceError::ArchiveCountExceeded
        );
    }

    #[test]
    fn test_unknown_device_error() {
        assert_eq!(DeviceError::from_code(0x00), DeviceError::Unknown(0));
        assert_eq!(DeviceError::from_code(0x42), DeviceError::Unknown(0x42));
        assert!(DeviceError::Unknown(66).to_string().contains("66"));
    }

    #[test]
    fn test_recoverable() {
        assert!(ProtocolError::NeedMoreData { needed: 1 }.is_recoverable());
        assert!(!ProtocolError::InvalidLength(3).is_recoverable());
        assert!(!ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_recoverable());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xABC,
            actual: 0xDEF,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x0abc"));
        assert!(msg.contains("0x0def"));

        let err = ProtocolError::NeedMoreData { needed: 10 };
        assert!(err.to_string().contains("10"));

        let err = ProtocolError::InvalidAddress("xyz".to_string());
        assert!(err.to_string().contains("xyz"));
    }
}
