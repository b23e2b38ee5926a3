//! Client error types.

use metrology_protocol::DeviceError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] metrology_protocol::ProtocolError),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("the device is not responding")]
    DeviceNotResponding,

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("too many requests in flight")]
    TooManyPending,

    #[error("invalid transport configuration: {0}")]
    Config(String),
}
