//! Meter error types.

use crate::meter::Reading;
use metrology_client::ClientError;
use thiserror::Error;

/// Errors from meter drivers.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("invalid response for {what}: {len} bytes, expected at least {expected}")]
    InvalidResponse {
        what: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("reading not supported by this meter: {0}")]
    Unsupported(Reading),
}
