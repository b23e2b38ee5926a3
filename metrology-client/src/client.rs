//! High-level client API.

use crate::connection::Connection;
use crate::error::ClientError;
use bytes::Bytes;
use metrology_protocol::{function, Address};
use std::fmt;
use std::sync::Arc;

/// Parameter holding the firmware and hardware version.
pub const PARAM_VERSION: u16 = 0x0002;

/// Firmware and hardware revision of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub software: String,
    pub hardware: String,
}

impl Version {
    /// Decodes the version parameter payload.
    pub fn from_payload(p: &[u8]) -> Result<Self, ClientError> {
        if p.len() < 8 {
            return Err(ClientError::MalformedResponse(format!(
                "version parameter too short: {} bytes",
                p.len()
            )));
        }
        Ok(Self {
            software: format!("{}.{}.{}.{}", p[3], p[2], p[7], p[6]),
            hardware: format!("{}.{}.{}-{}", p[5], p[4], p[1], p[0]),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw {} / hw {}", self.software, self.hardware)
    }
}

/// Client for the Pulsar request set on one connection.
///
/// Cheap to clone; every clone shares the underlying connection.
#[derive(Debug, Clone)]
pub struct PulsarClient {
    conn: Arc<Connection>,
}

impl PulsarClient {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Reads the channels selected by `mask`.
    ///
    /// The device answers with one little-endian u32 per selected channel.
    pub async fn read_channels(
        &self,
        address: Address,
        mask: u32,
    ) -> Result<Vec<u32>, ClientError> {
        let payload = self
            .conn
            .request(
                address,
                function::READ_CHANNELS,
                Bytes::copy_from_slice(&mask.to_le_bytes()),
            )
            .await?;

        if payload.len() % 4 != 0 {
            return Err(ClientError::MalformedResponse(format!(
                "channel payload of {} bytes is not a multiple of 4",
                payload.len()
            )));
        }

        let values: Vec<u32> = payload
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        tracing::debug!(address = %address, ?values, "read_channels");
        Ok(values)
    }

    /// Reads one parameter and returns its raw value.
    pub async fn read_param(&self, address: Address, index: u16) -> Result<Bytes, ClientError> {
        let payload = self
            .conn
            .request(
                address,
                function::READ_PARAM,
                Bytes::copy_from_slice(&index.to_le_bytes()),
            )
            .await?;
        tracing::debug!(
            address = %address,
            index,
            data = %hex::encode(&payload),
            "read_param"
        );
        Ok(payload)
    }

    /// Reads the device version.
    pub async fn version(&self, address: Address) -> Result<Version, ClientError> {
        let payload = self.read_param(address, PARAM_VERSION).await?;
        let version = Version::from_payload(&payload)?;
        tracing::debug!(address = %address, %version, "version");
        Ok(version)
    }
}
