//! Transport abstraction for serial ports and serial-over-TCP converters.

use crate::error::ClientError;
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_serial::SerialStream;

/// Port name prefix selecting a TCP transport.
pub const TCP_SCHEME: &str = "tcp://";

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, or `tcp://host:port` for a serial-over-IP converter.
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialConfig {
    /// Returns the `host:port` of a TCP transport, if this is one.
    pub fn tcp_address(&self) -> Option<&str> {
        self.port.strip_prefix(TCP_SCHEME)
    }

    /// Checks the line settings without opening anything.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.port.is_empty() {
            return Err(ClientError::Config("port must not be empty".to_string()));
        }
        if let Some(addr) = self.tcp_address() {
            if addr.is_empty() {
                return Err(ClientError::Config(format!(
                    "missing host:port in {:?}",
                    self.port
                )));
            }
            return Ok(());
        }
        if self.baud_rate == 0 {
            return Err(ClientError::Config("baud_rate must be positive".to_string()));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }

    fn serial_data_bits(&self) -> Result<tokio_serial::DataBits, ClientError> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(ClientError::Config(format!(
                "unsupported data_bits: {}",
                other
            ))),
        }
    }

    fn serial_stop_bits(&self) -> Result<tokio_serial::StopBits, ClientError> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(ClientError::Config(format!(
                "unsupported stop_bits: {}",
                other
            ))),
        }
    }
}

pin_project! {
    /// A byte stream to a device bus.
    #[project = TransportProj]
    pub enum Transport {
        Serial { #[pin] stream: SerialStream },
        Tcp { #[pin] stream: TcpStream },
    }
}

impl Transport {
    /// Opens the transport described by `config`.
    pub async fn open(config: &SerialConfig) -> Result<Self, ClientError> {
        config.validate()?;

        if let Some(addr) = config.tcp_address() {
            tracing::debug!(addr, "connecting to serial converter");
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            return Ok(Transport::Tcp { stream });
        }

        tracing::debug!(
            port = %config.port,
            baud_rate = config.baud_rate,
            "opening serial port"
        );
        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.serial_data_bits()?)
            .stop_bits(config.serial_stop_bits()?)
            .parity(config.parity.into());
        let stream = SerialStream::open(&builder)?;
        Ok(Transport::Serial { stream })
    }

    /// Returns whether this transport is a TCP connection.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Transport::Tcp { .. })
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { stream } => stream.poll_read(cx, buf),
            TransportProj::Tcp { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            TransportProj::Serial { stream } => stream.poll_write(cx, buf),
            TransportProj::Tcp { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { stream } => stream.poll_flush(cx),
            TransportProj::Tcp { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            TransportProj::Serial { stream } => stream.poll_shutdown(cx),
            TransportProj::Tcp { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_serial_config_defaults() {
        let config: SerialConfig = serde_yaml::from_str("port: /dev/ttyS1").unwrap();
        assert_eq!(config.port, "/dev/ttyS1");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.parity, Parity::None);
        assert!(config.tcp_address().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_serial_config_full() {
        let yaml = "port: /dev/ttyUSB1\nbaud_rate: 19200\ndata_bits: 7\nstop_bits: 2\nparity: even\n";
        let config: SerialConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.parity, Parity::Even);
        assert!(matches!(
            config.serial_stop_bits().unwrap(),
            tokio_serial::StopBits::Two
        ));
        config.validate().unwrap();
    }

    #[test]
    fn test_serial_config_rejects_bad_settings() {
        let config = SerialConfig {
            data_bits: 9,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = SerialConfig {
            stop_bits: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let config = SerialConfig {
            port: "tcp://".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_tcp_address() {
        let config = SerialConfig {
            port: "tcp://10.0.0.5:4001".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tcp_address(), Some("10.0.0.5:4001"));
    }

    #[tokio::test]
    async fn test_open_tcp_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let config = SerialConfig {
            port: format!("tcp://{}", addr),
            ..Default::default()
        };
        let mut transport = Transport::open(&config).await.unwrap();
        assert!(transport.is_tcp());

        transport.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.await.unwrap();
    }
}
