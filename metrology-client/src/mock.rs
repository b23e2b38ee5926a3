//! In-memory Pulsar device for tests.

use crate::connection::{Connection, ConnectionConfig};
use bytes::Bytes;
use metrology_protocol::{function, Decoder, Frame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// How the device answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with the request's function and this payload.
    Ok(Bytes),
    /// Answer with an error frame carrying this code.
    Error(u8),
    /// Never answer.
    Silent,
    /// Write these bytes verbatim.
    Raw(Bytes),
}

impl Reply {
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Reply::Ok(payload.into())
    }
}

/// A simulated device bus answering requests through a handler.
pub struct MockDevice {
    stream: DuplexStream,
    requests: Arc<AtomicUsize>,
}

impl MockDevice {
    /// Starts a device task that answers every decoded request with
    /// `handler`. Must be called from within a tokio runtime.
    pub fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(&Frame) -> Reply + Send + 'static,
    {
        let (client_io, mut device_io) = duplex(4096);
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 256];
            loop {
                let n = match device_io.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);

                while let Ok(Some(request)) = decoder.decode_frame() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let bytes = match handler(&request) {
                        Reply::Ok(payload) => {
                            encode_reply(&request, request.function, payload)
                        }
                        Reply::Error(code) => {
                            encode_reply(&request, function::ERROR, Bytes::from(vec![code]))
                        }
                        Reply::Raw(bytes) => Some(bytes),
                        Reply::Silent => None,
                    };
                    if let Some(bytes) = bytes {
                        if device_io.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                }
            }
            tracing::debug!("mock device stopped");
        });

        Self {
            stream: client_io,
            requests,
        }
    }

    /// Returns a counter of requests the device has received.
    pub fn requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }

    /// Opens a connection to the device.
    pub fn connect(self, config: ConnectionConfig) -> Arc<Connection> {
        Connection::open(self.stream, config)
    }
}

fn encode_reply(request: &Frame, function: u8, payload: Bytes) -> Option<Bytes> {
    Frame::new(request.address, function, payload, request.correlation_id)
        .encode()
        .ok()
        .map(|b| b.freeze())
}
