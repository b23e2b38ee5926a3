//! Connection management.
//!
//! A [`Connection`] owns one byte-stream transport. Encoded requests are
//! queued to a background write loop that always puts whole frames on the
//! wire; a background read loop decodes every inbound frame and hands it to
//! the caller waiting on that frame's correlation id.

use crate::error::ClientError;
use bytes::{Bytes, BytesMut};
use metrology_protocol::{Address, Decoder, DeviceError, Frame};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default read buffer size. One frame never exceeds 255 bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 16;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default time a device has to answer a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An encoded request waiting for the write loop.
struct Outbound {
    bytes: BytesMut,
    written: oneshot::Sender<io::Result<()>>,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time a device has to answer one request.
    pub request_timeout: Duration,
    /// Read buffer size for transport reads.
    pub read_buffer_size: usize,
    /// Allow only one outstanding exchange on the transport at a time.
    pub exclusive: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            exclusive: true,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

/// A connection to a bus of Pulsar devices.
pub struct Connection {
    config: ConnectionConfig,
    /// Queue of frames for the write loop.
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Write loop; yields the result of shutting the write half down.
    writer_task: parking_lot::Mutex<Option<JoinHandle<io::Result<()>>>>,
    /// Held for a whole exchange when the connection is exclusive.
    exchange: Mutex<()>,
    /// Requests waiting for a response, keyed by correlation id.
    pending: parking_lot::Mutex<HashMap<u16, oneshot::Sender<Frame>>>,
    /// Cleared once the read loop has stopped.
    connected: AtomicBool,
    /// Stops both loops on close.
    closing: CancellationToken,
}

impl Connection {
    /// Takes ownership of `stream` and starts the background read and
    /// write loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<S>(stream: S, config: ConnectionConfig) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let closing = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(
            Box::new(write_half),
            queue,
            closing.clone(),
        ));

        let conn = Arc::new(Self {
            config,
            outbound,
            writer_task: parking_lot::Mutex::new(Some(writer_task)),
            exchange: Mutex::new(()),
            pending: parking_lot::Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            closing,
        });

        let reader_conn = Arc::clone(&conn);
        tokio::spawn(async move {
            match reader_conn.read_loop(Box::new(read_half)).await {
                Ok(()) => tracing::debug!("read_loop stopped"),
                Err(e) => tracing::error!("read_loop terminated, connection unusable: {}", e),
            }
        });

        conn
    }

    /// Returns the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Sends a request with the configured timeout.
    pub async fn request(
        &self,
        address: Address,
        function: u8,
        payload: Bytes,
    ) -> Result<Bytes, ClientError> {
        self.send_receive(address, function, payload, self.config.request_timeout)
            .await
    }

    /// Sends a request and waits for the matching response payload.
    ///
    /// Fails with [`ClientError::DeviceNotResponding`] if no response arrives
    /// within `timeout`, and with [`ClientError::Device`] if the device
    /// answered with an error frame. Neither the timeout nor dropping the
    /// returned future cuts a frame short: once queued, a request is always
    /// written whole.
    pub async fn send_receive(
        &self,
        address: Address,
        function: u8,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }

        let _exchange = if self.config.exclusive {
            Some(self.exchange.lock().await)
        } else {
            None
        };

        let mut pending = self.register()?;
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }
        let id = pending.id;
        let request = Frame::new(address, function, payload, id);
        let encoded = request.encode()?;

        tracing::debug!(
            address = %address,
            function,
            correlation_id = id,
            bytes = %hex::encode(&encoded),
            "sending request"
        );

        let (written_tx, written_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                bytes: encoded,
                written: written_tx,
            })
            .map_err(|_| ClientError::ConnectionClosed)?;

        let exchange = async {
            written_rx
                .await
                .map_err(|_| ClientError::ConnectionClosed)??;
            (&mut pending.rx)
                .await
                .map_err(|_| ClientError::ConnectionClosed)
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::debug!(
                    address = %address,
                    correlation_id = id,
                    "request timed out"
                );
                return Err(ClientError::DeviceNotResponding);
            }
        };

        if response.is_error() {
            let code = response.payload.first().copied().ok_or_else(|| {
                ClientError::MalformedResponse("error response without code".to_string())
            })?;
            return Err(ClientError::Device(DeviceError::from_code(code)));
        }

        Ok(response.payload)
    }

    /// Allocates a correlation id not currently in flight and registers it.
    fn register(&self) -> Result<PendingRequest<'_>, ClientError> {
        let mut pending = self.pending.lock();
        if pending.len() > u16::MAX as usize {
            return Err(ClientError::TooManyPending);
        }

        let id = loop {
            let id: u16 = rand::random();
            if !pending.contains_key(&id) {
                break id;
            }
        };

        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(PendingRequest { conn: self, id, rx })
    }

    /// Reads and dispatches frames until the transport closes.
    async fn read_loop(&self, mut reader: BoxedReader) -> Result<(), ClientError> {
        tracing::debug!("read_loop started");
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        let result = loop {
            let n = tokio::select! {
                _ = self.closing.cancelled() => break Ok(()),
                read = reader.read(&mut buf) => match read {
                    Ok(n) => n,
                    Err(e) => break Err(ClientError::Io(e)),
                },
            };

            if n == 0 {
                tracing::debug!("read_loop: end of stream");
                break Err(ClientError::ConnectionClosed);
            }

            tracing::debug!(bytes = %hex::encode(&buf[..n]), "read_loop: received");
            decoder.extend(&buf[..n]);

            loop {
                match decoder.decode_frame() {
                    Ok(Some(frame)) => self.dispatch(frame),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("read_loop: discarding buffered bytes: {}", e);
                        break;
                    }
                }
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!("read_loop: failing {} pending requests", pending.len());
        }
        pending.clear();

        result
    }

    /// Hands a decoded frame to the request waiting for it.
    fn dispatch(&self, frame: Frame) {
        let id = frame.correlation_id;
        let tx = self.pending.lock().remove(&id);
        match tx {
            Some(tx) => {
                tracing::debug!(
                    address = %frame.address,
                    function = frame.function,
                    correlation_id = id,
                    "dispatching response"
                );
                let _ = tx.send(frame);
            }
            None => {
                tracing::warn!(
                    address = %frame.address,
                    "no pending request for correlation id {:#06x}, dropping frame",
                    id
                );
            }
        }
    }

    /// Returns whether the read loop is still running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Closes the connection and fails every pending request.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");

        self.connected.store(false, Ordering::SeqCst);
        self.closing.cancel();

        self.pending.lock().clear();

        let writer_task = self.writer_task.lock().take();
        if let Some(task) = writer_task {
            match task.await {
                Ok(result) => result?,
                Err(e) => tracing::debug!("write_loop task failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Writes queued frames one at a time until the connection closes.
///
/// A frame that has started going out is finished even if its caller has
/// given up, so the bus never sees a truncated request. Only `closing`
/// interrupts a write.
async fn write_loop(
    mut writer: BoxedWriter,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    closing: CancellationToken,
) -> io::Result<()> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            next = queue.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = closing.cancelled() => break,
            result = write_frame(&mut writer, &frame.bytes) => result,
        };
        if let Err(e) = &result {
            tracing::warn!("write_loop: failed to write frame: {}", e);
        }
        let _ = frame.written.send(result);
    }

    tracing::debug!("write_loop stopped");
    writer.shutdown().await
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// A registered request. Dropping it removes the pending entry unless the
/// read loop already consumed it.
struct PendingRequest<'a> {
    conn: &'a Connection,
    id: u16,
    rx: oneshot::Receiver<Frame>,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.rx.close();
        let mut pending = self.conn.pending.lock();
        // The id may already belong to a newer request; only remove our own.
        if pending.get(&self.id).is_some_and(|tx| tx.is_closed()) {
            pending.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrology_protocol::function;
    use tokio::io::{duplex, DuplexStream};

    const ADDR: Address = Address([0x08, 0x83, 0x39, 0x76]);

    /// Reads the next request frame written by the client.
    async fn next_request(device: &mut DuplexStream, decoder: &mut Decoder) -> Frame {
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = decoder.decode_frame().unwrap() {
                return frame;
            }
            let n = device.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the transport");
            decoder.extend(&buf[..n]);
        }
    }

    async fn reply(device: &mut DuplexStream, request: &Frame, function: u8, payload: &[u8]) {
        let response = Frame::new(
            request.address,
            function,
            Bytes::copy_from_slice(payload),
            request.correlation_id,
        );
        device
            .write_all(&response.encode().unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert!(config.exclusive);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new().with_read_buffer_size(1);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let device_task = tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let request = next_request(&mut device, &mut decoder).await;
            assert_eq!(request.address, ADDR);
            assert_eq!(request.function, function::READ_PARAM);
            assert_eq!(request.payload.as_ref(), &[0x02, 0x00]);
            reply(&mut device, &request, function::READ_PARAM, &[1, 2, 3]).await;
            device
        });

        let payload = conn
            .request(ADDR, function::READ_PARAM, Bytes::from_static(&[0x02, 0x00]))
            .await
            .unwrap();
        assert_eq!(payload.as_ref(), &[1, 2, 3]);
        assert_eq!(conn.pending_count(), 0);

        let _device = device_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let request = next_request(&mut device, &mut decoder).await;
            let response = Frame::new(
                request.address,
                request.function,
                Bytes::from_static(&[9, 9, 9, 9]),
                request.correlation_id,
            )
            .encode()
            .unwrap();
            device.write_all(&response[..3]).await.unwrap();
            device.flush().await.unwrap();
            tokio::task::yield_now().await;
            device.write_all(&response[3..]).await.unwrap();
            device
        });

        let payload = conn
            .request(ADDR, function::READ_CHANNELS, Bytes::from_static(&[1, 0, 0, 0]))
            .await
            .unwrap();
        assert_eq!(payload.as_ref(), &[9, 9, 9, 9]);
    }

    #[tokio::test]
    async fn test_device_error_response() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let request = next_request(&mut device, &mut decoder).await;
            reply(&mut device, &request, function::ERROR, &[0x05]).await;
            let request = next_request(&mut device, &mut decoder).await;
            reply(&mut device, &request, function::ERROR, &[0x77]).await;
            let request = next_request(&mut device, &mut decoder).await;
            reply(&mut device, &request, function::ERROR, &[]).await;
            device
        });

        let err = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Device(DeviceError::AuthorizationRequired)
        ));

        let err = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Device(DeviceError::Unknown(0x77))));

        let err = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_entry() {
        let (client_io, device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let started = tokio::time::Instant::now();
        let err = conn
            .send_receive(
                ADDR,
                function::READ_PARAM,
                Bytes::new(),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::DeviceNotResponding));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.is_connected());
        drop(device);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let (late_tx, late_rx) = oneshot::channel::<Frame>();
        let device_task = tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let first = next_request(&mut device, &mut decoder).await;
            // Hold the first answer until the caller has given up.
            let _ = late_rx.await;
            reply(&mut device, &first, function::READ_PARAM, &[0xAA]).await;
            let second = next_request(&mut device, &mut decoder).await;
            reply(&mut device, &second, function::READ_PARAM, &[0xBB]).await;
            device
        });

        let err = conn
            .send_receive(
                ADDR,
                function::READ_PARAM,
                Bytes::new(),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeviceNotResponding));
        drop(late_tx);

        let payload = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap();
        assert_eq!(payload.as_ref(), &[0xBB]);
        assert_eq!(conn.pending_count(), 0);

        let _device = device_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_requests_matched_by_correlation_id() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::new().with_exclusive(false));

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let first = next_request(&mut device, &mut decoder).await;
            let second = next_request(&mut device, &mut decoder).await;
            assert_ne!(first.correlation_id, second.correlation_id);
            // Answer in reverse order, echoing each request's payload.
            reply(&mut device, &second, second.function, &second.payload).await;
            reply(&mut device, &first, first.function, &first.payload).await;
            device
        });

        let a = conn.request(ADDR, function::READ_PARAM, Bytes::from_static(b"a"));
        let b = conn.request(ADDR, function::READ_PARAM, Bytes::from_static(b"b"));
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap().as_ref(), b"a");
        assert_eq!(b.unwrap().as_ref(), b"b");
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_mode_serializes_exchanges() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            for _ in 0..2 {
                let request = next_request(&mut device, &mut decoder).await;
                // A second request must not be on the wire yet.
                assert_eq!(decoder.buffered(), 0);
                reply(&mut device, &request, request.function, &request.payload).await;
            }
            device
        });

        let a = conn.request(ADDR, function::READ_PARAM, Bytes::from_static(b"a"));
        let b = conn.request(ADDR, function::READ_PARAM, Bytes::from_static(b"b"));
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap().as_ref(), b"a");
        assert_eq!(b.unwrap().as_ref(), b"b");
    }

    #[tokio::test]
    async fn test_unsolicited_and_corrupt_frames_are_skipped() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let request = next_request(&mut device, &mut decoder).await;

            let stray = Frame::new(ADDR, request.function, Bytes::new(), request.correlation_id ^ 1);
            device.write_all(&stray.encode().unwrap()).await.unwrap();
            device.flush().await.unwrap();
            tokio::task::yield_now().await;

            let mut corrupt = Frame::new(ADDR, request.function, Bytes::from_static(&[1]), 0)
                .encode()
                .unwrap();
            corrupt[6] ^= 0xFF;
            device.write_all(&corrupt).await.unwrap();
            device.flush().await.unwrap();
            tokio::task::yield_now().await;

            reply(&mut device, &request, request.function, &[0x42]).await;
            device
        });

        let payload = conn
            .send_receive(
                ADDR,
                function::READ_PARAM,
                Bytes::new(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(payload.as_ref(), &[0x42]);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_end_of_stream_fails_pending_requests() {
        let (client_io, mut device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let _request = next_request(&mut device, &mut decoder).await;
            drop(device);
        });

        let err = conn
            .send_receive(
                ADDR,
                function::READ_PARAM,
                Bytes::new(),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert!(!conn.is_connected());
        assert_eq!(conn.pending_count(), 0);

        let err = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close() {
        let (client_io, _device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());
        assert!(conn.is_connected());

        conn.close().await.unwrap();
        assert!(!conn.is_connected());

        let err = conn
            .request(ADDR, function::READ_PARAM, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_timed_out_request_is_written_whole() {
        // The device does not read yet, so the frame stalls after 4 bytes.
        let (client_io, mut device) = duplex(4);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let err = conn
            .send_receive(
                ADDR,
                function::READ_PARAM,
                Bytes::from_static(&[0x01, 0x02]),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DeviceNotResponding));
        assert_eq!(conn.pending_count(), 0);

        let device_task = tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let first = next_request(&mut device, &mut decoder).await;
            let second = next_request(&mut device, &mut decoder).await;
            reply(&mut device, &second, second.function, &[0x0C]).await;
            (first, device)
        });

        let payload = conn
            .request(ADDR, function::READ_PARAM, Bytes::from_static(&[0x0C, 0x01]))
            .await
            .unwrap();
        assert_eq!(payload.as_ref(), &[0x0C]);

        let (first, _device) = device_task.await.unwrap();
        assert_eq!(first.payload.as_ref(), &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_dropped_request_is_written_whole() {
        let (client_io, mut device) = duplex(4);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let request = conn.send_receive(
            ADDR,
            function::READ_CHANNELS,
            Bytes::from_static(&[0xFF, 0xFF, 0x00, 0x00]),
            Duration::from_secs(60),
        );
        let raced = tokio::time::timeout(Duration::from_millis(20), request).await;
        assert!(raced.is_err());

        let mut decoder = Decoder::new();
        let frame = next_request(&mut device, &mut decoder).await;
        assert_eq!(frame.function, function::READ_CHANNELS);
        assert_eq!(frame.payload.as_ref(), &[0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(decoder.buffered(), 0);
    }

    /// Transport whose write half cannot be shut down.
    struct FailingShutdown(DuplexStream);

    impl AsyncRead for FailingShutdown {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for FailingShutdown {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::pin::Pin::new(&mut self.0).poll_flush(cx)
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "port gone")))
        }
    }

    #[tokio::test]
    async fn test_close_reports_shutdown_error() {
        let (client_io, _device) = duplex(1024);
        let conn = Connection::open(FailingShutdown(client_io), ConnectionConfig::default());

        let err = conn.close().await.unwrap_err();
        assert!(matches!(err, ClientError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(!conn.is_connected());

        // The write half is gone; closing again is a no-op.
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_no_entry() {
        let (client_io, _device) = duplex(1024);
        let conn = Connection::open(client_io, ConnectionConfig::default());

        let request = conn.send_receive(
            ADDR,
            function::READ_PARAM,
            Bytes::new(),
            Duration::from_secs(60),
        );
        let raced = tokio::time::timeout(Duration::from_millis(20), request).await;
        assert!(raced.is_err());
        assert_eq!(conn.pending_count(), 0);
    }
}
