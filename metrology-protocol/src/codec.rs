//! Incremental frame decoder.

use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::BytesMut;

/// Accumulates bytes from a transport and yields complete frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(crate::MAX_FRAME_SIZE),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. Any other framing error
    /// discards the buffered bytes so the next read starts a fresh frame.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match Frame::decode(&mut self.buffer) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if e.is_recoverable() => Ok(None),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
