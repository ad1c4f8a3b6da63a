//! Stream framing for serial and TCP links.
//!
//! Every frame carries a one-byte direction marker and a 2-byte
//! little-endian length ahead of the payload:
//!
//! ```text
//! +--------+--------+--------+-------------------+
//! | marker | len_lo | len_hi | data[0..len]      |
//! +--------+--------+--------+-------------------+
//! ```
//!
//! The marker is `<` for host → radio and `>` for radio → host.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Marker of frames sent by the host.
pub const HOST_FRAME_MARKER: u8 = b'<';
/// Marker of frames sent by the radio.
pub const DEVICE_FRAME_MARKER: u8 = b'>';

/// Largest payload the decoder accepts before it assumes it lost sync.
pub const MAX_FRAMED_SIZE: usize = 1024;

const HEADER_LEN: usize = 3;

/// Reassembles radio → host frames from an arbitrary byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(MAX_FRAMED_SIZE),
        }
    }

    /// Append bytes read from the link.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to take one complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Bytes before a `>`
    /// marker are discarded. A header announcing an oversized payload is
    /// dropped (marker included) so the next call resynchronises on the
    /// following marker.
    pub fn decode(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let skip = self
            .buffer
            .iter()
            .position(|&b| b == DEVICE_FRAME_MARKER)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            log::trace!("discarding {} bytes of line noise", skip);
            self.buffer.advance(skip);
        }

        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(u16::from_le_bytes([self.buffer[1], self.buffer[2]]));
        if len > MAX_FRAMED_SIZE {
            self.buffer.advance(1);
            return Err(ProtocolError::FrameTooLong {
                max: MAX_FRAMED_SIZE,
                actual: len,
            });
        }

        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        Ok(Some(self.buffer.split_to(len).to_vec()))
    }

    /// Wrap a command payload for host → radio transmission.
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(HEADER_LEN + data.len());
        framed.put_u8(HOST_FRAME_MARKER);
        framed.put_u16_le(data.len() as u16);
        framed.put_slice(data);
        framed
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
