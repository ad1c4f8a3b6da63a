//! Bounds-checked cursor over a received frame.

use bytes::Buf;

use crate::error::ProtocolError;

/// Reads little-endian fields off a frame, reporting short frames as
/// [`ProtocolError::FrameTooShort`] against the whole frame length.
pub(crate) struct FrameReader<'a> {
    buf: &'a [u8],
    frame_len: usize,
}

impl<'a> FrameReader<'a> {
    pub(crate) fn new(frame: &'a [u8]) -> Self {
        FrameReader {
            buf: frame,
            frame_len: frame.len(),
        }
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::FrameTooShort {
                expected: self.position() + n,
                actual: self.frame_len,
            });
        }
        Ok(())
    }

    pub(crate) fn position(&self) -> usize {
        self.frame_len - self.buf.remaining()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn i8(&mut self) -> Result<i8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Fixed-width, NUL-padded string field.
    pub(crate) fn fixed_str(&mut self, width: usize) -> Result<String, ProtocolError> {
        self.need(width)?;
        let field = &self.buf[..width];
        let end = field.iter().position(|&b| b == 0).unwrap_or(width);
        let s = String::from_utf8_lossy(&field[..end]).into_owned();
        self.buf.advance(width);
        Ok(s)
    }

    /// Everything left, as text. A trailing NUL run is trimmed.
    pub(crate) fn rest_str(&mut self) -> String {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.buf.len());
        let s = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.advance(self.buf.len());
        s
    }

    pub(crate) fn rest(&mut self) -> Vec<u8> {
        let out = self.buf.to_vec();
        self.buf.advance(self.buf.len());
        out
    }
}
