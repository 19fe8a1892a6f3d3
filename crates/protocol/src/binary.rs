//! Binary reading and writing utilities.
//!
//! All values are little-endian. Every read is bounds-checked so a truncated
//! frame surfaces as [`ProtocolError::UnexpectedEof`] instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec2;

use crate::ProtocolError;

/// A reader for parsing binary protocol messages.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() >= n {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedEof)
        }
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    #[inline]
    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_u8()? != 0)
    }

    #[inline]
    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    #[inline]
    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    /// Read two consecutive f32 values as a vector.
    #[inline]
    pub fn get_vec2(&mut self) -> Result<Vec2, ProtocolError> {
        let x = self.get_f32()?;
        let y = self.get_f32()?;
        Ok(Vec2::new(x, y))
    }

    /// Read a u8-length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_u8()? as usize;
        self.need(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Fail if any bytes are left unread.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

/// A writer for building binary protocol messages.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    #[inline]
    pub fn put_vec2(&mut self, v: Vec2) {
        self.buf.put_f32_le(v.x);
        self.buf.put_f32_le(v.y);
    }

    /// Write a u8-length-prefixed UTF-8 string, truncated to 255 bytes on a
    /// character boundary.
    pub fn put_string(&mut self, s: &str) {
        let mut end = s.len().min(u8::MAX as usize);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.put_u8(end as u8);
        self.buf.put_slice(&s.as_bytes()[..end]);
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_u32() {
        let mut w = BinaryWriter::new();
        w.put_u32(0xDEADBEEF);
        let data = w.finish();
        let mut r = BinaryReader::new(data);
        assert_eq!(r.get_u32(), Ok(0xDEADBEEF));
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_string() {
        let mut w = BinaryWriter::new();
        w.put_string("hello");
        let mut r = BinaryReader::new(w.finish());
        assert_eq!(r.get_string().as_deref(), Ok("hello"));
    }

    #[test]
    fn test_long_string_truncates_on_char_boundary() {
        let s = "é".repeat(200);
        let mut w = BinaryWriter::new();
        w.put_string(&s);
        let mut r = BinaryReader::new(w.finish());
        let back = r.get_string().unwrap();
        assert_eq!(back.len(), 254);
        assert!(s.starts_with(&back));
    }

    #[test]
    fn test_truncated_read_is_error() {
        let mut r = BinaryReader::new(vec![1u8, 2, 3]);
        assert_eq!(r.get_u32(), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let mut r = BinaryReader::new(vec![1u8, 2]);
        r.get_u8().unwrap();
        assert_eq!(r.finish(), Err(ProtocolError::TrailingBytes(1)));
    }
}
