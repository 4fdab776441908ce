//! Byte-level primitives shared by the frame codec and the state serializer.
//!
//! Integers are unsigned LEB128 (`uleb`), signed integers are zigzag-mapped
//! onto LEB128, floats are 8-byte little-endian, and strings/byte blobs are
//! length-prefixed with a `uleb` length.

use crate::error::DecodeError;

/// Growable buffer writer.
#[derive(Debug, Default)]
pub struct BytesWriter {
    buf: Vec<u8>,
}

impl BytesWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(32),
        }
    }

    #[inline]
    pub fn push_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    #[inline]
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn push_uleb(&mut self, mut n: u64) {
        loop {
            let byte = (n & 0x7f) as u8;
            n >>= 7;
            if n == 0 {
                self.push_byte(byte);
                break;
            }
            self.push_byte(byte | 0x80);
        }
    }

    /// Zigzag-encode a signed integer so small magnitudes stay short.
    pub fn push_zigzag(&mut self, n: i64) {
        self.push_uleb(((n << 1) ^ (n >> 63)) as u64);
    }

    pub fn push_f64(&mut self, n: f64) {
        self.push_bytes(&n.to_le_bytes());
    }

    #[inline]
    pub fn push_var_bytes(&mut self, bytes: &[u8]) {
        self.push_uleb(bytes.len() as u64);
        self.push_bytes(bytes);
    }

    #[inline]
    pub fn push_var_string(&mut self, s: &str) {
        self.push_var_bytes(s.as_bytes());
    }

    #[inline]
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        self.buf
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug)]
pub struct BytesReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> BytesReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.off).ok_or(DecodeError::UnexpectedEof)?;
        self.off += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .off
            .checked_add(len)
            .ok_or(DecodeError::UnexpectedEof)?;
        let bytes = self
            .buf
            .get(self.off..end)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.off = end;
        Ok(bytes)
    }

    /// Everything after the cursor; the reader is left empty.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.buf.get(self.off..).unwrap_or_default();
        self.off = self.buf.len();
        rest
    }

    pub fn read_uleb(&mut self) -> Result<u64, DecodeError> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7f) << shift;
            if (byte & 0x80) == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(DecodeError::Malformed("uleb128 too large".into()));
            }
        }
        Ok(result)
    }

    pub fn read_zigzag(&mut self) -> Result<i64, DecodeError> {
        let n = self.read_uleb()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = usize::try_from(self.read_uleb()?)
            .map_err(|_| DecodeError::Malformed("length too large".into()))?;
        self.read_bytes(len)
    }

    pub fn read_var_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_var_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn uleb_boundaries() {
        let values: [u64; 8] = [0, 1, 127, 128, 16383, 16384, 0xffff_ffff, u64::MAX];
        let mut w = BytesWriter::new();
        for &n in &values {
            w.push_uleb(n);
        }
        let buf = w.finalize();
        let mut r = BytesReader::new(&buf);
        for &n in &values {
            assert_eq!(r.read_uleb().unwrap(), n);
        }
        assert!(r.is_empty());
    }

    #[test]
    fn zigzag_keeps_small_negatives_short() {
        let mut w = BytesWriter::new();
        w.push_zigzag(-1);
        assert_eq!(w.len(), 1);
        w.push_zigzag(i64::MIN);
        w.push_zigzag(i64::MAX);
        let buf = w.finalize();
        let mut r = BytesReader::new(&buf);
        assert_eq!(r.read_zigzag().unwrap(), -1);
        assert_eq!(r.read_zigzag().unwrap(), i64::MIN);
        assert_eq!(r.read_zigzag().unwrap(), i64::MAX);
    }

    #[test]
    fn truncated_input_is_eof_not_panic() {
        let mut w = BytesWriter::new();
        w.push_var_string("hello");
        let mut buf = w.finalize();
        buf.truncate(3);
        let mut r = BytesReader::new(&buf);
        assert_eq!(r.read_var_string(), Err(DecodeError::UnexpectedEof));
        assert_eq!(BytesReader::new(&[]).read_byte(), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let buf = [2u8, 0xff, 0xfe];
        assert_eq!(
            BytesReader::new(&buf).read_var_string(),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[test]
    fn oversized_uleb_is_rejected() {
        let buf = [0xffu8; 11];
        assert!(matches!(
            BytesReader::new(&buf).read_uleb(),
            Err(DecodeError::Malformed(_))
        ));
    }
}
