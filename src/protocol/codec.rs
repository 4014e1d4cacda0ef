//! Wire primitive reader and writer
//!
//! [`Reader`] is a cursor over one already-framed message. [`Writer`] builds one backend
//! message at a time, leaving room for the 5-byte `type + length` header and patching it
//! on [`Writer::flush`].

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the `type byte + int32 length` header reserved by [`Writer`].
const HEADER_LEN: usize = 5;

/// Cursor over the bytes of a single message.
///
/// Every read advances the cursor. Reading past the end is a protocol error: the framer
/// bounds message length, so an over-read means the client sent a malformed body.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Protocol(format!(
                "unexpected end of message reading {} ({} bytes needed, {} left)",
                what,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Read one byte
    pub fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1, "byte")?[0])
    }

    /// Read a big-endian int16
    pub fn int16(&mut self) -> Result<i16> {
        let b = self.take(2, "int16")?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian int32
    pub fn int32(&mut self) -> Result<i32> {
        let b = self.take(4, "int32")?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read `n` raw bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n, "bytes")
    }

    /// Read `n` bytes as UTF-8 text
    pub fn string(&mut self, n: usize) -> Result<&'a str> {
        let b = self.take(n, "string")?;
        std::str::from_utf8(b)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string: {}", e)))
    }

    /// Read bytes up to (excluding) the next `0x00`; the terminator is consumed
    pub fn cstring_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.buf[self.offset..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::Protocol("missing null terminator in string".to_string())
        })?;
        self.offset += end + 1;
        Ok(&rest[..end])
    }

    /// Read a null-terminated UTF-8 string
    pub fn cstring(&mut self) -> Result<&'a str> {
        let b = self.cstring_bytes()?;
        std::str::from_utf8(b)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string: {}", e)))
    }
}

/// Builder for a single backend message.
///
/// Each [`flush`](Writer::flush) hands out an owned buffer and starts a fresh one, so
/// messages already returned are never touched again.
#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    /// Create an empty writer
    pub fn new() -> Self {
        Self {
            buf: Self::fresh_buffer(),
        }
    }

    fn fresh_buffer() -> BytesMut {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_bytes(0, HEADER_LEN);
        buf
    }

    /// Append a big-endian int16
    pub fn add_int16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    /// Append a big-endian int32
    pub fn add_int32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    /// Append a string followed by a `0x00` terminator
    pub fn add_cstring(&mut self, value: &str) -> &mut Self {
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Append a string with no terminator
    pub fn add_string(&mut self, value: &str) -> &mut Self {
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Append raw bytes
    pub fn add_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    /// Finish the current message and start a new one.
    ///
    /// With a type code the result is `code + int32 length + body`, where the length
    /// counts itself and the body. Without one only the body is returned; that form is
    /// used for the single-byte SSL negotiation answer, which has no header at all.
    pub fn flush(&mut self, code: Option<u8>) -> Bytes {
        let mut buf = std::mem::replace(&mut self.buf, Self::fresh_buffer());
        match code {
            Some(code) => {
                let len = (buf.len() - 1) as i32;
                buf[0] = code;
                buf[1..HEADER_LEN].copy_from_slice(&len.to_be_bytes());
                buf.freeze()
            }
            None => buf.split_off(HEADER_LEN).freeze(),
        }
    }
}
