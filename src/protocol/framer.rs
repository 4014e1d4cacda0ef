//! Incremental message framing
//!
//! Bytes arrive from the socket in chunks of arbitrary size. [`MessageBuffer`]
//! accumulates them and splits off complete messages without copying: each message is a
//! [`Bytes`] view into the shared reassembly buffer.

use super::constants::MAX_MESSAGE_LENGTH;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};

/// Initial capacity of the reassembly buffer.
const INITIAL_CAPACITY: usize = 8192;

/// Reassembles complete protocol messages from a byte stream.
///
/// Before startup a message is `int32 length + payload`; afterwards it is
/// `byte type + int32 length + payload`. In both cases the length counts itself.
#[derive(Debug)]
pub struct MessageBuffer {
    buf: BytesMut,
    max_message_length: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuffer {
    /// Create an empty buffer with the default message length limit
    pub fn new() -> Self {
        Self::with_max_message_length(MAX_MESSAGE_LENGTH)
    }

    /// Create an empty buffer rejecting messages longer than `max_message_length`
    pub fn with_max_message_length(max_message_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_message_length,
        }
    }

    /// Number of bytes buffered but not yet returned as messages
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Change the length limit applied to messages not yet returned
    pub fn set_max_message_length(&mut self, max_message_length: usize) {
        self.max_message_length = max_message_length;
    }

    /// Take every buffered byte, leaving the buffer empty
    pub fn take_buffered(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Current capacity of the backing buffer
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Append an incoming chunk.
    ///
    /// The backing buffer grows only when the free capacity can't hold the chunk; it at
    /// least doubles so a stream of small chunks costs amortized constant time.
    /// `BytesMut::reserve` shifts the live bytes back to offset 0 instead of allocating
    /// whenever the already-consumed prefix is large enough.
    pub fn merge_buffer(&mut self, chunk: &[u8]) {
        let free = self.buf.capacity() - self.buf.len();
        if free < chunk.len() {
            let wanted = chunk.len().max(self.buf.capacity());
            self.buf.reserve(wanted);
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Split off the next complete message, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A length field that is too small to
    /// be valid or larger than the limit is a protocol error.
    pub fn next_message(&mut self, has_started: bool) -> Result<Option<Bytes>> {
        let header_len = if has_started { 5 } else { 4 };
        if self.buf.len() < header_len {
            return Ok(None);
        }

        let len_offset = header_len - 4;
        let len = i32::from_be_bytes([
            self.buf[len_offset],
            self.buf[len_offset + 1],
            self.buf[len_offset + 2],
            self.buf[len_offset + 3],
        ]);

        if len < 4 {
            return Err(Error::Protocol(format!("invalid message length {}", len)));
        }
        let len = len as usize;
        if len > self.max_message_length {
            return Err(Error::Protocol(format!(
                "message length {} exceeds maximum allowed {}",
                len, self.max_message_length
            )));
        }

        let total = len + len_offset;
        if self.buf.len() < total {
            return Ok(None);
        }

        Ok(Some(self.buf.split_to(total).freeze()))
    }

    /// Drain every complete message currently buffered
    pub fn process_messages(&mut self, has_started: bool) -> Result<Vec<Bytes>> {
        let mut messages = Vec::new();
        while let Some(msg) = self.next_message(has_started)? {
            messages.push(msg);
        }
        Ok(messages)
    }
}
