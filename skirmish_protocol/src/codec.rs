// Positional binary codec for message payloads.
//
// The protocol is not self-describing: a `MessageWriter` appends fields in
// order, and the receiving side must read them back with a `MessageReader`
// in exactly the same order and widths. There are no tags or field counts.
//
// Field encodings (network order):
// - integers: fixed width, big-endian
// - bool: one byte, non-zero is true
// - string: u16 byte length, then UTF-8 bytes. The writer truncates (at a char
//   boundary) to `max - 1` bytes; the reader rejects longer lengths.
// - blob: raw bytes, length supplied by the caller on both sides
//
// The writer refuses to grow a payload past `MAX_PAYLOAD_SIZE`, so every
// message it produces fits a receive buffer.

use thiserror::Error;

use crate::header::MAX_PAYLOAD_SIZE;
use crate::message::{Message, MessageKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("payload overflow: need {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },
    #[error("payload underflow: need {needed} bytes, {available} left")]
    Underflow { needed: usize, available: usize },
    #[error("string of {len} bytes exceeds bound of {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

/// Sequential encoder for one message payload.
#[derive(Debug)]
pub struct MessageWriter {
    kind: MessageKind,
    destination: u8,
    payload: Vec<u8>,
}

impl MessageWriter {
    pub fn begin(kind: MessageKind, destination: u8) -> Self {
        Self {
            kind,
            destination,
            payload: Vec::new(),
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<&mut Self, CodecError> {
        let available = MAX_PAYLOAD_SIZE - self.payload.len();
        if bytes.len() > available {
            return Err(CodecError::Overflow {
                needed: bytes.len(),
                available,
            });
        }
        self.payload.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn u8(&mut self, value: u8) -> Result<&mut Self, CodecError> {
        self.put(&[value])
    }

    pub fn u16(&mut self, value: u16) -> Result<&mut Self, CodecError> {
        self.put(&value.to_be_bytes())
    }

    pub fn u32(&mut self, value: u32) -> Result<&mut Self, CodecError> {
        self.put(&value.to_be_bytes())
    }

    pub fn i32(&mut self, value: i32) -> Result<&mut Self, CodecError> {
        self.put(&value.to_be_bytes())
    }

    pub fn bool(&mut self, value: bool) -> Result<&mut Self, CodecError> {
        self.put(&[u8::from(value)])
    }

    /// Bounded string; `max` counts a terminator, as the fixed C-side arrays
    /// of the same name do, so at most `max - 1` bytes are sent.
    pub fn string(&mut self, value: &str, max: usize) -> Result<&mut Self, CodecError> {
        let text = truncate_at_char_boundary(value, max.saturating_sub(1));
        let len = u16::try_from(text.len()).map_err(|_| CodecError::StringTooLong {
            len: text.len(),
            max: usize::from(u16::MAX),
        })?;
        let available = MAX_PAYLOAD_SIZE - self.payload.len();
        if 2 + text.len() > available {
            return Err(CodecError::Overflow {
                needed: 2 + text.len(),
                available,
            });
        }
        self.u16(len)?;
        self.put(text.as_bytes())
    }

    /// Raw bytes; the reader must be told the length separately.
    pub fn bin(&mut self, bytes: &[u8]) -> Result<&mut Self, CodecError> {
        self.put(bytes)
    }

    /// Payload bytes written so far.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Finalise the payload length and produce the message. The source byte is
    /// stamped by whoever sends it.
    pub fn end(self) -> Message {
        Message::from_parts(self.kind, self.destination, 0, self.payload)
    }
}

/// Sequential decoder over one message payload.
#[derive(Debug)]
pub struct MessageReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn begin(message: &'a Message) -> Self {
        Self::over(message.payload())
    }

    /// Decode from a bare payload slice.
    pub fn over(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.remaining();
        if n > available {
            return Err(CodecError::Underflow {
                needed: n,
                available,
            });
        }
        let bytes = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    pub fn string(&mut self, max: usize) -> Result<String, CodecError> {
        let len = usize::from(self.u16()?);
        let bound = max.saturating_sub(1);
        if len > bound {
            return Err(CodecError::StringTooLong { len, max: bound });
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn bin(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    /// Finish decoding. Returns the number of unread trailing bytes, which is
    /// non-zero only when the two sides disagree on the field sequence.
    pub fn end(self) -> usize {
        self.remaining()
    }
}

fn truncate_at_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
