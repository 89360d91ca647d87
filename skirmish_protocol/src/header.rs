// Fixed five-byte message header.
//
// Layout (multi-byte fields in network order):
//
//   size:u16  type:u8  destination:u8  source:u8  payload[size]
//
// `size` counts payload bytes only. Every frame must fit in a receive buffer
// of `NET_BUFFER_SIZE` bytes, so the largest representable payload is
// `MAX_PAYLOAD_SIZE`. Header fields are read through slice accessors; the
// buffer is never reinterpreted as a struct.

/// Bytes occupied by the header on the wire.
pub const HEADER_SIZE: usize = 5;

/// Capacity of a connection's receive buffer, and so the largest frame.
pub const NET_BUFFER_SIZE: usize = 1024;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = NET_BUFFER_SIZE - HEADER_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub size: u16,
    pub kind: u8,
    pub destination: u8,
    pub source: u8,
}

impl MessageHeader {
    /// Decode a header from the front of `bytes`. Returns `None` if fewer than
    /// `HEADER_SIZE` bytes are available.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        let [size_hi, size_lo, kind, destination, source] = *raw;
        Some(Self {
            size: u16::from_be_bytes([size_hi, size_lo]),
            kind,
            destination,
            source,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let [size_hi, size_lo] = self.size.to_be_bytes();
        [size_hi, size_lo, self.kind, self.destination, self.source]
    }

    /// Header plus payload length.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + usize::from(self.size)
    }

    /// Whether a frame with this header can ever fit in a receive buffer.
    pub fn fits_buffer(&self) -> bool {
        self.frame_len() <= NET_BUFFER_SIZE
    }
}
