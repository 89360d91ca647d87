// Message kinds and the owned message frame.
//
// `MessageKind` is the exhaustive vocabulary of type codes. Codes 90..=96 are
// reserved system messages consumed by the session layer before anything
// reaches the application; every other code is carried through as
// `Application(code)`. File transfer rides on an ordinary application code
// (`FILE_MSG`).
//
// `Message` owns a header and its payload. It is built by `MessageWriter`
// (see `codec.rs`) or extracted from a receive buffer, and serialises back to
// exactly the bytes it was read from, which is what lets the host relay frames
// verbatim.

use crate::codec::CodecError;
use crate::header::{HEADER_SIZE, MAX_PAYLOAD_SIZE, MessageHeader};
use crate::types::{BROADCAST, Destination};

/// Application-level type code used by chunked file transfer.
pub const FILE_MSG: u8 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Joiner asks to be admitted (payload: player name).
    Join,
    /// Host admits a joiner (payload: assigned id).
    Accepted,
    /// Directory entry sync: id, allocated, name, flags.
    PlayerInfo,
    /// Global per-player blob sync: id, size, bytes.
    PlayerData,
    /// A participant joined (payload: id).
    PlayerJoined,
    /// A participant left (payload: id).
    PlayerLeft,
    /// The four shared game flags.
    GameFlags,
    /// Anything else; surfaced to the application untouched.
    Application(u8),
}

impl MessageKind {
    pub const fn from_code(code: u8) -> Self {
        match code {
            90 => Self::Join,
            91 => Self::Accepted,
            92 => Self::PlayerInfo,
            93 => Self::PlayerData,
            94 => Self::PlayerJoined,
            95 => Self::PlayerLeft,
            96 => Self::GameFlags,
            other => Self::Application(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Join => 90,
            Self::Accepted => 91,
            Self::PlayerInfo => 92,
            Self::PlayerData => 93,
            Self::PlayerJoined => 94,
            Self::PlayerLeft => 95,
            Self::GameFlags => 96,
            Self::Application(code) => code,
        }
    }
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}

/// One framed message: header fields plus payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl Message {
    /// Build a message around an already-encoded payload.
    pub fn new(kind: MessageKind, destination: u8, payload: Vec<u8>) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::Overflow {
                needed: payload.len(),
                available: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self::from_parts(kind, destination, 0, payload))
    }

    /// Caller guarantees `payload.len() <= MAX_PAYLOAD_SIZE`.
    pub(crate) fn from_parts(kind: MessageKind, destination: u8, source: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self {
            header: MessageHeader {
                size: payload.len() as u16,
                kind: kind.code(),
                destination,
                source,
            },
            payload,
        }
    }

    /// Parse one complete frame. `frame` must hold exactly the header and the
    /// declared payload.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let header = MessageHeader::decode(frame)?;
        if !header.fits_buffer() || frame.len() != header.frame_len() {
            return None;
        }
        Some(Self {
            header,
            payload: frame[HEADER_SIZE..].to_vec(),
        })
    }

    pub fn header(&self) -> MessageHeader {
        self.header
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_code(self.header.kind)
    }

    /// Raw destination byte; see `destination()` for the validated form.
    pub fn destination_byte(&self) -> u8 {
        self.header.destination
    }

    pub fn destination(&self) -> Option<Destination> {
        Destination::from_wire(self.header.destination)
    }

    pub fn is_broadcast(&self) -> bool {
        self.header.destination == BROADCAST
    }

    pub fn source(&self) -> u8 {
        self.header.source
    }

    /// Stamp the routing fields, as done just before a send.
    pub fn set_route(&mut self, destination: u8, source: u8) {
        self.header.destination = destination;
        self.header.source = source;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn frame_len(&self) -> usize {
        self.header.frame_len()
    }

    /// Serialise to wire bytes (header + payload).
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.frame_len());
        frame.extend_from_slice(&self.header.encode());
        frame.extend_from_slice(&self.payload);
        frame
    }
}
