// Session descriptor record and discovery command words.
//
// The descriptor is what a host advertises: to the master directory service
// when it registers, and to any peer that connects to its listening port and
// asks with `"list"` or `"join"`. It travels as a fixed-size record:
//
//   name[64]  size:u32  current:u32  max:u32  flags:u32
//   user1..user4:i32  host[16]
//
// Strings are NUL-padded. `size` is a version tag: it must equal
// `DESCRIPTOR_SIZE` or the record is rejected, so a peer running an
// incompatible layout is never misread.
//
// Discovery commands are five ASCII bytes including the terminator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes reserved for the session name.
pub const SESSION_NAME_LEN: usize = 64;

/// Bytes reserved for the host address.
pub const HOST_ADDR_LEN: usize = 16;

/// Version tag carried in `size`: the byte length of the record after `name`.
pub const DESCRIPTOR_SIZE: u32 = (8 * 4 + HOST_ADDR_LEN) as u32;

/// Total record length on the wire.
pub const DESCRIPTOR_RECORD_LEN: usize = SESSION_NAME_LEN + DESCRIPTOR_SIZE as usize;

/// Length of a discovery command word.
pub const COMMAND_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor record truncated: {actual} of {expected} bytes")]
    Truncated { actual: usize, expected: usize },
    #[error("descriptor version tag {found} does not match {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Advertised metadata for one joinable session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub name: String,
    pub size: u32,
    pub current_players: u32,
    pub max_players: u32,
    pub flags: u32,
    pub user_flags: [i32; 4],
    /// Empty when the host leaves it to the receiver to fill in the address it
    /// connected to.
    pub host: String,
}

impl SessionDescriptor {
    /// A fresh descriptor for a session that so far holds only its host.
    pub fn new(name: &str, max_players: u32, user_flags: [i32; 4]) -> Self {
        Self {
            name: name.into(),
            size: DESCRIPTOR_SIZE,
            current_players: 1,
            max_players,
            flags: 0,
            user_flags,
            host: String::new(),
        }
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_RECORD_LEN] {
        let mut out = [0u8; DESCRIPTOR_RECORD_LEN];
        write_padded(&mut out[..SESSION_NAME_LEN], &self.name);
        let mut pos = SESSION_NAME_LEN;
        for word in [
            self.size,
            self.current_players,
            self.max_players,
            self.flags,
        ] {
            out[pos..pos + 4].copy_from_slice(&word.to_be_bytes());
            pos += 4;
        }
        for user in self.user_flags {
            out[pos..pos + 4].copy_from_slice(&user.to_be_bytes());
            pos += 4;
        }
        write_padded(&mut out[pos..pos + HOST_ADDR_LEN], &self.host);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < DESCRIPTOR_RECORD_LEN {
            return Err(DescriptorError::Truncated {
                actual: bytes.len(),
                expected: DESCRIPTOR_RECORD_LEN,
            });
        }
        let word = |index: usize| -> [u8; 4] {
            let at = SESSION_NAME_LEN + index * 4;
            [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
        };
        let size = u32::from_be_bytes(word(0));
        if size != DESCRIPTOR_SIZE {
            return Err(DescriptorError::VersionMismatch {
                found: size,
                expected: DESCRIPTOR_SIZE,
            });
        }
        let host_at = SESSION_NAME_LEN + 8 * 4;
        Ok(Self {
            name: read_padded(&bytes[..SESSION_NAME_LEN]),
            size,
            current_players: u32::from_be_bytes(word(1)),
            max_players: u32::from_be_bytes(word(2)),
            flags: u32::from_be_bytes(word(3)),
            user_flags: [
                i32::from_be_bytes(word(4)),
                i32::from_be_bytes(word(5)),
                i32::from_be_bytes(word(6)),
                i32::from_be_bytes(word(7)),
            ],
            host: read_padded(&bytes[host_at..host_at + HOST_ADDR_LEN]),
        })
    }
}

/// Copy `text` into a zeroed fixed field, always leaving a terminator.
fn write_padded(field: &mut [u8], text: &str) {
    let mut len = text.len().min(field.len().saturating_sub(1));
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
}

fn read_padded(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Commands a peer may send to a host's (or the master's) listening port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryCommand {
    /// Reply with a game count and that many descriptors.
    List,
    /// Reply with the descriptor, then expect a JOIN message.
    Join,
    /// Host registering itself with the master; followed by a descriptor.
    AddGame,
}

impl DiscoveryCommand {
    pub const fn bytes(self) -> [u8; COMMAND_LEN] {
        match self {
            Self::List => *b"list\0",
            Self::Join => *b"join\0",
            Self::AddGame => *b"addg\0",
        }
    }

    pub fn parse(raw: &[u8]) -> Option<Self> {
        [Self::List, Self::Join, Self::AddGame]
            .into_iter()
            .find(|cmd| raw == cmd.bytes().as_slice())
    }
}
