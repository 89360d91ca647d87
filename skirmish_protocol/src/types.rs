// Core id types and protocol-wide limits.
//
// `PlayerId` (the "dpid") is both a directory index and the wire-level
// source/destination byte. It can only be constructed through range-checked
// constructors, so any value that made it past decoding is a valid index into
// the fixed-capacity player tables on either side of the connection.
//
// Index 0 is reserved: normal allocation never hands it out. The session host
// installs itself there explicitly (`PlayerId::HOST`).

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Capacity of every per-player table (directory, connection slots).
pub const MAX_CONNECTED_PLAYERS: usize = 8;

/// Destination byte meaning "deliver to all connected participants".
pub const BROADCAST: u8 = 255;

/// Bound for player names on the wire, terminator included (63 usable bytes).
pub const MAX_NAME_LEN: usize = 64;

/// Participant id, always `< MAX_CONNECTED_PLAYERS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerId(u8);

impl PlayerId {
    /// The reserved slot the session host occupies.
    pub const HOST: PlayerId = PlayerId(0);

    /// Range-checked constructor.
    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < MAX_CONNECTED_PLAYERS {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Range-checked constructor for ids carried in wider wire fields.
    pub fn from_u32(raw: u32) -> Option<Self> {
        u8::try_from(raw).ok().and_then(Self::new)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Ids handed out by normal allocation (everything but the reserved 0).
    pub fn is_assignable(self) -> bool {
        self.0 != 0
    }

    /// Every id in table order, 0 first.
    pub fn all() -> impl Iterator<Item = PlayerId> {
        (0..MAX_CONNECTED_PLAYERS as u8).map(PlayerId)
    }
}

impl TryFrom<u8> for PlayerId {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("player id {raw} out of range"))
    }
}

impl From<PlayerId> for u8 {
    fn from(id: PlayerId) -> u8 {
        id.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-player flag bitset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerFlags(pub u32);

impl PlayerFlags {
    pub const NONE: PlayerFlags = PlayerFlags(0);
    pub const HOST: PlayerFlags = PlayerFlags(1);
    pub const SPECTATOR: PlayerFlags = PlayerFlags(2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PlayerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PlayerFlags {
    type Output = PlayerFlags;

    fn bitor(self, rhs: PlayerFlags) -> PlayerFlags {
        PlayerFlags(self.0 | rhs.0)
    }
}

/// Decoded form of a header's destination byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Player(PlayerId),
    Broadcast,
}

impl Destination {
    /// Returns `None` for bytes that are neither a valid id nor the sentinel.
    pub fn from_wire(raw: u8) -> Option<Self> {
        if raw == BROADCAST {
            Some(Self::Broadcast)
        } else {
            PlayerId::new(raw).map(Self::Player)
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Player(id) => id.get(),
            Self::Broadcast => BROADCAST,
        }
    }
}

impl From<PlayerId> for Destination {
    fn from(id: PlayerId) -> Self {
        Self::Player(id)
    }
}
