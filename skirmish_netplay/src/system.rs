// System messages: replication of the player directory and game flags.
//
// Reserved kinds are consumed inside `Router::recv` and applied here:
//
// | kind          | payload                                   | effect                      |
// |---------------|-------------------------------------------|-----------------------------|
// | PLAYER_INFO   | u8 id, bool allocated, string name, u32   | overwrite directory entry   |
// | PLAYER_DATA   | u32 id, u16 size, size bytes              | overwrite global data blob  |
// | PLAYER_JOINED | u8 id                                     | `on_join` hook              |
// | PLAYER_LEFT   | u32 id                                    | release entry, `on_leave`   |
// | GAME_FLAGS    | u8 count, count x i32                     | overwrite the flag array    |
//
// On the host, PLAYER_INFO, PLAYER_DATA and GAME_FLAGS are re-broadcast after
// being applied so every joiner converges on the host's view. JOIN and
// ACCEPTED belong to the handshake and are passed through to the caller.
//
// A malformed system message (short payload, out-of-range id) is logged and
// dropped; it never reaches the application.

use skirmish_protocol::{
    BROADCAST, MAX_NAME_LEN, MAX_PAYLOAD_SIZE, Message, MessageKind, MessageReader, MessageWriter, PlayerFlags,
    PlayerId,
};
use tracing::{debug, warn};

use crate::directory::DirectoryError;
use crate::error::{NetError, NetResult};
use crate::router::{GAME_FLAG_COUNT, Router};
use crate::transport::Transport;

/// Largest global data blob that fits one PLAYER_DATA message.
pub const MAX_PLAYER_DATA: usize = MAX_PAYLOAD_SIZE - 6;

fn player_id(raw: u32) -> Result<PlayerId, DirectoryError> {
    PlayerId::from_u32(raw).ok_or(DirectoryError::OutOfRange(raw))
}

pub(crate) fn player_info_message(id: PlayerId, allocated: bool, name: &str, flags: PlayerFlags) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::PlayerInfo, BROADCAST);
    w.u8(id.get())?.bool(allocated)?.string(name, MAX_NAME_LEN)?.u32(flags.bits())?;
    Ok(w.end())
}

pub(crate) fn player_data_message(id: PlayerId, data: &[u8]) -> NetResult<Message> {
    let size = u16::try_from(data.len()).map_err(|_| NetError::Protocol(format!("player data of {} bytes", data.len())))?;
    let mut w = MessageWriter::begin(MessageKind::PlayerData, BROADCAST);
    w.u32(id.get().into())?.u16(size)?.bin(data)?;
    Ok(w.end())
}

pub(crate) fn player_joined_message(id: PlayerId) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::PlayerJoined, BROADCAST);
    w.u8(id.get())?;
    Ok(w.end())
}

pub(crate) fn player_left_message(id: PlayerId) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::PlayerLeft, BROADCAST);
    w.u32(id.get().into())?;
    Ok(w.end())
}

/// ACCEPTED carries the raw id byte so a rejection (an id outside the table)
/// can travel in the same shape.
pub(crate) fn accepted_message(raw_id: u8) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::Accepted, raw_id);
    w.u8(raw_id)?;
    Ok(w.end())
}

pub(crate) fn join_message(name: &str) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::Join, PlayerId::HOST.get());
    w.string(name, MAX_NAME_LEN)?;
    Ok(w.end())
}

pub(crate) fn game_flags_message(flags: &[i32; GAME_FLAG_COUNT]) -> NetResult<Message> {
    let mut w = MessageWriter::begin(MessageKind::GameFlags, BROADCAST);
    w.u8(GAME_FLAG_COUNT as u8)?;
    for flag in flags {
        w.i32(*flag)?;
    }
    Ok(w.end())
}

impl<T: Transport> Router<T> {
    /// Apply `message` if it is a system message. Returns true when it was
    /// consumed and must not reach the application.
    pub(crate) fn process_system_message(&mut self, message: &Message) -> bool {
        let result = match message.kind() {
            MessageKind::PlayerInfo => self.apply_player_info(message),
            MessageKind::PlayerData => self.apply_player_data(message),
            MessageKind::PlayerJoined => self.apply_player_joined(message),
            MessageKind::PlayerLeft => self.apply_player_left(message),
            MessageKind::GameFlags => self.apply_game_flags(message),
            MessageKind::Join | MessageKind::Accepted | MessageKind::Application(_) => return false,
        };
        if let Err(e) = result {
            warn!(kind = ?message.kind(), source = message.source(), error = %e, "dropping malformed system message");
        }
        true
    }

    fn apply_player_info(&mut self, message: &Message) -> NetResult<()> {
        let mut r = MessageReader::begin(message);
        let id = player_id(r.u8()?.into())?;
        let allocated = r.bool()?;
        let name = r.string(MAX_NAME_LEN)?;
        let flags = PlayerFlags(r.u32()?);
        debug!(player = %id, allocated, %name, "player info");
        self.directory.update(id, allocated, &name, flags);
        if self.is_host() {
            self.broadcast_player_info(id)?;
        }
        Ok(())
    }

    fn apply_player_data(&mut self, message: &Message) -> NetResult<()> {
        let mut r = MessageReader::begin(message);
        let id = player_id(r.u32()?)?;
        let size = r.u16()?;
        let data = r.bin(size.into())?;
        self.directory.set_global_data(id, data);
        if self.is_host() {
            self.send_global_player_data(id)?;
        }
        Ok(())
    }

    fn apply_player_joined(&mut self, message: &Message) -> NetResult<()> {
        let id = player_id(MessageReader::begin(message).u8()?.into())?;
        debug!(player = %id, "player joined");
        self.hooks.on_join(id);
        Ok(())
    }

    fn apply_player_left(&mut self, message: &Message) -> NetResult<()> {
        let id = player_id(MessageReader::begin(message).u32()?)?;
        // The host learns departures from its own sockets only.
        if self.is_host() && (id == self.local_id || self.is_connected(id)) {
            warn!(player = %id, source = message.source(), "ignoring PLAYER_LEFT for a live participant");
            return Ok(());
        }
        debug!(player = %id, "player left");
        self.directory.release(id);
        self.hooks.on_leave(id);
        Ok(())
    }

    fn apply_game_flags(&mut self, message: &Message) -> NetResult<()> {
        let mut r = MessageReader::begin(message);
        let declared = usize::from(r.u8()?);
        if declared > GAME_FLAG_COUNT {
            warn!(declared, "game flag count above {GAME_FLAG_COUNT}, extra values ignored");
        }
        let mut flags = self.game_flags;
        for flag in flags.iter_mut().take(declared) {
            *flag = r.i32()?;
        }
        self.game_flags = flags;
        if self.is_host() {
            self.send_game_flags()?;
        }
        Ok(())
    }

    /// Broadcast `id`'s directory entry as PLAYER_INFO.
    pub fn broadcast_player_info(&mut self, id: PlayerId) -> NetResult<()> {
        if !self.is_networked() {
            return Ok(());
        }
        let entry = self.directory.entry(id);
        let message = player_info_message(id, entry.allocated, &entry.name, entry.flags)?;
        self.broadcast(message);
        Ok(())
    }

    /// Broadcast `id`'s global data blob as PLAYER_DATA.
    pub fn send_global_player_data(&mut self, id: PlayerId) -> NetResult<()> {
        if !self.is_networked() {
            return Ok(());
        }
        let message = player_data_message(id, self.directory.global_data(id))?;
        self.broadcast(message);
        Ok(())
    }

    pub fn send_game_flags(&mut self) -> NetResult<()> {
        if !self.is_networked() {
            return Ok(());
        }
        let message = game_flags_message(&self.game_flags)?;
        self.broadcast(message);
        Ok(())
    }

    /// Allocate a directory slot and announce it. `None` when full.
    pub fn create_player(&mut self, name: &str, flags: PlayerFlags) -> Option<PlayerId> {
        let id = self.directory.allocate(name, flags)?;
        if let Err(e) = self.broadcast_player_info(id) {
            warn!(player = %id, error = %e, "cannot announce new player");
        }
        Some(id)
    }

    pub fn rename_player(&mut self, id: PlayerId, name: &str) -> NetResult<()> {
        self.directory.rename(id, name)?;
        self.broadcast_player_info(id)
    }

    /// Replace `id`'s global data and replicate it. Offline sessions have
    /// nothing to replicate to, so the blob is stored as local data instead.
    pub fn set_global_data(&mut self, id: PlayerId, data: &[u8]) -> NetResult<()> {
        if data.len() > MAX_PLAYER_DATA {
            return Err(skirmish_protocol::CodecError::Overflow {
                needed: data.len(),
                available: MAX_PLAYER_DATA,
            }
            .into());
        }
        if !self.is_networked() {
            self.directory.set_local_data(id, data);
            return Ok(());
        }
        self.directory.set_global_data(id, data);
        self.send_global_player_data(id)?;
        self.broadcast_player_info(id)
    }

    /// Read one flag, numbered 1 through `GAME_FLAG_COUNT`. Out-of-range
    /// numbers read as 0.
    pub fn game_flag(&self, flag: usize) -> i32 {
        match flag.checked_sub(1) {
            Some(index) if index < GAME_FLAG_COUNT => self.game_flags[index],
            _ => 0,
        }
    }

    /// Set one flag, numbered 1 through `GAME_FLAG_COUNT`, and replicate the
    /// whole array. Returns false for an out-of-range flag number.
    pub fn set_game_flag(&mut self, flag: usize, value: i32) -> NetResult<bool> {
        let Some(index) = flag.checked_sub(1).filter(|i| *i < GAME_FLAG_COUNT) else {
            return Ok(false);
        };
        self.game_flags[index] = value;
        self.send_game_flags()?;
        Ok(true)
    }

    pub fn set_game_flags(&mut self, flags: [i32; GAME_FLAG_COUNT]) -> NetResult<()> {
        self.game_flags = flags;
        self.send_game_flags()
    }
}
