// Player directory: the per-session table of participants.
//
// A fixed arena of `MAX_CONNECTED_PLAYERS` slots indexed by `PlayerId`. Every
// peer keeps its own copy; the host's copy is authoritative and is pushed to
// joiners through PLAYER_INFO and PLAYER_DATA broadcasts, which land here via
// `update` and `set_global_data`.
//
// Slot 0 is reserved for the host and is only ever filled by `install`;
// `allocate` hands out the lowest free id from 1 upward. Releasing a slot
// clears the allocated flag only. The stale name and flags stay until the
// slot is reused, matching what peers saw last.
//
// Each slot carries two opaque blobs: local data (never leaves this process)
// and global data (replicated by the host). Writing an empty blob frees it.

use serde::Serialize;
use skirmish_protocol::{MAX_CONNECTED_PLAYERS, MAX_NAME_LEN, PlayerFlags, PlayerId};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("player id {0} is out of range")]
    OutOfRange(u32),
    #[error("player {0} is not in the session")]
    NotAllocated(PlayerId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerEntry {
    pub allocated: bool,
    pub name: String,
    pub flags: PlayerFlags,
}

/// Roster line handed to the application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    pub is_spectator: bool,
}

#[derive(Clone, Debug, Default)]
struct PlayerSlot {
    entry: PlayerEntry,
    local_data: Vec<u8>,
    global_data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct PlayerDirectory {
    slots: [PlayerSlot; MAX_CONNECTED_PLAYERS],
}

impl Default for PlayerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Names are stored bounded the same way the wire codec bounds them.
fn bounded_name(name: &str) -> String {
    let mut end = name.len().min(MAX_NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

/// Overwrite a blob in place; an empty write releases its storage.
fn overwrite(blob: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        *blob = Vec::new();
    } else {
        blob.clear();
        blob.extend_from_slice(data);
    }
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| PlayerSlot::default()),
        }
    }

    /// Claim the lowest free id from 1 upward. `None` when the table is full.
    pub fn allocate(&mut self, name: &str, flags: PlayerFlags) -> Option<PlayerId> {
        let id = PlayerId::all()
            .filter(|id| id.is_assignable())
            .find(|id| !self.slots[id.index()].entry.allocated)?;
        self.install(id, name, flags);
        Some(id)
    }

    /// Fill a specific slot: the host's reserved entry, or a joiner's own
    /// entry once the host has told it its id.
    pub fn install(&mut self, id: PlayerId, name: &str, flags: PlayerFlags) {
        let entry = &mut self.slots[id.index()].entry;
        entry.allocated = true;
        entry.name = bounded_name(name);
        entry.flags = flags;
    }

    /// Apply a replicated PLAYER_INFO record verbatim.
    pub fn update(&mut self, id: PlayerId, allocated: bool, name: &str, flags: PlayerFlags) {
        let entry = &mut self.slots[id.index()].entry;
        entry.allocated = allocated;
        entry.name = bounded_name(name);
        entry.flags = flags;
    }

    pub fn release(&mut self, id: PlayerId) {
        self.slots[id.index()].entry.allocated = false;
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Slot contents regardless of allocation; used when replicating.
    pub fn entry(&self, id: PlayerId) -> &PlayerEntry {
        &self.slots[id.index()].entry
    }

    pub fn get(&self, id: PlayerId) -> Result<&PlayerEntry, DirectoryError> {
        let entry = self.entry(id);
        if entry.allocated {
            Ok(entry)
        } else {
            Err(DirectoryError::NotAllocated(id))
        }
    }

    pub fn is_allocated(&self, id: PlayerId) -> bool {
        self.entry(id).allocated
    }

    pub fn rename(&mut self, id: PlayerId, name: &str) -> Result<(), DirectoryError> {
        if !self.is_allocated(id) {
            return Err(DirectoryError::NotAllocated(id));
        }
        self.slots[id.index()].entry.name = bounded_name(name);
        Ok(())
    }

    pub fn local_data(&self, id: PlayerId) -> &[u8] {
        &self.slots[id.index()].local_data
    }

    pub fn set_local_data(&mut self, id: PlayerId, data: &[u8]) {
        overwrite(&mut self.slots[id.index()].local_data, data);
    }

    pub fn global_data(&self, id: PlayerId) -> &[u8] {
        &self.slots[id.index()].global_data
    }

    pub fn set_global_data(&mut self, id: PlayerId, data: &[u8]) {
        overwrite(&mut self.slots[id.index()].global_data, data);
    }

    /// Allocated ids in table order.
    pub fn allocated(&self) -> impl Iterator<Item = PlayerId> + '_ {
        PlayerId::all().filter(|id| self.is_allocated(*id))
    }

    pub fn count(&self) -> usize {
        self.allocated().count()
    }

    pub fn roster(&self) -> Vec<PlayerInfo> {
        self.allocated()
            .map(|id| {
                let entry = self.entry(id);
                PlayerInfo {
                    id,
                    name: entry.name.clone(),
                    is_host: entry.flags.contains(PlayerFlags::HOST),
                    is_spectator: entry.flags.contains(PlayerFlags::SPECTATOR),
                }
            })
            .collect()
    }
}
