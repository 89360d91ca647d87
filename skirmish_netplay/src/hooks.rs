// Application callbacks fired when participants enter or leave.
//
// The session owns its hooks as `Box<dyn SessionHooks>` and calls them from
// inside `recv` (and on the host, from the join handshake). They run on the
// caller's thread; `Send` is required only so a whole session can move
// between threads.

use std::sync::{Arc, Mutex, PoisonError};

use skirmish_protocol::PlayerId;

pub trait SessionHooks: Send {
    fn on_join(&mut self, _player: PlayerId) {}
    fn on_leave(&mut self, _player: PlayerId) {}
}

/// Hooks that ignore every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
    Joined(PlayerId),
    Left(PlayerId),
}

/// Hooks that log every event into a shared list. Clone one copy into the
/// session and read the other, e.g. from tests or a monitoring tool.
#[derive(Clone, Debug, Default)]
pub struct HookRecorder {
    events: Arc<Mutex<Vec<HookEvent>>>,
}

impl HookRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, event: HookEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

impl SessionHooks for HookRecorder {
    fn on_join(&mut self, player: PlayerId) {
        self.push(HookEvent::Joined(player));
    }

    fn on_leave(&mut self, player: PlayerId) {
        self.push(HookEvent::Left(player));
    }
}
