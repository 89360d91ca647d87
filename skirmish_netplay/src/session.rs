// NetSession: the application-facing service object.
//
// One `NetSession` is one participant's view of one game session. It is
// created in exactly one of three ways:
// - `NetSession::offline`  local play; every networked call is answered
//                          locally,
// - `NetSession::host`     listen for joiners and relay for them,
// - `NetSession::join_game` (in `handshake.rs`) connect to a host.
//
// The caller's game loop drives everything by calling `recv` once or more
// per tick. On a host that tick also services the discovery listener and
// admits joiners. Nothing runs in the background.

use std::net::{SocketAddr, TcpStream};

use skirmish_protocol::{BROADCAST, MAX_CONNECTED_PLAYERS, Message, PlayerFlags, PlayerId, SessionDescriptor};
use tracing::{debug, info};

use crate::config::NetConfig;
use crate::directory::PlayerInfo;
use crate::discovery::{DiscoveryListener, MasterLink, Registration};
use crate::error::{NetError, NetResult};
use crate::file_transfer::{FileReceiver, FileSender, FsStorage};
use crate::hooks::SessionHooks;
use crate::router::{GAME_FLAG_COUNT, Role, Router};
use crate::stats::TrafficStats;

pub struct NetSession {
    pub(crate) config: NetConfig,
    pub(crate) router: Router<TcpStream>,
    pub(crate) descriptor: SessionDescriptor,
    pub(crate) listener: Option<DiscoveryListener>,
    pub(crate) allow_joining: bool,
    pub(crate) master: MasterLink,
    storage: FsStorage,
    file_sender: FileSender<FsStorage>,
    file_receiver: FileReceiver<FsStorage>,
}

impl NetSession {
    pub(crate) fn from_parts(
        config: NetConfig,
        router: Router<TcpStream>,
        descriptor: SessionDescriptor,
        listener: Option<DiscoveryListener>,
    ) -> Self {
        let storage = FsStorage::new(config.storage_root.clone());
        Self {
            config,
            router,
            descriptor,
            allow_joining: listener.is_some(),
            listener,
            master: MasterLink::new(),
            storage,
            file_sender: FileSender::new(),
            file_receiver: FileReceiver::new(),
        }
    }

    /// A session with no networking. The local player is the host.
    pub fn offline(config: NetConfig, player_name: &str, hooks: Box<dyn SessionHooks>) -> Self {
        let mut router = Router::offline(hooks);
        router.directory.install(PlayerId::HOST, player_name, PlayerFlags::HOST);
        let descriptor = SessionDescriptor::new("", 1, [0; 4]);
        Self::from_parts(config, router, descriptor, None)
    }

    /// Start hosting: bind the game port, resolve the master server, take the
    /// reserved host slot and begin accepting joiners. Registration with the
    /// master server is driven by `recv` and never blocks it.
    pub fn host(
        config: NetConfig,
        session_name: &str,
        player_name: &str,
        user_flags: [i32; 4],
        max_players: u32,
        hooks: Box<dyn SessionHooks>,
    ) -> NetResult<Self> {
        let listener = DiscoveryListener::bind(config.gameserver_port)?;
        let mut router = Router::host(hooks, config.send_timeout());
        router.directory.install(PlayerId::HOST, player_name, PlayerFlags::HOST);
        router.notify_join(PlayerId::HOST);
        let max_players = max_players.clamp(1, MAX_CONNECTED_PLAYERS as u32);
        let descriptor = SessionDescriptor::new(session_name, max_players, user_flags);
        info!(
            session = session_name,
            addr = ?listener.local_addr().ok(),
            max_players,
            "hosting session"
        );
        let master = MasterLink::for_host(&config);
        let mut session = Self::from_parts(config, router, descriptor, Some(listener));
        session.master = master;
        Ok(session)
    }

    /// Next application message, if any. Call every tick.
    pub fn recv(&mut self) -> Option<Message> {
        if self.router.is_host() && self.allow_joining {
            self.service_joiners();
        }
        let message = self.router.recv();
        let departed = self.router.take_departures();
        if !departed.is_empty() {
            let left = u32::try_from(departed.len()).unwrap_or(u32::MAX);
            self.descriptor.current_players = self.descriptor.current_players.saturating_sub(left);
            // Re-register on the next tick so the master lists the new count.
            self.master.deregister();
        }
        message
    }

    /// Send to one player. A host cannot address itself; that returns false.
    pub fn send(&mut self, message: Message, to: PlayerId) -> bool {
        self.router.send(message, to)
    }

    pub fn broadcast(&mut self, message: Message) -> bool {
        self.router.broadcast(message)
    }

    pub fn role(&self) -> Role {
        self.router.role()
    }

    pub fn is_host(&self) -> bool {
        self.router.is_host()
    }

    pub fn local_id(&self) -> PlayerId {
        self.router.local_id()
    }

    /// Host: always true. Client: false once the host connection is lost.
    pub fn is_connected(&self) -> bool {
        match self.router.role() {
            Role::Client => self.router.is_connected(PlayerId::HOST),
            Role::Host | Role::Offline => true,
        }
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Address the host listens on for discovery and joiners.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn registration(&self) -> Registration {
        self.master.state()
    }

    pub fn stats_mut(&mut self) -> &mut TrafficStats {
        self.router.stats_mut()
    }

    pub fn player_info(&self) -> Vec<PlayerInfo> {
        self.router.directory().roster()
    }

    pub fn change_player_name(&mut self, id: PlayerId, name: &str) -> NetResult<()> {
        self.router.rename_player(id, name)
    }

    pub fn local_player_data(&self, id: PlayerId) -> &[u8] {
        self.router.directory().local_data(id)
    }

    pub fn set_local_player_data(&mut self, id: PlayerId, data: &[u8]) {
        self.router.directory.set_local_data(id, data);
    }

    /// Offline sessions keep "global" data in the local blob.
    pub fn global_player_data(&self, id: PlayerId) -> &[u8] {
        let directory = self.router.directory();
        if self.router.is_networked() {
            directory.global_data(id)
        } else {
            directory.local_data(id)
        }
    }

    pub fn set_global_player_data(&mut self, id: PlayerId, data: &[u8]) -> NetResult<()> {
        self.router.set_global_data(id, data)
    }

    pub fn game_flag(&self, flag: usize) -> i32 {
        self.router.game_flag(flag)
    }

    pub fn game_flags(&self) -> [i32; GAME_FLAG_COUNT] {
        self.router.game_flags()
    }

    pub fn set_game_flag(&mut self, flag: usize, value: i32) -> NetResult<bool> {
        self.router.set_game_flag(flag, value)
    }

    pub fn set_game_flags(&mut self, flags: [i32; GAME_FLAG_COUNT]) -> NetResult<()> {
        self.router.set_game_flags(flags)
    }

    /// Stop admitting joiners and leave the master server's list.
    pub fn halt_joining(&mut self) {
        debug!("joining halted");
        self.allow_joining = false;
        if let Some(listener) = self.listener.as_mut() {
            listener.clear();
        }
        self.master.deregister();
    }

    /// Tear the session down: no listener, no connections, empty directory.
    pub fn close(&mut self) {
        self.halt_joining();
        self.listener = None;
        self.router.close_all();
        self.router.directory.clear();
        self.file_sender = FileSender::new();
        self.file_receiver = FileReceiver::new();
        info!("session closed");
    }

    /// Send the next chunk of `name` to `to` (every peer when `None`),
    /// opening the file first when `new_file` is set. Returns the progress
    /// percentage after this chunk.
    pub fn send_file(&mut self, new_file: bool, name: &str, to: Option<PlayerId>) -> NetResult<u8> {
        let destination = to.map_or(BROADCAST, PlayerId::get);
        let (chunk, progress) = self.file_sender.next_chunk(&self.storage, new_file, name, destination)?;
        let sent = match to {
            Some(id) => self.router.send(chunk, id),
            None => self.router.broadcast(chunk),
        };
        if !sent {
            return Err(NetError::Disconnected);
        }
        Ok(progress)
    }

    /// Apply a received FILE_MSG chunk. Returns the progress percentage.
    pub fn recv_file(&mut self, message: &Message) -> NetResult<u8> {
        self.file_receiver.accept_chunk(&self.storage, message)
    }
}
