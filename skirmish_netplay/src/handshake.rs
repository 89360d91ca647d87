// Join handshake, both sides.
//
// Host (`NetSession::service_joiners`, once per `recv` tick while joining is
// allowed). For each `JoinRequest` the discovery listener hands over:
//   1. allocate a directory slot for the carried name (PLAYER_INFO goes out
//      to the already-connected peers),
//   2. promote the transient socket into the router's connection table,
//   3. bump the advertised player count,
//   4. send ACCEPTED with the new id to the newcomer only,
//   5. fire `on_join`,
//   6. send the newcomer a PLAYER_JOINED for every existing participant,
//   7. broadcast PLAYER_JOINED for the newcomer,
//   8. broadcast PLAYER_INFO for every slot so all rosters converge,
//   9. deregister from the master server so the next ticks re-register with
//      the new count.
// A full session answers with an ACCEPTED carrying an id outside the table.
//
// Client (`NetSession::join_game`). A short blocking exchange with explicit
// timeouts: connect, send `"join\0"`, read the descriptor, send JOIN, then
// pump the new router until ACCEPTED arrives. Anything delivered in the same
// reads after ACCEPTED stays buffered for the application's `recv`.

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use skirmish_protocol::descriptor::DESCRIPTOR_RECORD_LEN;
use skirmish_protocol::{BROADCAST, DiscoveryCommand, MessageKind, MessageReader, PlayerFlags, PlayerId, SessionDescriptor};
use tracing::{debug, info, warn};

use crate::config::NetConfig;
use crate::discovery::{JoinRequest, read_exact_within, resolve};
use crate::error::{NetError, NetResult};
use crate::hooks::SessionHooks;
use crate::router::Router;
use crate::session::NetSession;
use crate::system::{accepted_message, join_message, player_joined_message};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Progress of a client's join attempt, reported in errors and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientJoinState {
    Connected,
    SentJoin,
    WaitingAccept,
    Accepted,
    Rejected,
}

impl NetSession {
    /// Connect to the host at `host` (on the configured game port) as
    /// `player_name`. Each blocking step waits at most `timeout`.
    pub fn join_game(
        config: NetConfig,
        host: &str,
        player_name: &str,
        hooks: Box<dyn SessionHooks>,
        timeout: Duration,
    ) -> NetResult<Self> {
        let addr = resolve(host, config.gameserver_port)?;
        let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let mut state = ClientJoinState::Connected;
        debug!(%addr, ?state, "connected to host");

        stream.write_all(&DiscoveryCommand::Join.bytes())?;
        let mut record = [0u8; DESCRIPTOR_RECORD_LEN];
        read_exact_within(&mut stream, &mut record, "session descriptor")?;
        let mut descriptor = SessionDescriptor::decode(&record)?;
        if descriptor.host.is_empty() {
            descriptor.host = addr.ip().to_string();
        }

        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nonblocking(true)?;
        let mut router = Router::client(stream, hooks, config.send_timeout());
        if !router.send(join_message(player_name)?, PlayerId::HOST) {
            return Err(NetError::Disconnected);
        }
        state = ClientJoinState::SentJoin;
        debug!(?state, name = player_name, "join requested");

        state = ClientJoinState::WaitingAccept;
        let deadline = Instant::now() + timeout;
        let id = loop {
            if let Some(message) = router.recv() {
                if message.kind() != MessageKind::Accepted {
                    debug!(?state, kind = ?message.kind(), "ignoring message before acceptance");
                    continue;
                }
                let raw = MessageReader::begin(&message).u8()?;
                match PlayerId::new(raw).filter(|id| id.is_assignable()) {
                    Some(id) => break id,
                    None => {
                        state = ClientJoinState::Rejected;
                        warn!(?state, raw, "host assigned an invalid player id");
                        return Err(NetError::JoinRejected(format!("host assigned invalid player id {raw}")));
                    }
                }
            }
            if !router.is_connected(PlayerId::HOST) {
                return Err(NetError::Disconnected);
            }
            if Instant::now() >= deadline {
                return Err(NetError::Timeout("join acceptance"));
            }
            thread::sleep(ACCEPT_POLL_INTERVAL);
        };

        router.set_local_id(id);
        router.directory.install(id, player_name, PlayerFlags::NONE);
        state = ClientJoinState::Accepted;
        info!(?state, player = %id, session = %descriptor.name, host = %descriptor.host, "joined session");
        Ok(Self::from_parts(config, router, descriptor, None))
    }

    /// Host tick: keep the master registration current and admit joiners.
    pub(crate) fn service_joiners(&mut self) {
        self.master.advance(&self.descriptor, self.config.send_timeout());
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let requests = listener.poll(
            &self.descriptor,
            self.config.transient_timeout(),
            self.config.send_timeout(),
        );
        for request in requests {
            self.admit(request);
        }
    }

    fn admit(&mut self, request: JoinRequest) {
        let JoinRequest { mut socket, name, peer } = request;
        debug!(%peer, %name, "join received");

        let full = self.descriptor.current_players >= self.descriptor.max_players;
        let id = if full { None } else { self.router.create_player(&name, PlayerFlags::NONE) };
        let Some(id) = id else {
            warn!(%peer, %name, "session full, rejecting joiner");
            match accepted_message(BROADCAST) {
                Ok(mut rejection) => {
                    rejection.set_route(BROADCAST, PlayerId::HOST.get());
                    if let Err(e) = socket.send_frame(&rejection.to_frame(), self.config.send_timeout()) {
                        debug!(%peer, error = %e, "rejection not delivered");
                    }
                }
                Err(e) => warn!(error = %e, "cannot encode rejection"),
            }
            return;
        };

        self.router.attach(id, socket);
        self.descriptor.current_players += 1;
        match accepted_message(id.get()) {
            Ok(accepted) => {
                self.router.send(accepted, id);
            }
            Err(e) => warn!(error = %e, "cannot encode ACCEPTED"),
        }
        self.router.notify_join(id);

        let existing: Vec<PlayerId> = self.router.directory().allocated().filter(|other| *other != id).collect();
        for other in existing {
            if let Ok(notice) = player_joined_message(other) {
                self.router.send(notice, id);
            }
        }
        if let Ok(notice) = player_joined_message(id) {
            self.router.broadcast(notice);
        }
        for slot in PlayerId::all() {
            if let Err(e) = self.router.broadcast_player_info(slot) {
                warn!(player = %slot, error = %e, "cannot resync player info");
            }
        }

        self.master.deregister();
        info!(player = %id, %name, %peer, players = self.descriptor.current_players, "player joined");
    }
}
