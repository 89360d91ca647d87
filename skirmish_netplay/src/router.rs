// Message router: send, broadcast, and the host's relay-and-receive loop.
//
// A `Router` plays one of three roles:
// - **Host**: owns one `BufferedSocket` per connected joiner, indexed by the
//   joiner's `PlayerId`. Everything a joiner sends arrives here first. The
//   host forwards it (broadcasts fan out to everyone but the sender,
//   point-to-point frames go to their addressee) and only surfaces messages
//   meant for itself.
// - **Client**: owns one upstream socket to the host. All sends go up; all
//   receives come down already routed, so nothing is forwarded.
// - **Offline**: no sockets. Sends succeed trivially and nothing arrives.
//
// `recv` services at most one message per call from the sockets' point of
// view, but loops internally past system messages, which are applied to the
// replicated state (see `system.rs`) and never returned.
//
// Fairness: each host scan starts at the slot after the one that produced the
// previous message and visits every slot once, so a chatty peer cannot starve
// the others. A connection found dead during the scan is dropped and turned
// into a synthesized PLAYER_LEFT broadcast, a directory release and an
// `on_leave` hook, in that order.

use std::time::Duration;

use skirmish_protocol::{BROADCAST, Destination, MAX_CONNECTED_PLAYERS, Message, PlayerId};
use tracing::{debug, info, warn};

use crate::buffered::BufferedSocket;
use crate::directory::PlayerDirectory;
use crate::hooks::SessionHooks;
use crate::poll_set::PollSet;
use crate::stats::{PacketDirection, TrafficStats, log_packet};
use crate::system::player_left_message;
use crate::transport::Transport;

/// Number of session-wide game flags.
pub const GAME_FLAG_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Offline,
    Host,
    Client,
}

pub struct Router<T: Transport> {
    pub(crate) role: Role,
    pub(crate) local_id: PlayerId,
    /// Host only: joiner sockets indexed by player id.
    connections: [Option<BufferedSocket<T>>; MAX_CONNECTED_PLAYERS],
    /// Client only: the socket to the host.
    upstream: Option<BufferedSocket<T>>,
    poll_set: PollSet,
    /// Slot that produced the last message; the next scan starts after it.
    current: usize,
    pub(crate) directory: PlayerDirectory,
    pub(crate) game_flags: [i32; GAME_FLAG_COUNT],
    pub(crate) hooks: Box<dyn SessionHooks>,
    pub(crate) stats: TrafficStats,
    /// Players dropped since the last `take_departures`.
    departures: Vec<PlayerId>,
    send_timeout: Duration,
}

impl<T: Transport> Router<T> {
    fn with_role(role: Role, hooks: Box<dyn SessionHooks>, send_timeout: Duration) -> Self {
        Self {
            role,
            local_id: PlayerId::HOST,
            connections: std::array::from_fn(|_| None),
            upstream: None,
            poll_set: PollSet::with_capacity(MAX_CONNECTED_PLAYERS),
            current: 0,
            directory: PlayerDirectory::new(),
            game_flags: [0; GAME_FLAG_COUNT],
            hooks,
            stats: TrafficStats::new(),
            departures: Vec::new(),
            send_timeout,
        }
    }

    pub fn offline(hooks: Box<dyn SessionHooks>) -> Self {
        Self::with_role(Role::Offline, hooks, Duration::ZERO)
    }

    /// Host router. The host always occupies `PlayerId::HOST`.
    pub fn host(hooks: Box<dyn SessionHooks>, send_timeout: Duration) -> Self {
        Self::with_role(Role::Host, hooks, send_timeout)
    }

    /// Client router over an established upstream. The local id stays
    /// unset until the host's ACCEPTED arrives (`set_local_id`).
    pub fn client(upstream: T, hooks: Box<dyn SessionHooks>, send_timeout: Duration) -> Self {
        let mut router = Self::with_role(Role::Client, hooks, send_timeout);
        router.poll_set.add(0, upstream.poll_handle());
        router.upstream = Some(BufferedSocket::new(upstream));
        router
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn is_networked(&self) -> bool {
        self.role != Role::Offline
    }

    pub fn local_id(&self) -> PlayerId {
        self.local_id
    }

    pub(crate) fn set_local_id(&mut self, id: PlayerId) {
        self.local_id = id;
    }

    pub fn directory(&self) -> &PlayerDirectory {
        &self.directory
    }

    pub fn game_flags(&self) -> [i32; GAME_FLAG_COUNT] {
        self.game_flags
    }

    pub fn stats_mut(&mut self) -> &mut TrafficStats {
        &mut self.stats
    }

    /// Host: is there a live socket for `id`? Client: is the upstream alive?
    pub fn is_connected(&self, id: PlayerId) -> bool {
        match self.role {
            Role::Host => self.connections[id.index()].as_ref().is_some_and(|c| !c.is_closed()),
            Role::Client => self.upstream.as_ref().is_some_and(|c| !c.is_closed()),
            Role::Offline => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        match self.role {
            Role::Host => self.connections.iter().flatten().count(),
            Role::Client => usize::from(self.upstream.is_some()),
            Role::Offline => 0,
        }
    }

    pub fn take_departures(&mut self) -> Vec<PlayerId> {
        std::mem::take(&mut self.departures)
    }

    /// Host: adopt a joiner's socket under its freshly allocated id.
    pub(crate) fn attach(&mut self, id: PlayerId, socket: BufferedSocket<T>) {
        let handle = socket.socket().and_then(Transport::poll_handle);
        self.poll_set.add(id.index(), handle);
        self.connections[id.index()] = Some(socket);
    }

    pub(crate) fn notify_join(&mut self, id: PlayerId) {
        self.hooks.on_join(id);
    }

    /// Drop every socket without synthesizing departures.
    pub fn close_all(&mut self) {
        self.connections = std::array::from_fn(|_| None);
        self.upstream = None;
        self.poll_set.clear();
    }

    /// Send `message` to one player. Offline sends succeed without effect.
    /// A host has no connection to itself, so a host addressing its own id
    /// gets `false` and nothing is sent.
    pub fn send(&mut self, mut message: Message, to: PlayerId) -> bool {
        let sent = match self.role {
            Role::Offline => return true,
            Role::Host if to == self.local_id => {
                debug!(kind = ?message.kind(), "host cannot send to itself, message dropped");
                return false;
            }
            Role::Host => {
                message.set_route(to.get(), self.local_id.get());
                self.send_to_slot(to.index(), &message.to_frame())
            }
            Role::Client => {
                message.set_route(to.get(), self.local_id.get());
                self.send_upstream(&message.to_frame())
            }
        };
        if sent {
            log_packet(PacketDirection::Sent, &message);
            self.stats.record(PacketDirection::Sent, message.frame_len());
        }
        sent
    }

    /// Send `message` to every other participant.
    pub fn broadcast(&mut self, mut message: Message) -> bool {
        message.set_route(BROADCAST, self.local_id.get());
        let frame = message.to_frame();
        let sent = match self.role {
            Role::Offline => return true,
            Role::Host => {
                for slot in 0..MAX_CONNECTED_PLAYERS {
                    if self.connections[slot].is_some() {
                        self.send_to_slot(slot, &frame);
                    }
                }
                true
            }
            Role::Client => self.send_upstream(&frame),
        };
        if sent {
            log_packet(PacketDirection::Sent, &message);
            self.stats.record(PacketDirection::Sent, frame.len());
        }
        sent
    }

    /// Next application message, if any. Relays and system messages are
    /// handled on the way.
    pub fn recv(&mut self) -> Option<Message> {
        loop {
            let message = match self.role {
                Role::Offline => return None,
                Role::Host => {
                    let (message, slot) = self.next_host_message()?;
                    if !self.relay(&message, slot) {
                        continue;
                    }
                    message
                }
                Role::Client => self.next_upstream_message()?,
            };
            self.stats.record(PacketDirection::Received, message.frame_len());
            if self.process_system_message(&message) {
                continue;
            }
            log_packet(PacketDirection::Received, &message);
            return Some(message);
        }
    }

    fn send_to_slot(&mut self, slot: usize, frame: &[u8]) -> bool {
        let timeout = self.send_timeout;
        let Some(conn) = self.connections.get_mut(slot).and_then(Option::as_mut) else {
            return false;
        };
        match conn.send_frame(frame, timeout) {
            Ok(()) => true,
            Err(e) => {
                warn!(slot, error = %e, "send failed, connection marked dead");
                false
            }
        }
    }

    fn send_upstream(&mut self, frame: &[u8]) -> bool {
        let timeout = self.send_timeout;
        let Some(conn) = self.upstream.as_mut() else {
            return false;
        };
        match conn.send_frame(frame, timeout) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send to host failed");
                false
            }
        }
    }

    /// One fair pass over the host's connections.
    fn next_host_message(&mut self) -> Option<(Message, usize)> {
        if let Err(e) = self.poll_set.check(Duration::ZERO) {
            warn!(error = %e, "readiness poll failed");
        }
        for step in 1..=MAX_CONNECTED_PLAYERS {
            let slot = (self.current + step) % MAX_CONNECTED_PLAYERS;
            let ready = self.poll_set.is_ready(slot);
            let Some(conn) = self.connections[slot].as_mut() else {
                continue;
            };
            let mut message = conn.extract_message();
            if message.is_none() && ready && conn.fill() {
                message = conn.extract_message();
            }
            match message {
                Some(message) => {
                    self.current = slot;
                    return Some((message, slot));
                }
                None if conn.is_closed() => self.drop_connection(slot),
                None => {}
            }
        }
        None
    }

    fn next_upstream_message(&mut self) -> Option<Message> {
        let ready = match self.poll_set.check(Duration::ZERO) {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(error = %e, "readiness poll failed");
                true
            }
        };
        let conn = self.upstream.as_mut()?;
        if let Some(message) = conn.extract_message() {
            return Some(message);
        }
        if ready && conn.fill() {
            return conn.extract_message();
        }
        None
    }

    /// Forward a joiner's message. Returns true if the host itself should
    /// also see it.
    fn relay(&mut self, message: &Message, from: usize) -> bool {
        match message.destination() {
            Some(Destination::Broadcast) => {
                let frame = message.to_frame();
                for slot in 0..MAX_CONNECTED_PLAYERS {
                    if slot != from && self.connections[slot].is_some() {
                        self.send_to_slot(slot, &frame);
                    }
                }
                true
            }
            Some(Destination::Player(id)) if id == self.local_id => true,
            Some(Destination::Player(id)) => {
                if !self.send_to_slot(id.index(), &message.to_frame()) {
                    debug!(from, to = %id, "cannot relay, addressee not connected");
                }
                false
            }
            None => {
                warn!(from, destination = message.destination_byte(), "dropping message with invalid destination");
                false
            }
        }
    }

    /// Tear down a dead joiner and tell everyone else.
    fn drop_connection(&mut self, slot: usize) {
        self.connections[slot] = None;
        self.poll_set.remove(slot);
        let Some(id) = u8::try_from(slot).ok().and_then(PlayerId::new) else {
            return;
        };
        info!(player = %id, "connection lost");
        match player_left_message(id) {
            Ok(message) => {
                self.broadcast(message);
            }
            Err(e) => warn!(error = %e, "cannot encode player-left notice"),
        }
        self.directory.release(id);
        self.hooks.on_leave(id);
        self.departures.push(id);
    }
}

#[cfg(test)]
mod tests {
    use skirmish_protocol::{MessageHeader, MessageKind, MessageReader, PlayerFlags};

    use super::*;
    use crate::hooks::{HookEvent, HookRecorder};
    use crate::transport::memory::MemoryTransport;

    fn id(raw: u8) -> PlayerId {
        PlayerId::new(raw).unwrap()
    }

    fn frame(code: u8, destination: u8, source: u8, payload: &[u8]) -> Vec<u8> {
        let mut message = Message::new(MessageKind::Application(code), destination, payload.to_vec()).unwrap();
        message.set_route(destination, source);
        message.to_frame()
    }

    fn parse_frames(mut bytes: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(header) = MessageHeader::decode(bytes) {
            let len = header.frame_len();
            out.push(Message::from_frame(&bytes[..len]).unwrap());
            bytes = &bytes[len..];
        }
        out
    }

    /// Host router with joiners attached at `slots`.
    fn host_with(slots: &[u8]) -> (Router<MemoryTransport>, Vec<MemoryTransport>, HookRecorder) {
        let hooks = HookRecorder::new();
        let mut router = Router::host(Box::new(hooks.clone()), Duration::from_millis(50));
        router.directory.install(PlayerId::HOST, "Host", PlayerFlags::HOST);
        let mut transports = Vec::new();
        for &slot in slots {
            let transport = MemoryTransport::new();
            router.directory.install(id(slot), &format!("p{slot}"), PlayerFlags::NONE);
            router.attach(id(slot), BufferedSocket::new(transport.clone()));
            transports.push(transport);
        }
        (router, transports, hooks)
    }

    #[test]
    fn broadcast_fans_out_to_everyone_but_sender() {
        let (mut router, t, _) = host_with(&[1, 2, 3]);
        let bytes = frame(100, BROADCAST, 1, b"hello all");
        t[0].push(&bytes);

        let got = router.recv().unwrap();
        assert_eq!(got.payload(), b"hello all");
        assert_eq!(got.source(), 1);
        assert!(t[0].take_written().is_empty());
        assert_eq!(t[1].take_written(), bytes);
        assert_eq!(t[2].take_written(), bytes);
    }

    #[test]
    fn point_to_point_is_relayed_verbatim_and_not_surfaced() {
        let (mut router, t, _) = host_with(&[1, 2, 3]);
        let bytes = frame(101, 3, 1, b"psst");
        t[0].push(&bytes);

        assert!(router.recv().is_none());
        assert_eq!(t[2].take_written(), bytes);
        assert!(t[1].take_written().is_empty());
        assert!(t[0].take_written().is_empty());
    }

    #[test]
    fn relay_to_missing_addressee_is_dropped() {
        let (mut router, t, _) = host_with(&[1]);
        t[0].push(&frame(101, 6, 1, b"nobody home"));
        assert!(router.recv().is_none());
        assert!(t[0].take_written().is_empty());
    }

    #[test]
    fn scan_serves_each_ready_connection_before_repeating() {
        let (mut router, t, _) = host_with(&[1, 2, 3, 4]);
        for (i, transport) in t.iter().enumerate() {
            let source = i as u8 + 1;
            for _ in 0..3 {
                transport.push(&frame(102, 0, source, &[source]));
            }
        }

        let mut sources: Vec<u8> = (0..4).map(|_| router.recv().unwrap().source()).collect();
        sources.sort_unstable();
        assert_eq!(sources, vec![1, 2, 3, 4]);
        assert_eq!(router.recv().unwrap().source(), 1);
    }

    #[test]
    fn dead_connection_synthesizes_player_left() {
        let (mut router, t, hooks) = host_with(&[1, 2]);
        t[1].close();

        assert!(router.recv().is_none());
        assert_eq!(hooks.events(), vec![HookEvent::Left(id(2))]);
        assert!(!router.directory().is_allocated(id(2)));
        assert_eq!(router.take_departures(), vec![id(2)]);
        assert_eq!(router.connection_count(), 1);

        let notices = parse_frames(&t[0].take_written());
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind(), MessageKind::PlayerLeft);
        assert!(notices[0].is_broadcast());
        assert_eq!(MessageReader::begin(&notices[0]).u32().unwrap(), 2);
    }

    #[test]
    fn buffered_messages_are_delivered_before_disconnect() {
        let (mut router, t, hooks) = host_with(&[1]);
        t[0].push(&frame(103, 0, 1, b"bye"));
        t[0].close();

        assert_eq!(router.recv().unwrap().payload(), b"bye");
        assert!(hooks.events().is_empty());
        assert!(router.recv().is_none());
        assert_eq!(hooks.events(), vec![HookEvent::Left(id(1))]);
    }

    #[test]
    fn invalid_destination_is_dropped() {
        let (mut router, t, _) = host_with(&[1, 2]);
        t[0].push(&frame(104, 200, 1, b"?"));
        assert!(router.recv().is_none());
        assert!(t[1].take_written().is_empty());
    }

    #[test]
    fn host_send_and_broadcast_stamp_route() {
        let (mut router, t, _) = host_with(&[1, 2]);
        let msg = Message::new(MessageKind::Application(110), 0, b"direct".to_vec()).unwrap();
        assert!(router.send(msg, id(2)));
        let direct = parse_frames(&t[1].take_written());
        assert_eq!(direct[0].destination_byte(), 2);
        assert_eq!(direct[0].source(), 0);
        assert!(t[0].take_written().is_empty());

        let msg = Message::new(MessageKind::Application(111), 0, b"all".to_vec()).unwrap();
        assert!(router.broadcast(msg));
        assert_eq!(parse_frames(&t[0].take_written())[0].destination_byte(), BROADCAST);
        assert_eq!(parse_frames(&t[1].take_written()).len(), 1);
        assert!(router.stats_mut().total().packets_sent >= 2);
    }

    #[test]
    fn send_to_unconnected_player_fails() {
        let (mut router, _, _) = host_with(&[1]);
        let msg = Message::new(MessageKind::Application(110), 0, Vec::new()).unwrap();
        assert!(!router.send(msg, id(5)));
    }

    #[test]
    fn host_cannot_send_to_itself() {
        let (mut router, t, _) = host_with(&[1]);
        let msg = Message::new(MessageKind::Application(110), 0, b"me".to_vec()).unwrap();
        assert!(!router.send(msg, PlayerId::HOST));
        assert!(t[0].take_written().is_empty());
        assert_eq!(router.stats_mut().total().packets_sent, 0);
    }

    #[test]
    fn client_surfaces_everything_from_host_without_forwarding() {
        let upstream = MemoryTransport::new();
        let mut router = Router::client(upstream.clone(), Box::new(HookRecorder::new()), Duration::from_millis(50));
        router.set_local_id(id(2));
        upstream.push(&frame(120, 5, 1, b"not for me"));

        let got = router.recv().unwrap();
        assert_eq!(got.destination_byte(), 5);
        assert!(upstream.take_written().is_empty());

        let msg = Message::new(MessageKind::Application(121), 0, b"up".to_vec()).unwrap();
        assert!(router.send(msg, id(4)));
        let sent = parse_frames(&upstream.take_written());
        assert_eq!(sent[0].destination_byte(), 4);
        assert_eq!(sent[0].source(), 2);
    }

    #[test]
    fn client_notices_lost_upstream() {
        let upstream = MemoryTransport::new();
        let mut router = Router::client(upstream.clone(), Box::new(HookRecorder::new()), Duration::from_millis(50));
        assert!(router.is_connected(PlayerId::HOST));
        upstream.close();
        assert!(router.recv().is_none());
        assert!(!router.is_connected(PlayerId::HOST));
    }

    #[test]
    fn offline_router_is_inert() {
        let mut router: Router<MemoryTransport> = Router::offline(Box::new(HookRecorder::new()));
        let msg = Message::new(MessageKind::Application(1), 0, Vec::new()).unwrap();
        assert!(router.send(msg.clone(), id(3)));
        assert!(router.broadcast(msg));
        assert!(router.recv().is_none());
        assert_eq!(router.connection_count(), 0);
    }
}
