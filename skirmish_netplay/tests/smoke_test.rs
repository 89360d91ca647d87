// Integration smoke test for a hosted session.
//
// Starts a `NetSession` host on localhost and drives it with plain TCP
// sockets that speak the wire protocol by hand: discovery commands, the JOIN
// frame, and raw message frames. This pins the exact bytes and ordering a
// joiner sees, independent of the client half of this crate.
//
// The host is single-threaded and non-blocking, so every step is "write from
// the raw client, pump the host's `recv`, then read on the raw client".

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use skirmish_netplay::{HookEvent, HookRecorder, NetConfig, NetSession, find_games};
use skirmish_protocol::descriptor::DESCRIPTOR_RECORD_LEN;
use skirmish_protocol::{
    BROADCAST, DiscoveryCommand, HEADER_SIZE, MAX_NAME_LEN, Message, MessageHeader, MessageKind, MessageReader,
    MessageWriter, PlayerId, SessionDescriptor,
};

const DEADLINE: Duration = Duration::from_secs(5);

fn id(raw: u8) -> PlayerId {
    PlayerId::new(raw).unwrap()
}

fn start_host(max_players: u32) -> (NetSession, SocketAddr, HookRecorder) {
    let hooks = HookRecorder::new();
    let config = NetConfig {
        gameserver_port: 0,
        ..NetConfig::default()
    };
    let host = NetSession::host(config, "smoke-test", "Hana", [7, -3, 0, 42], max_players, Box::new(hooks.clone()))
        .unwrap();
    let port = host.local_addr().unwrap().port();
    (host, SocketAddr::from(([127, 0, 0, 1], port)), hooks)
}

/// Run host ticks until `done` holds, returning every application message
/// the host surfaced meanwhile.
fn pump_until(host: &mut NetSession, mut done: impl FnMut(&NetSession, &[Message]) -> bool) -> Vec<Message> {
    let deadline = Instant::now() + DEADLINE;
    let mut surfaced = Vec::new();
    loop {
        while let Some(message) = host.recv() {
            surfaced.push(message);
        }
        if done(host, &surfaced) {
            return surfaced;
        }
        assert!(Instant::now() < deadline, "host never reached the expected state");
        thread::sleep(Duration::from_millis(2));
    }
}

/// A joiner speaking the protocol by hand over a blocking socket.
struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(DEADLINE)).unwrap();
        Self { stream }
    }

    /// Send `"join\0"` and the JOIN frame in one write.
    fn request_join(&mut self, name: &str) {
        let mut join = MessageWriter::begin(MessageKind::Join, 0);
        join.string(name, MAX_NAME_LEN).unwrap();
        let mut bytes = DiscoveryCommand::Join.bytes().to_vec();
        bytes.extend(join.end().to_frame());
        self.stream.write_all(&bytes).unwrap();
    }

    fn read_descriptor(&mut self) -> SessionDescriptor {
        let mut record = [0u8; DESCRIPTOR_RECORD_LEN];
        self.stream.read_exact(&mut record).unwrap();
        SessionDescriptor::decode(&record).unwrap()
    }

    fn read_message(&mut self) -> Message {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).unwrap();
        let size = MessageHeader::decode(&header).unwrap().size as usize;
        let mut frame = header.to_vec();
        frame.resize(HEADER_SIZE + size, 0);
        self.stream.read_exact(&mut frame[HEADER_SIZE..]).unwrap();
        Message::from_frame(&frame).unwrap()
    }

    /// Skip messages until one of `kind` arrives.
    fn read_until(&mut self, kind: MessageKind) -> Message {
        loop {
            let message = self.read_message();
            if message.kind() == kind {
                return message;
            }
        }
    }

    fn send(&mut self, kind: MessageKind, destination: u8, source: u8, payload: &[u8]) {
        let mut message = Message::new(kind, destination, payload.to_vec()).unwrap();
        message.set_route(destination, source);
        self.stream.write_all(&message.to_frame()).unwrap();
    }
}

/// Join by hand and consume the handshake traffic up to and including the
/// PLAYER_JOINED notices. Returns the peer and the notice ids in order.
fn join_raw(host: &mut NetSession, addr: SocketAddr, name: &str) -> (RawPeer, PlayerId, Vec<PlayerId>) {
    let before = host.player_info().len();
    let mut peer = RawPeer::connect(addr);
    peer.request_join(name);
    pump_until(host, |h, _| h.player_info().len() == before + 1);

    let descriptor = peer.read_descriptor();
    assert_eq!(descriptor.name, "smoke-test");

    let accepted = peer.read_message();
    assert_eq!(accepted.kind(), MessageKind::Accepted);
    let assigned = id(MessageReader::begin(&accepted).u8().unwrap());

    // One notice per existing participant, then the newcomer's own broadcast.
    let mut notices = Vec::new();
    for _ in 0..=before {
        let notice = peer.read_message();
        assert_eq!(notice.kind(), MessageKind::PlayerJoined);
        notices.push(id(MessageReader::begin(&notice).u8().unwrap()));
    }
    (peer, assigned, notices)
}

#[test]
fn handshake_assigns_ids_and_announces_everyone() {
    let (mut host, addr, hooks) = start_host(4);

    let (_alice, alice_id, alice_notices) = join_raw(&mut host, addr, "Alice");
    assert_eq!(alice_id, id(1));
    assert_eq!(alice_notices, vec![PlayerId::HOST, id(1)]);

    let (_bob, bob_id, bob_notices) = join_raw(&mut host, addr, "Bob");
    assert_eq!(bob_id, id(2));
    assert_eq!(bob_notices, vec![PlayerId::HOST, id(1), id(2)]);

    let names: Vec<String> = host.player_info().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Hana", "Alice", "Bob"]);
    assert_eq!(host.descriptor().current_players, 3);
    assert_eq!(
        hooks.events(),
        vec![HookEvent::Joined(PlayerId::HOST), HookEvent::Joined(id(1)), HookEvent::Joined(id(2))]
    );
}

#[test]
fn roster_resync_reaches_joiner() {
    let (mut host, addr, _) = start_host(4);
    let (mut alice, _, _) = join_raw(&mut host, addr, "Alice");

    // Eight PLAYER_INFO records follow, one per slot.
    let mut allocated = Vec::new();
    for slot in PlayerId::all() {
        let info = alice.read_message();
        assert_eq!(info.kind(), MessageKind::PlayerInfo);
        let mut r = MessageReader::begin(&info);
        assert_eq!(r.u8().unwrap(), slot.get());
        if r.bool().unwrap() {
            allocated.push(r.string(MAX_NAME_LEN).unwrap());
        }
    }
    assert_eq!(allocated, vec!["Hana", "Alice"]);
}

#[test]
fn broadcast_is_relayed_and_surfaced_on_host() {
    let (mut host, addr, _) = start_host(4);
    let (mut alice, _, _) = join_raw(&mut host, addr, "Alice");
    let (mut bob, _, _) = join_raw(&mut host, addr, "Bob");

    alice.send(MessageKind::Application(120), BROADCAST, 1, b"charge!");
    let surfaced = pump_until(&mut host, |_, got| !got.is_empty());
    assert_eq!(surfaced[0].payload(), b"charge!");
    assert_eq!(surfaced[0].source(), 1);

    let relayed = bob.read_until(MessageKind::Application(120));
    assert_eq!(relayed.payload(), b"charge!");
    assert_eq!(relayed.source(), 1);
}

#[test]
fn point_to_point_skips_host_application_layer() {
    let (mut host, addr, _) = start_host(4);
    let (mut alice, _, _) = join_raw(&mut host, addr, "Alice");
    let (mut bob, _, _) = join_raw(&mut host, addr, "Bob");

    alice.send(MessageKind::Application(121), 2, 1, b"psst");
    let deadline = Instant::now() + Duration::from_millis(200);
    let surfaced = pump_until(&mut host, |_, _| Instant::now() >= deadline);
    assert!(surfaced.is_empty());

    let relayed = bob.read_until(MessageKind::Application(121));
    assert_eq!(relayed.payload(), b"psst");
    assert_eq!(relayed.destination_byte(), 2);
}

#[test]
fn game_flags_reach_joiners() {
    let (mut host, addr, _) = start_host(4);
    let (mut alice, _, _) = join_raw(&mut host, addr, "Alice");

    host.set_game_flags([7, -3, 0, 42]).unwrap();
    let flags = alice.read_until(MessageKind::GameFlags);
    let mut r = MessageReader::begin(&flags);
    assert_eq!(r.u8().unwrap(), 4);
    let values: Vec<i32> = (0..4).map(|_| r.i32().unwrap()).collect();
    assert_eq!(values, vec![7, -3, 0, 42]);
}

#[test]
fn disconnect_is_announced_to_remaining_peers() {
    let (mut host, addr, hooks) = start_host(4);
    let (mut alice, _, _) = join_raw(&mut host, addr, "Alice");
    let (bob, bob_id, _) = join_raw(&mut host, addr, "Bob");

    drop(bob);
    pump_until(&mut host, |h, _| h.player_info().len() == 2);
    assert_eq!(hooks.events().last(), Some(&HookEvent::Left(bob_id)));
    assert_eq!(host.descriptor().current_players, 2);

    let left = alice.read_until(MessageKind::PlayerLeft);
    assert_eq!(MessageReader::begin(&left).u32().unwrap(), u32::from(bob_id.get()));
}

#[test]
fn full_session_rejects_with_invalid_id() {
    let (mut host, addr, _) = start_host(2);
    let (_alice, _, _) = join_raw(&mut host, addr, "Alice");

    let mut late = RawPeer::connect(addr);
    late.request_join("Late");
    let deadline = Instant::now() + Duration::from_millis(200);
    pump_until(&mut host, |_, _| Instant::now() >= deadline);

    late.read_descriptor();
    let rejection = late.read_message();
    assert_eq!(rejection.kind(), MessageKind::Accepted);
    assert_eq!(MessageReader::begin(&rejection).u8().unwrap(), BROADCAST);
    assert_eq!(host.player_info().len(), 2);
}

#[test]
fn list_reports_the_session() {
    let (mut host, addr, _) = start_host(4);
    let config = NetConfig {
        gameserver_port: addr.port(),
        ..NetConfig::default()
    };
    let lister = thread::spawn(move || find_games(&config, Some("127.0.0.1"), DEADLINE));
    pump_until(&mut host, |_, _| lister.is_finished());

    let games = lister.join().unwrap().unwrap();
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].name, "smoke-test");
    assert_eq!(games[0].current_players, 1);
    assert_eq!(games[0].max_players, 4);
    assert_eq!(games[0].user_flags, [7, -3, 0, 42]);
    assert_eq!(games[0].host, "127.0.0.1");
}
