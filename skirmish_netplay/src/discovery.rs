// Discovery: master-server registration, the host's listening socket, and
// the client-side "list" query.
//
// Host side. `DiscoveryListener` owns the well-known listening socket and a
// bounded pool of transient sockets, separate from the router's connection
// table. Each `poll` (called once per host `recv` tick):
// 1. accepts at most one pending connection into a free pool slot,
// 2. runs one readiness check over the pool,
// 3. advances every transient socket's state machine:
//    - `AwaitingCommand`: once five bytes are buffered, `"list\0"` is answered
//      with a count of 1 and the descriptor (-> `Answered`), `"join\0"` with
//      the descriptor alone (-> `AwaitingJoin`); anything else closes it.
//    - `AwaitingJoin`: a JOIN message yields a `JoinRequest` carrying the
//      socket (with any bytes already buffered behind the JOIN) out of the
//      pool. Any other message closes it.
//    - `Answered`: waits for the peer to hang up.
// 4. drops sockets past their `transient_timeout`.
// Nothing here blocks; sends go through `send_all` with the send timeout.
//
// Client side. `find_games` is a short blocking exchange bounded by an
// explicit timeout, used before a session exists.
//
// Registration with the master service. The master's address is resolved
// once, when the host is set up. After that, `MasterLink::advance` runs once
// per tick and never blocks: it starts a non-blocking connect
// (`Unregistered` -> `Connecting`), then checks it on later ticks. Once
// connected it sends `"addg\0"` plus the descriptor (-> `Registered`). A
// failed resolve, a refused connect, or a connect still pending after the
// handshake timeout marks the link `Unreachable` for the rest of the session,
// so a missing master costs one attempt rather than one per tick.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use skirmish_protocol::descriptor::{COMMAND_LEN, DESCRIPTOR_RECORD_LEN};
use skirmish_protocol::{DiscoveryCommand, MAX_NAME_LEN, MessageKind, MessageReader, SessionDescriptor};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::buffered::BufferedSocket;
use crate::config::NetConfig;
use crate::error::{NetError, NetResult};
use crate::poll_set::PollSet;
use crate::transport::{Transport, send_all};

/// Capacity of the host's transient socket pool.
pub const MAX_TRANSIENT_SOCKETS: usize = 16;

/// Most descriptors accepted from one "list" reply.
pub const MAX_LISTED_GAMES: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    /// Non-blocking connect to the master in flight.
    Connecting,
    Registered,
    /// Sticky: no further attempts this session.
    Unreachable,
}

/// A connect to the master that has not completed yet.
#[derive(Debug)]
struct PendingConnect {
    socket: Socket,
    deadline: Instant,
}

impl PendingConnect {
    /// Start connecting to `addr` without waiting for the handshake.
    fn start(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            socket,
            deadline: Instant::now() + timeout,
        })
    }

    /// `Ok(true)` once connected, `Ok(false)` while still in progress.
    fn is_connected(&self) -> io::Result<bool> {
        if let Some(e) = self.socket.take_error()? {
            return Err(e);
        }
        match self.socket.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// The host's registration with the master directory service.
#[derive(Debug)]
pub struct MasterLink {
    state: Registration,
    master: Option<SocketAddr>,
    connect_timeout: Duration,
    pending: Option<PendingConnect>,
    connection: Option<TcpStream>,
}

impl Default for MasterLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterLink {
    /// A link with no master address. `advance` marks it unreachable.
    pub fn new() -> Self {
        Self {
            state: Registration::Unregistered,
            master: None,
            connect_timeout: Duration::ZERO,
            pending: None,
            connection: None,
        }
    }

    /// Resolve the configured master. This is the only step that may block
    /// (on DNS), so it runs while the host is being set up.
    pub fn for_host(config: &NetConfig) -> Self {
        let mut link = Self::new();
        link.connect_timeout = config.handshake_timeout();
        if !config.has_masterserver() {
            debug!("no master server configured, registration skipped");
            link.state = Registration::Unreachable;
            return link;
        }
        match resolve(&config.masterserver_name, config.masterserver_port) {
            Ok(addr) => link.master = Some(addr),
            Err(e) => {
                warn!(master = %config.masterserver_name, error = %e, "master server unreachable, giving up for this session");
                link.state = Registration::Unreachable;
            }
        }
        link
    }

    pub fn state(&self) -> Registration {
        self.state
    }

    /// One non-blocking registration step. Call once per host tick.
    pub fn advance(&mut self, descriptor: &SessionDescriptor, send_timeout: Duration) {
        if self.state == Registration::Unregistered {
            self.start_connect();
        }
        if self.state == Registration::Connecting {
            self.finish_connect(descriptor, send_timeout);
        }
    }

    /// Drop the registration so the next `advance` registers afresh. An
    /// unreachable master stays unreachable.
    pub fn deregister(&mut self) {
        if matches!(self.state, Registration::Registered | Registration::Connecting) {
            debug!("deregistered from master server");
            self.pending = None;
            self.connection = None;
            self.state = Registration::Unregistered;
        }
    }

    fn start_connect(&mut self) {
        let Some(addr) = self.master else {
            self.give_up("no master address");
            return;
        };
        match PendingConnect::start(addr, self.connect_timeout) {
            Ok(pending) => {
                debug!(master = %addr, "connecting to master server");
                self.pending = Some(pending);
                self.state = Registration::Connecting;
            }
            Err(e) => self.give_up(e),
        }
    }

    fn finish_connect(&mut self, descriptor: &SessionDescriptor, send_timeout: Duration) {
        let status = match self.pending.as_ref() {
            Some(pending) => pending.is_connected().map(|done| (done, pending.deadline)),
            None => Ok((false, Instant::now())),
        };
        match status {
            Ok((false, deadline)) => {
                if Instant::now() >= deadline {
                    self.give_up("connect timed out");
                }
            }
            Ok((true, _)) => {
                let Some(pending) = self.pending.take() else {
                    return;
                };
                let mut stream = TcpStream::from(pending.socket);
                let mut record = DiscoveryCommand::AddGame.bytes().to_vec();
                record.extend_from_slice(&descriptor.encode());
                match send_all(&mut stream, &record, send_timeout) {
                    Ok(()) => {
                        info!(
                            master = ?self.master,
                            players = descriptor.current_players,
                            "registered with master server"
                        );
                        self.connection = Some(stream);
                        self.state = Registration::Registered;
                    }
                    Err(e) => self.give_up(e),
                }
            }
            Err(e) => self.give_up(e),
        }
    }

    fn give_up(&mut self, reason: impl std::fmt::Display) {
        warn!(master = ?self.master, error = %reason, "master server unreachable, giving up for this session");
        self.pending = None;
        self.connection = None;
        self.state = Registration::Unreachable;
    }
}

pub(crate) fn resolve(host: &str, port: u16) -> NetResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NetError::Resolve(format!("{host}: {e}")))?
        .next()
        .ok_or_else(|| NetError::Resolve(host.to_owned()))
}

/// `read_exact` on a stream with a read timeout, mapping the timeout to
/// `NetError::Timeout(what)`.
pub(crate) fn read_exact_within(stream: &mut TcpStream, buf: &mut [u8], what: &'static str) -> NetResult<()> {
    stream.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetError::Timeout(what),
        io::ErrorKind::UnexpectedEof => NetError::Disconnected,
        _ => NetError::Io(e),
    })
}

/// Ask a host (or, with `host == None`, the configured master server) for
/// its joinable sessions. Blocks for at most about `timeout` per step.
pub fn find_games(config: &NetConfig, host: Option<&str>, timeout: Duration) -> NetResult<Vec<SessionDescriptor>> {
    let (name, port) = match host {
        Some(host) => (host, config.gameserver_port),
        None if config.has_masterserver() => (config.masterserver_name.as_str(), config.masterserver_port),
        None => return Err(NetError::Resolve("no host given and no master server configured".into())),
    };
    let addr = resolve(name, port)?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(&DiscoveryCommand::List.bytes())?;

    let mut count = [0u8; 4];
    read_exact_within(&mut stream, &mut count, "game count")?;
    let count = u32::from_be_bytes(count);
    if count > MAX_LISTED_GAMES {
        warn!(%addr, count, "game list truncated to {MAX_LISTED_GAMES}");
    }

    let mut games = Vec::new();
    for _ in 0..count.min(MAX_LISTED_GAMES) {
        let mut record = [0u8; DESCRIPTOR_RECORD_LEN];
        read_exact_within(&mut stream, &mut record, "session descriptor")?;
        let mut descriptor = SessionDescriptor::decode(&record)?;
        if descriptor.host.is_empty() {
            descriptor.host = addr.ip().to_string();
        }
        games.push(descriptor);
    }
    debug!(%addr, found = games.len(), "game list received");
    Ok(games)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransientState {
    AwaitingCommand,
    AwaitingJoin,
    Answered,
}

/// A joiner that completed the discovery exchange and sent JOIN.
pub struct JoinRequest {
    pub socket: BufferedSocket<TcpStream>,
    pub name: String,
    pub peer: SocketAddr,
}

enum Step {
    Keep,
    Drop,
    Join(String),
}

struct TransientSocket {
    socket: BufferedSocket<TcpStream>,
    peer: SocketAddr,
    state: TransientState,
    deadline: Instant,
}

impl TransientSocket {
    fn advance(&mut self, ready: bool, descriptor: &SessionDescriptor, send_timeout: Duration) -> Step {
        if self.state == TransientState::AwaitingJoin {
            if let Some(step) = self.take_join() {
                return step;
            }
        }
        if ready {
            self.socket.fill();
        }
        let keep_unless_closed = |socket: &BufferedSocket<TcpStream>| {
            if socket.is_closed() { Step::Drop } else { Step::Keep }
        };
        match self.state {
            TransientState::AwaitingCommand => {
                if self.socket.buffered() < COMMAND_LEN {
                    return keep_unless_closed(&self.socket);
                }
                let command = DiscoveryCommand::parse(&self.socket.peek()[..COMMAND_LEN]);
                self.socket.consume(COMMAND_LEN);
                match command {
                    Some(DiscoveryCommand::List) => {
                        let mut reply = Vec::with_capacity(4 + DESCRIPTOR_RECORD_LEN);
                        reply.extend_from_slice(&1u32.to_be_bytes());
                        reply.extend_from_slice(&descriptor.encode());
                        self.reply(&reply, send_timeout, TransientState::Answered)
                    }
                    Some(DiscoveryCommand::Join) => {
                        match self.reply(&descriptor.encode(), send_timeout, TransientState::AwaitingJoin) {
                            Step::Keep => self.take_join().unwrap_or(Step::Keep),
                            other => other,
                        }
                    }
                    other => {
                        warn!(peer = %self.peer, command = ?other, "unexpected discovery command, closing");
                        Step::Drop
                    }
                }
            }
            TransientState::AwaitingJoin => match self.take_join() {
                Some(step) => step,
                None => keep_unless_closed(&self.socket),
            },
            TransientState::Answered => {
                self.socket.consume(self.socket.buffered());
                keep_unless_closed(&self.socket)
            }
        }
    }

    fn reply(&mut self, bytes: &[u8], send_timeout: Duration, next: TransientState) -> Step {
        match self.socket.send_frame(bytes, send_timeout) {
            Ok(()) => {
                self.state = next;
                Step::Keep
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "discovery reply failed");
                Step::Drop
            }
        }
    }

    fn take_join(&mut self) -> Option<Step> {
        let message = self.socket.extract_message()?;
        if message.kind() != MessageKind::Join {
            warn!(peer = %self.peer, kind = ?message.kind(), "expected JOIN, closing");
            return Some(Step::Drop);
        }
        match MessageReader::begin(&message).string(MAX_NAME_LEN) {
            Ok(name) => Some(Step::Join(name)),
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "malformed JOIN, closing");
                Some(Step::Drop)
            }
        }
    }
}

/// The host's listening socket plus its transient socket pool.
pub struct DiscoveryListener {
    listener: TcpListener,
    pool: [Option<TransientSocket>; MAX_TRANSIENT_SOCKETS],
    poll_set: PollSet,
}

impl DiscoveryListener {
    /// Listen on all interfaces. Port 0 picks a free port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            pool: std::array::from_fn(|_| None),
            poll_set: PollSet::with_capacity(MAX_TRANSIENT_SOCKETS),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Transient sockets currently in the pool.
    pub fn pending(&self) -> usize {
        self.pool.iter().flatten().count()
    }

    /// One non-blocking tick. Returns every joiner that sent JOIN.
    pub fn poll(
        &mut self,
        descriptor: &SessionDescriptor,
        transient_timeout: Duration,
        send_timeout: Duration,
    ) -> Vec<JoinRequest> {
        self.accept_one(transient_timeout);
        if let Err(e) = self.poll_set.check(Duration::ZERO) {
            warn!(error = %e, "readiness poll over transient sockets failed");
        }

        let now = Instant::now();
        let mut joins = Vec::new();
        for slot in 0..MAX_TRANSIENT_SOCKETS {
            let ready = self.poll_set.is_ready(slot);
            let Some(transient) = self.pool[slot].as_mut() else {
                continue;
            };
            let step = match transient.advance(ready, descriptor, send_timeout) {
                Step::Keep if now >= transient.deadline => {
                    debug!(peer = %transient.peer, state = ?transient.state, "transient socket timed out");
                    Step::Drop
                }
                step => step,
            };
            match step {
                Step::Keep => {}
                Step::Drop => {
                    self.pool[slot] = None;
                    self.poll_set.remove(slot);
                }
                Step::Join(name) => {
                    self.poll_set.remove(slot);
                    if let Some(transient) = self.pool[slot].take() {
                        joins.push(JoinRequest {
                            socket: transient.socket,
                            name,
                            peer: transient.peer,
                        });
                    }
                }
            }
        }
        joins
    }

    /// Close every transient socket.
    pub fn clear(&mut self) {
        self.pool = std::array::from_fn(|_| None);
        self.poll_set.clear();
    }

    fn accept_one(&mut self, transient_timeout: Duration) {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };
        let Some(slot) = self.pool.iter().position(Option::is_none) else {
            warn!(%peer, "transient socket pool full, refusing connection");
            return;
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "cannot make socket non-blocking, refusing connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }
        debug!(%peer, slot, "discovery connection accepted");
        self.poll_set.add(slot, stream.poll_handle());
        self.pool[slot] = Some(TransientSocket {
            socket: BufferedSocket::new(stream),
            peer,
            state: TransientState::AwaitingCommand,
            deadline: Instant::now() + transient_timeout,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use skirmish_protocol::{Message, MessageWriter};

    use super::*;

    const SHORT: Duration = Duration::from_millis(500);

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor::new("Twin Rivers", 4, [1, 2, 3, 4])
    }

    fn loopback_config(port: u16) -> NetConfig {
        NetConfig {
            gameserver_port: port,
            ..NetConfig::default()
        }
    }

    fn connect(listener: &DiscoveryListener) -> TcpStream {
        let port = listener.local_addr().unwrap().port();
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    /// Poll until `done` says stop, failing after five seconds.
    fn pump(listener: &mut DiscoveryListener, mut done: impl FnMut(&mut DiscoveryListener, Vec<JoinRequest>) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let joins = listener.poll(&descriptor(), SHORT, SHORT);
            if done(listener, joins) {
                return;
            }
            assert!(Instant::now() < deadline, "listener never reached expected state");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn list_query_returns_descriptor_with_responder_address() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let config = loopback_config(listener.local_addr().unwrap().port());
        let client = thread::spawn(move || find_games(&config, Some("127.0.0.1"), Duration::from_secs(5)));

        pump(&mut listener, |_, _| client.is_finished());
        let games = client.join().unwrap().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].name, "Twin Rivers");
        assert_eq!(games[0].user_flags, [1, 2, 3, 4]);
        assert_eq!(games[0].host, "127.0.0.1");
    }

    #[test]
    fn join_exchange_hands_over_socket_and_name() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let mut client = connect(&listener);

        let mut join = MessageWriter::begin(MessageKind::Join, 0);
        join.string("Alice", MAX_NAME_LEN).unwrap();
        let mut bytes = DiscoveryCommand::Join.bytes().to_vec();
        bytes.extend(join.end().to_frame());
        client.write_all(&bytes).unwrap();

        let mut request = None;
        pump(&mut listener, |_, mut joins| {
            request = joins.pop();
            request.is_some()
        });
        let request = request.unwrap();
        assert_eq!(request.name, "Alice");
        assert_eq!(listener.pending(), 0);

        let mut record = [0u8; DESCRIPTOR_RECORD_LEN];
        client.read_exact(&mut record).unwrap();
        assert_eq!(SessionDescriptor::decode(&record).unwrap().name, "Twin Rivers");
    }

    #[test]
    fn non_join_message_after_join_command_is_refused() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let mut client = connect(&listener);
        let mut bytes = DiscoveryCommand::Join.bytes().to_vec();
        bytes.extend(Message::new(MessageKind::Application(3), 0, vec![1]).unwrap().to_frame());
        client.write_all(&bytes).unwrap();

        pump(&mut listener, |l, joins| {
            assert!(joins.is_empty());
            l.pending() == 0
        });
    }

    #[test]
    fn unknown_command_closes_socket() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let mut client = connect(&listener);
        client.write_all(b"junk\0").unwrap();

        pump(&mut listener, |l, _| l.pending() == 0);
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn silent_socket_times_out() {
        let mut listener = DiscoveryListener::bind(0).unwrap();
        let _client = connect(&listener);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        loop {
            listener.poll(&descriptor(), Duration::from_millis(20), SHORT);
            seen |= listener.pending() == 1;
            if seen && listener.pending() == 0 {
                break;
            }
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn find_games_without_any_target_fails_fast() {
        let err = find_games(&NetConfig::default(), None, SHORT).unwrap_err();
        assert!(matches!(err, NetError::Resolve(_)));
    }

    /// Advance until the link leaves `Connecting`. Every step must return
    /// at once.
    fn settle(link: &mut MasterLink) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let step = Instant::now();
            link.advance(&descriptor(), SHORT);
            assert!(step.elapsed() < Duration::from_millis(100), "advance blocked for {:?}", step.elapsed());
            if link.state() != Registration::Connecting {
                return;
            }
            assert!(Instant::now() < deadline, "connect never settled");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn master_config(port: u16) -> NetConfig {
        NetConfig {
            masterserver_name: "127.0.0.1".into(),
            masterserver_port: port,
            ..NetConfig::default()
        }
    }

    #[test]
    fn registration_sends_addg_record() {
        let master = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut link = MasterLink::for_host(&master_config(master.local_addr().unwrap().port()));
        assert_eq!(link.state(), Registration::Unregistered);
        settle(&mut link);
        assert_eq!(link.state(), Registration::Registered);

        let (mut conn, _) = master.accept().unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut command = [0u8; COMMAND_LEN];
        conn.read_exact(&mut command).unwrap();
        assert_eq!(DiscoveryCommand::parse(&command), Some(DiscoveryCommand::AddGame));
        let mut record = [0u8; DESCRIPTOR_RECORD_LEN];
        conn.read_exact(&mut record).unwrap();
        assert_eq!(SessionDescriptor::decode(&record).unwrap(), descriptor());

        link.deregister();
        assert_eq!(link.state(), Registration::Unregistered);
        settle(&mut link);
        assert_eq!(link.state(), Registration::Registered);
    }

    #[test]
    fn unreachable_master_is_sticky() {
        let port = {
            let closed = TcpListener::bind("127.0.0.1:0").unwrap();
            closed.local_addr().unwrap().port()
        };
        let mut link = MasterLink::for_host(&master_config(port));
        settle(&mut link);
        assert_eq!(link.state(), Registration::Unreachable);
        link.deregister();
        link.advance(&descriptor(), SHORT);
        assert_eq!(link.state(), Registration::Unreachable);
    }

    #[test]
    fn no_master_configured_is_unreachable() {
        let link = MasterLink::for_host(&NetConfig::default());
        assert_eq!(link.state(), Registration::Unreachable);

        let mut unresolved = MasterLink::new();
        unresolved.advance(&descriptor(), SHORT);
        assert_eq!(unresolved.state(), Registration::Unreachable);
    }
}
