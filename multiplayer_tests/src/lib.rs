// Test-only harness for multi-session integration tests.
//
// Runs a real `NetSession` host and real `NetSession::join_game` clients on
// localhost, all in the test's process. Sessions are single-threaded and
// tick-driven, so the harness provides the synchronous glue: a join helper
// that keeps the host ticking while the client's blocking handshake runs on
// a helper thread, and `pump_until`, which ticks a set of sessions until a
// condition holds and collects what each one surfaced.
//
// All networking goes through the same code paths as a real game loop; the
// only test-specific code is the polling wrappers here.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use skirmish_netplay::{HookRecorder, NetConfig, NetResult, NetSession};
use skirmish_protocol::Message;

/// Upper bound on any single wait.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between ticks.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Host config on an OS-assigned port.
pub fn host_config(storage_root: Option<PathBuf>) -> NetConfig {
    let mut config = NetConfig {
        gameserver_port: 0,
        ..NetConfig::default()
    };
    if let Some(root) = storage_root {
        config.storage_root = root;
    }
    config
}

/// Start a host named "Hana" with the given capacity.
pub fn start_host(max_players: u32, storage_root: Option<PathBuf>) -> (NetSession, HookRecorder) {
    let hooks = HookRecorder::new();
    let host = NetSession::host(
        host_config(storage_root),
        "integration-test",
        "Hana",
        [0; 4],
        max_players,
        Box::new(hooks.clone()),
    )
    .expect("start_host failed");
    (host, hooks)
}

/// Run `join_game` against `host` on a helper thread while ticking the host.
pub fn try_join(host: &mut NetSession, name: &str, storage_root: Option<PathBuf>) -> (NetResult<NetSession>, HookRecorder) {
    let port = host.local_addr().expect("host is not listening").port();
    let mut config = host_config(storage_root);
    config.gameserver_port = port;
    let hooks = HookRecorder::new();
    let client_hooks = Box::new(hooks.clone());
    let name = name.to_owned();
    let joiner = thread::spawn(move || NetSession::join_game(config, "127.0.0.1", &name, client_hooks, POLL_TIMEOUT));

    let start = Instant::now();
    while !joiner.is_finished() {
        assert!(start.elapsed() < POLL_TIMEOUT * 2, "join never completed");
        while host.recv().is_some() {}
        thread::sleep(POLL_INTERVAL);
    }
    (joiner.join().expect("join thread panicked"), hooks)
}

/// `try_join` that must succeed.
pub fn join(host: &mut NetSession, name: &str) -> (NetSession, HookRecorder) {
    let (result, hooks) = try_join(host, name, None);
    (result.expect("join_game failed"), hooks)
}

/// Tick every session until `done` holds. Returns, per session, every
/// application message it surfaced meanwhile.
pub fn pump_until(
    sessions: &mut [&mut NetSession],
    mut done: impl FnMut(&[&mut NetSession], &[Vec<Message>]) -> bool,
) -> Vec<Vec<Message>> {
    let start = Instant::now();
    let mut inboxes = vec![Vec::new(); sessions.len()];
    loop {
        for (session, inbox) in sessions.iter_mut().zip(inboxes.iter_mut()) {
            while let Some(message) = session.recv() {
                inbox.push(message);
            }
        }
        if done(sessions, &inboxes) {
            return inboxes;
        }
        assert!(start.elapsed() < POLL_TIMEOUT, "sessions never reached the expected state");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Tick every session for `duration` regardless of state.
pub fn pump_for(sessions: &mut [&mut NetSession], duration: Duration) -> Vec<Vec<Message>> {
    let until = Instant::now() + duration;
    pump_until(sessions, |_, _| Instant::now() >= until)
}

/// Names in each session's roster, in slot order.
pub fn roster_names(session: &NetSession) -> Vec<String> {
    session.player_info().into_iter().map(|p| p.name).collect()
}
