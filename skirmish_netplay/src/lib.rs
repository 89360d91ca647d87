// skirmish_netplay: transport and session layer for Skirmish multiplayer.
//
// A star topology: one host, up to seven joiners, every message passing
// through the host. The host relays broadcasts and point-to-point frames for
// its joiners, keeps the authoritative player directory and game flags, and
// replicates them with system messages. Everything is driven by the game
// loop calling `NetSession::recv` each tick; there are no worker threads.
//
// Module overview:
// - `session.rs`:       `NetSession`, the application-facing service.
// - `handshake.rs`:     Join handshake (host admit sequence, client
//                       `join_game`).
// - `discovery.rs`:     Host listener with its transient socket pool, master
//                       registration, client `find_games`.
// - `router.rs`:        Send, broadcast, and the host's fair relay/receive
//                       scan with disconnect synthesis.
// - `system.rs`:        System message builders and the processor that
//                       applies them to replicated state.
// - `directory.rs`:     `PlayerDirectory` arena and roster.
// - `buffered.rs`:      `BufferedSocket`, message reassembly over a stream.
// - `poll_set.rs`:      Batched readiness checks (`poll(2)` on unix).
// - `transport.rs`:     `Transport` seam and `send_all`.
// - `file_transfer.rs`: Chunked FILE_MSG sender/receiver over `Storage`.
// - `stats.rs`:         Traffic counters and packet tracing.
// - `hooks.rs`:         `SessionHooks` join/leave callbacks.
// - `config.rs`:        `NetConfig`, loaded from JSON.
// - `error.rs`:         `NetError` / `NetResult`.
//
// Dependencies: `skirmish_protocol` for everything on the wire.

pub mod buffered;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod file_transfer;
pub mod handshake;
pub mod hooks;
pub mod poll_set;
pub mod router;
pub mod session;
pub mod stats;
pub mod system;
pub mod transport;

pub use config::NetConfig;
pub use directory::{PlayerDirectory, PlayerInfo};
pub use discovery::{Registration, find_games};
pub use error::{NetError, NetResult};
pub use handshake::ClientJoinState;
pub use hooks::{HookEvent, HookRecorder, NoHooks, SessionHooks};
pub use router::{GAME_FLAG_COUNT, Role};
pub use session::NetSession;
pub use stats::{PacketDirection, TrafficCounters, TrafficStats};
