// CLI entry point for Skirmish netplay.
//
// Two modes:
// - host (default): open a session on the game port and run the host tick
//   loop, relaying for joiners and logging every application message that
//   reaches the host. Runs until the process is killed.
// - `--list <HOST>`: ask a host (or with `--list master`, the configured
//   master server) for its sessions and print them as JSON.
//
// Usage:
//   netplay [OPTIONS]
//     --config <FILE>         JSON config (see `NetConfig`)
//     --port <PORT>           Game port (overrides config, default 9999)
//     --name <NAME>           Session name (default: skirmish)
//     --player <NAME>         Host player name (default: host)
//     --max-players <N>       Max players including host (default: 8)
//     --list <HOST>           List sessions instead of hosting
//
// Logging goes through `tracing`; set `RUST_LOG` (e.g.
// `RUST_LOG=debug,netplay::packets=trace`) to see more.

use std::path::PathBuf;
use std::time::Duration;

use skirmish_netplay::{NetConfig, NetSession, NoHooks, find_games};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(16);

struct Args {
    config: Option<PathBuf>,
    port: Option<u16>,
    session_name: String,
    player_name: String,
    max_players: u32,
    list: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    let mut config = match &args.config {
        Some(path) => NetConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Failed to load {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => NetConfig::default(),
    };
    if let Some(port) = args.port {
        config.gameserver_port = port;
    }

    match &args.list {
        Some(host) => list(&config, host),
        None => host(config, &args),
    }
}

fn list(config: &NetConfig, host: &str) {
    let target = (host != "master").then_some(host);
    let games = find_games(config, target, config.handshake_timeout()).unwrap_or_else(|e| {
        eprintln!("Failed to list sessions: {e}");
        std::process::exit(1);
    });
    match serde_json::to_string_pretty(&games) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to encode session list: {e}");
            std::process::exit(1);
        }
    }
}

fn host(config: NetConfig, args: &Args) {
    let mut session = NetSession::host(
        config,
        &args.session_name,
        &args.player_name,
        [0; 4],
        args.max_players,
        Box::new(NoHooks),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to host session: {e}");
        std::process::exit(1);
    });

    if let Some(addr) = session.local_addr() {
        println!("Hosting \"{}\" on {addr}", args.session_name);
    }
    println!("Press Ctrl+C to stop.");

    loop {
        while let Some(message) = session.recv() {
            info!(
                kind = ?message.kind(),
                source = message.source(),
                size = message.payload().len(),
                "application message"
            );
        }
        std::thread::sleep(TICK);
    }
}

/// Parse command-line arguments. Plain `std::env::args()` matching.
fn parse_args() -> Args {
    let mut parsed = Args {
        config: None,
        port: None,
        session_name: "skirmish".into(),
        player_name: "host".into(),
        max_players: 8,
        list: None,
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                parsed.config = Some(required(&args, i, "--config").into());
            }
            "--port" => {
                i += 1;
                parsed.port = Some(required(&args, i, "--port").parse().unwrap_or_else(|_| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                }));
            }
            "--name" => {
                i += 1;
                parsed.session_name = required(&args, i, "--name").into();
            }
            "--player" => {
                i += 1;
                parsed.player_name = required(&args, i, "--player").into();
            }
            "--max-players" => {
                i += 1;
                parsed.max_players = required(&args, i, "--max-players").parse().unwrap_or_else(|_| {
                    eprintln!("--max-players requires a valid number");
                    std::process::exit(1);
                });
            }
            "--list" => {
                i += 1;
                parsed.list = Some(required(&args, i, "--list").into());
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn required<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("{flag} requires a value");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: netplay [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>         JSON config file");
    println!("  --port <PORT>           Game port (default: 9999)");
    println!("  --name <NAME>           Session name (default: skirmish)");
    println!("  --player <NAME>         Host player name (default: host)");
    println!("  --max-players <N>       Max players including host (default: 8)");
    println!("  --list <HOST>           List sessions on HOST (\"master\" for the master server)");
    println!("  --help, -h              Show this help");
}
