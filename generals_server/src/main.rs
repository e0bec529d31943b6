// CLI entry point for the Generals game server.
//
// Starts a standalone server that game clients connect to over TCP. All game
// logic runs in `generals_engine`; see `server.rs` for the networking
// architecture.
//
// Usage:
//   generals-server [OPTIONS]
//     --bind <ADDR>               Listen address (default: 127.0.0.1)
//     --port <PORT>               Listen port (default: 7979)
//     --rules <FILE>              Ruleset JSON (default: Game of the Generals)
//     --session-timeout <SECS>    Idle time before a session is destroyed
//     --sweep-interval <SECS>     How often idle sessions are looked for
//
// Log verbosity comes from `RUST_LOG` (default `info`).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use generals_engine::GameRules;
use generals_server::server::{ServerConfig, start_server};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "generals-server", version)]
#[command(about = "Two-player Game of the Generals server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on (0 picks a free one).
    #[arg(long, default_value_t = 7979)]
    port: u16,

    /// JSON ruleset to play instead of the built-in Game of the Generals.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Seconds without activity after which a session is destroyed.
    #[arg(long, default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..))]
    session_timeout: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    sweep_interval: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let rules = match &args.rules {
        Some(path) => load_rules(path)?,
        None => GameRules::default(),
    };
    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        rules,
        session_timeout: Duration::from_secs(args.session_timeout),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        ..ServerConfig::default()
    };

    let (_handle, addr) = start_server(config).context("failed to start server")?;
    info!(%addr, "press Ctrl+C to stop");

    // The server runs on background threads; the process exits on SIGINT.
    loop {
        std::thread::park();
    }
}

/// Read and validate a JSON ruleset.
fn load_rules(path: &Path) -> Result<GameRules> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules from {}", path.display()))?;
    let rules =
        GameRules::from_json(&text).with_context(|| format!("loading rules from {}", path.display()))?;
    info!(path = %path.display(), pieces = rules.army_size(), "custom rules loaded");
    Ok(rules)
}
