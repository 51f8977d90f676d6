//! Trivmux server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:7070, 1024 sessions, 50 ms poll timeout,
//! # 65536-word replay limit
//! trivmux-server
//!
//! # Slower emulated engine, verbose logs
//! trivmux-server --bind 0.0.0.0:7070 --emulator-latency 8 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use trivmux_core::{DEFAULT_REPLAY_LIMIT, PollConfig};
use trivmux_server::{Server, ServerRuntimeConfig, TableConfig};

/// Trivmux session server
#[derive(Parser, Debug)]
#[command(name = "trivmux-server")]
#[command(about = "Multiplexes cipher sessions onto one stream-cipher engine")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    bind: String,

    /// Maximum concurrently open sessions
    #[arg(long, default_value = "1024")]
    max_sessions: usize,

    /// Give up on an engine operation after this many milliseconds
    #[arg(long, default_value = "50")]
    poll_timeout_ms: u64,

    /// Most keystream words replayed to restore a swapped-out session
    #[arg(long, default_value_t = DEFAULT_REPLAY_LIMIT)]
    replay_limit: u64,

    /// Extra status reads the emulated engine needs per operation
    #[arg(long, default_value = "0")]
    emulator_latency: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Trivmux server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        table: TableConfig { max_sessions: args.max_sessions },
        poll: PollConfig {
            timeout: Duration::from_millis(args.poll_timeout_ms),
            ..PollConfig::default()
        },
        replay_limit: args.replay_limit,
        emulator_latency: args.emulator_latency,
    };

    let server = Server::bind(config).await?;
    server.run_until(tokio::signal::ctrl_c()).await?;

    Ok(())
}
