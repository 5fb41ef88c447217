//! Chorus replica binary.
//!
//! # Usage
//!
//! ```bash
//! # Chat replica 1 of 3 (binds 127.0.0.1:5001, self-signed certificate)
//! chorus-server --replica 1
//!
//! # Auction replica closing after five minutes, logging to a file
//! chorus-server --bind 0.0.0.0:5000 --mode auction --auction-secs 300 --log-file log.txt
//! ```

use std::{fs::File, path::PathBuf, sync::Mutex, time::Duration};

use chorus_core::EngineConfig;
use chorus_server::{EngineMode, Server, ServerRuntimeConfig};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Replica event policy
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Lamport-stamped chat relay
    Chat,
    /// Ascending-bid auction
    Auction,
}

impl From<Mode> for EngineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Chat => Self::Chat,
            Mode::Auction => Self::Auction,
        }
    }
}

/// Chorus replica
#[derive(Parser, Debug)]
#[command(name = "chorus-server")]
#[command(about = "Chorus replicated chat and auction replica")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:5000", conflicts_with = "replica")]
    bind: String,

    /// Replica index; binds 127.0.0.1:(5000 + index)
    #[arg(short, long)]
    replica: Option<u16>,

    /// Event policy
    #[arg(short, long, value_enum, default_value = "chat")]
    mode: Mode,

    /// Seconds after start at which the auction closes
    #[arg(long, default_value = "120")]
    auction_secs: u64,

    /// Events buffered per session before a slow session is evicted
    #[arg(long, default_value = "256")]
    queue_capacity: usize,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file (truncated on start) instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match &args.log_file {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        },
        None => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let bind_address = args.replica.map_or_else(|| args.bind.clone(), chorus_proto::replica_address);

    tracing::info!("Chorus replica starting");
    tracing::info!("Binding to {}", bind_address);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
    }

    let config = ServerRuntimeConfig {
        bind_address,
        cert_path: args.cert,
        key_path: args.key,
        engine: EngineConfig {
            mode: args.mode.into(),
            auction_duration: Duration::from_secs(args.auction_secs),
            session_queue_capacity: args.queue_capacity,
        },
    };

    let server = Server::bind(config)?;

    tracing::info!("Clients should dial {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
