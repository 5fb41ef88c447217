//! Chorus client binary.
//!
//! # Usage
//!
//! ```bash
//! # Chat through the three default local replicas (ports 5000-5002)
//! chorus-client --name alice
//!
//! # Bid through two specific replicas, logging to a file
//! chorus-client --name bob --mode auction \
//!     --replica 127.0.0.1:5000 --replica 127.0.0.1:5001 --log-file log.txt
//! ```

use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use chorus_client::{
    ClientConfig, ReplicaFanout,
    render::{self, Input, PROMPT},
};
use chorus_core::EngineMode;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Replica event policy
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Lamport-stamped chat
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

/// Chorus client
#[derive(Parser, Debug)]
#[command(name = "chorus-client")]
#[command(about = "Join every Chorus replica and talk through all of them")]
#[command(version)]
struct Args {
    /// Participant name
    #[arg(short, long, default_value = "default")]
    name: String,

    /// Replica address (repeatable); defaults to 127.0.0.1:5000-5002
    #[arg(short, long = "replica")]
    replicas: Vec<String>,

    /// Initial Lamport time
    #[arg(short, long, default_value = "0")]
    lamport: u64,

    /// How input lines are interpreted
    #[arg(short, long, value_enum, default_value = "chat")]
    mode: Mode,

    /// TLS server name expected from replicas
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(args: &Args) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        },
        None => tracing_subscriber::registry().with(fmt::layer()).with(filter).init(),
    }

    Ok(())
}

/// Print a line above the prompt and redraw the prompt.
async fn show(stdout: &mut Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(format!("\r{line}\n{PROMPT}").as_bytes()).await?;
    stdout.flush().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let mode = EngineMode::from(args.mode);
    let defaults = ClientConfig::default();
    let config = ClientConfig {
        participant_id: args.name,
        replicas: if args.replicas.is_empty() { defaults.replicas } else { args.replicas },
        initial_time: args.lamport,
        server_name: args.server_name,
    };

    tracing::info!(participant = %config.participant_id, replicas = ?config.replicas, "Chorus client starting");

    let links = config.quic_links()?;
    let (mut fanout, mut outputs) =
        ReplicaFanout::new(config.participant_id.clone(), config.initial_time, links);

    let mut stdout = tokio::io::stdout();
    show(&mut stdout, "--- Welcome to Chorus ---").await?;

    let report = fanout.join_all().await;
    if report.joined.is_empty() {
        show(&mut stdout, "! no replica reachable; publishes will be retried per message").await?;
    } else {
        show(&mut stdout, &format!("joined {} of {} replicas", report.joined.len(), config.replicas.len()))
            .await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(output) = outputs.recv() => show(&mut stdout, &render::render(&output)).await?,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match render::parse_input(&line, mode) {
                    None => {},
                    Some(Input::Quit) => break,
                    Some(Input::Invalid(hint)) => show(&mut stdout, &hint).await?,
                    Some(Input::Publish(payload)) => {
                        let report = fanout.publish_all(payload).await;
                        if report.acks.is_empty() {
                            show(&mut stdout, "! no replica reachable, message not delivered").await?;
                        }
                    },
                }
            },
            _ = &mut ctrl_c => break,
        }
    }

    fanout.shutdown().await;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
