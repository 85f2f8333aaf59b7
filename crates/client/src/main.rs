mod archive;
mod checksum;
mod payload;
mod peer;
mod receiver;
mod sender;
mod session_name;
mod signaling;
mod util;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tunnel_protocol::SessionConfig;

use crate::receiver::Receiver;
use crate::sender::Sender;

/// Direct peer-to-peer file transfer over WebRTC.
#[derive(Parser)]
#[command(name = "tunnel", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send files or directories to a receiver
    Send {
        /// Files or directories to transfer
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Receive a transfer by its session name
    Receive {
        /// Session name printed by the sender
        session: String,
        /// Memory budget for buffered chunks before spilling a part file to disk
        #[arg(long, default_value_t = 64)]
        max_ram_mb: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Progress and prompts go to stdout; keep tracing quiet unless asked for
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::from_env();

    match cli.command {
        Command::Send { paths } => Sender::new(paths, config)?.run().await,
        Command::Receive {
            session,
            max_ram_mb,
        } => Receiver::new(session, max_ram_mb, config).run().await,
    }
}
