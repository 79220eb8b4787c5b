//! dWallet ceremony CLI
//!
//! Command-line interface for driving MPC ceremony sessions against a
//! ledger JSON-RPC node.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{ClientSettings, CompletionKind, PollStrategy};
use tracing_subscriber::EnvFilter;

/// dWallet ceremony CLI - start MPC sessions and await their results.
#[derive(Parser, Debug)]
#[command(name = "dwallet-ceremony")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML settings file. `DWALLET_*` variables override its values.
    #[arg(short, long, env = "DWALLET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Ledger JSON-RPC URL (overrides settings).
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// File holding the hex-encoded ed25519 signing key seed.
    #[arg(long, global = true)]
    keystore: Option<PathBuf>,

    /// Event polling strategy (overrides settings).
    #[arg(long, value_enum, global = true)]
    poll_strategy: Option<StrategyArg>,

    /// Default log level. `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Cursor,
    Window,
}

impl From<StrategyArg> for PollStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Cursor => PollStrategy::Cursor,
            StrategyArg::Window => PollStrategy::Window,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EventArg {
    DkgFirstRound,
    DkgSecondRound,
    Presign,
    Sign,
    PartialSignatures,
}

impl From<EventArg> for CompletionKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::DkgFirstRound => CompletionKind::DkgFirstRound,
            EventArg::DkgSecondRound => CompletionKind::DkgSecondRound,
            EventArg::Presign => CompletionKind::Presign,
            EventArg::Sign => CompletionKind::Sign,
            EventArg::PartialSignatures => CompletionKind::PartialSignatures,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a shared object, or show the discovered deployment objects.
    Resolve {
        /// Object id. Omit to resolve the protocol state and network key.
        object_id: Option<String>,
    },

    /// Start a presign session for a dWallet and wait for its output.
    Presign {
        /// dWallet object id.
        #[arg(short, long)]
        dwallet_id: String,
    },

    /// Wait for the completion event of an already started session.
    AwaitSession {
        /// Session id from the start-session event.
        #[arg(short, long)]
        session_id: String,

        /// Completion event to wait for.
        #[arg(short, long, value_enum)]
        event: EventArg,

        /// Digest of the transaction that started the session. Scanning
        /// resumes after its first event.
        #[arg(long)]
        start_tx: Option<String>,
    },
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_settings(cli: &Cli) -> Result<ClientSettings> {
    let mut settings =
        ClientSettings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if let Some(url) = &cli.rpc_url {
        settings.rpc_url = url.clone();
    }
    if let Some(strategy) = cli.poll_strategy {
        settings.poll_strategy = strategy.into();
    }
    if let Some(path) = &cli.keystore {
        settings.keystore_path = Some(path.clone());
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Resolve { object_id } => {
            commands::resolve(&settings, object_id.as_deref()).await?;
        }
        Commands::Presign { dwallet_id } => {
            commands::presign(&settings, &dwallet_id).await?;
        }
        Commands::AwaitSession {
            session_id,
            event,
            start_tx,
        } => {
            commands::await_session(&settings, &session_id, event.into(), start_tx).await?;
        }
    }

    Ok(())
}
