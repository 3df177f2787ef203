mod commands;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::settings::LockArgs;

#[derive(Parser)]
#[command(
    name = "keylock",
    about = "keylock — mutual exclusion through a shared key-value store",
    version
)]
struct Cli {
    /// Storage backend: "memory" or a redis:// URL
    #[arg(long, global = true, default_value = "memory", env = "KEYLOCK_STORAGE")]
    storage: String,

    /// JSON file with lock settings (see `LockConfig`)
    #[arg(long, global = true, env = "KEYLOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Try once to take a lock and print its ownership token
    Acquire {
        key: String,

        #[command(flatten)]
        lock: LockArgs,
    },

    /// Release a lock taken earlier with `acquire`
    Release {
        key: String,

        /// Ownership token printed by `acquire`
        #[arg(long)]
        token: String,
    },

    /// Reset the TTL of a lock taken earlier with `acquire`
    Renew {
        key: String,

        /// Ownership token printed by `acquire`
        #[arg(long)]
        token: String,

        #[command(flatten)]
        lock: LockArgs,
    },

    /// Run a command while holding a lock, renewing it until the command exits
    Exec {
        key: String,

        #[command(flatten)]
        lock: LockArgs,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(cli, &cancel).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("keylock: {e:#}");
            ExitCode::from(commands::exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<u8> {
    if let Commands::Version = cli.command {
        println!("keylock {}", env!("CARGO_PKG_VERSION"));
        println!("Mutual exclusion through a shared key-value store");
        return Ok(commands::EXIT_SUCCESS);
    }

    let base = settings::load_config(cli.config.as_deref())?;
    let client = commands::create_client(&cli.storage).await?;

    match cli.command {
        Commands::Acquire { key, lock } => {
            let config = lock.apply(base)?;
            commands::acquire(&client, cancel, &key, &config).await
        }
        Commands::Release { key, token } => {
            commands::release(&client, cancel, &key, &token, &base).await
        }
        Commands::Renew { key, token, lock } => {
            let config = lock.apply(base)?;
            commands::renew(&client, cancel, &key, &token, &config).await
        }
        Commands::Exec { key, lock, command } => {
            let config = lock.apply(base)?;
            commands::exec(&client, cancel, &key, &config, &command).await
        }
        Commands::Version => unreachable!("handled above"),
    }
}
