//! syncbridge-admin Entry Point
//!
//! Reads store configuration from `SYNCBRIDGE_*` environment variables and
//! runs one operator command.

use clap::{Parser, Subcommand};
use syncbridge_admin::commands::{self, Environment};
use syncbridge_admin::telemetry::{init_logging, LogConfig};
use syncbridge_admin::AdminResult;

#[derive(Parser)]
#[command(name = "syncbridge-admin")]
#[command(about = "Operator tooling for the syncbridge record store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the record table or add missing columns.
    InitSchema,
    /// Release every lease held by an owner (defaults to SYNCBRIDGE_SERVER_ID).
    Sweep {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Clear the lease on one entity regardless of holder.
    Unlock { id: String },
    /// Print the stored row for one entity as JSON.
    Inspect { id: String },
    /// Print the effective sync configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> AdminResult<()> {
    let env = Environment::from_env()?;

    match command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&env.sync)?);
        }
        Command::InitSchema => {
            let store = env.open_store().await?;
            commands::init_schema(store.as_ref()).await?;
        }
        Command::Sweep { owner } => {
            let store = env.open_store().await?;
            let locks = env.lock_manager(store, owner.as_deref());
            let released = commands::sweep(&locks).await?;
            println!("released {} lease(s) held by {}", released, locks.owner());
        }
        Command::Unlock { id } => {
            let id = commands::parse_entity_id(&id)?;
            let store = env.open_store().await?;
            let locks = env.lock_manager(store, None);
            if commands::unlock(&locks, id).await? {
                println!("unlocked {}", id);
            } else {
                println!("no record for {}", id);
            }
        }
        Command::Inspect { id } => {
            let id = commands::parse_entity_id(&id)?;
            let cache = env.open_cache().await?;
            let store = env.open_store_with(cache.clone())?;
            match commands::inspect(store.as_ref(), cache.as_deref(), id).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("no record for {}", id),
            }
        }
    }
    Ok(())
}
