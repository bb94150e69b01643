//! # Profile Vault CLI (`pvault`)
//!
//! ## Usage
//!
//! ```bash
//! pvault --config ./config/pvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pvault init` | Create the SQLite database and run schema migrations |
//! | `pvault submit <archive> --user <id>` | Store an export archive as a pending backup |
//! | `pvault process <id>` | Validate, analyze, and report on a backup |
//! | `pvault status <id>` | Show a backup record |
//! | `pvault list --user <id>` | List a user's backups |
//! | `pvault report <id>` | Print the snapshot (stats + insight report) as JSON |
//! | `pvault sweep` | Delete expired raw and derived artifacts |
//! | `pvault serve` | Start the HTTP server |
//! | `pvault completions <shell>` | Print shell completions |
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=profile_vault=debug`).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use profile_vault::{commands, config, migrate, server};
use profile_vault_core::models::Tier;

/// Profile Vault CLI — safe ingestion and analysis of professional-network
/// data exports.
#[derive(Parser)]
#[command(
    name = "pvault",
    about = "Profile Vault — safe ingestion and analysis of professional-network data exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Submit an export archive as a pending backup.
    ///
    /// Identical bytes submitted again by the same user return the
    /// existing backup.
    Submit {
        /// Path to the zip archive.
        archive: PathBuf,

        /// Verified id of the owning user.
        #[arg(long)]
        user: String,

        /// Insight tier: `deterministic` or `enriched`.
        #[arg(long, default_value = "deterministic")]
        tier: Tier,
    },

    /// Process a backup: validate, analyze, and persist its snapshot.
    Process {
        /// Backup id.
        id: String,
    },

    /// Show a backup record.
    Status {
        /// Backup id.
        id: String,
    },

    /// List a user's backups, newest first.
    List {
        #[arg(long)]
        user: String,
    },

    /// Print a backup's snapshot as JSON.
    Report {
        /// Backup id.
        id: String,
    },

    /// Delete expired raw archives and expired backups.
    Sweep,

    /// Start the HTTP server.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "pvault", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Submit {
            archive,
            user,
            tier,
        } => {
            commands::run_submit(&cfg, &archive, &user, tier).await?;
        }
        Commands::Process { id } => {
            commands::run_process(&cfg, &id).await?;
        }
        Commands::Status { id } => {
            commands::run_status(&cfg, &id).await?;
        }
        Commands::List { user } => {
            commands::run_list(&cfg, &user).await?;
        }
        Commands::Report { id } => {
            commands::run_report(&cfg, &id).await?;
        }
        Commands::Sweep => {
            commands::run_sweep(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
