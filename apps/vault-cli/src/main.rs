mod commands;
mod logging;
mod signals;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notes_vault::VaultConfig;

/// Maintenance tool for a local notes vault
#[derive(Parser)]
#[command(name = "vault-cli")]
#[command(about = "Inspect, migrate and purge a local notes vault")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every schema step that is due
    Migrate,
    /// Show the schema ledger and the encryption state of each table family
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop plaintext columns if every live row is sealed
    Cutover,
    /// Purge soft-deleted rows past their retention window
    Purge {
        /// Keep running on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Validate configuration and list pending schema steps
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.config.as_deref()
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // defaults -> YAML (if provided) -> env (VAULT__*)
    let config = VaultConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose)?;
    tracing::debug!(dsn = %config.database.dsn, "Configuration loaded");

    match cli.command.unwrap_or(Commands::Status { json: false }) {
        Commands::Migrate => commands::migrate(&config).await,
        Commands::Status { json } => commands::status(&config, json).await,
        Commands::Cutover => commands::cutover(&config).await,
        Commands::Purge { watch } => commands::purge(&config, watch).await,
        Commands::Check => commands::check(&config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_flags() {
        let cli = Cli::try_parse_from(["vault-cli", "-vv", "purge", "--watch"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Commands::Purge { watch: true })));

        let cli = Cli::try_parse_from(["vault-cli", "--config", "vault.yaml", "status", "--json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("vault.yaml")));
        assert!(matches!(cli.command, Some(Commands::Status { json: true })));

        assert!(Cli::try_parse_from(["vault-cli", "rollback"]).is_err());
    }
}
