//! IFC Graph CLI - command-line front end for `ifc_graph_core`

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use cli::{Cli, Commands};
pub use config::{CliError, FileConfig, StoreConfig, StoreKind};

use anyhow::Result;
use commands::OutputContext;

/// Run a parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let cfg = FileConfig::load(cli.config.as_deref())?;
    let output = OutputContext {
        json: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Ingest(args) => commands::ingest::execute(args, cfg, &output).await,
        Commands::Inspect(args) => commands::inspect::execute(args, &output).await,
        Commands::Config { command } => {
            commands::config::execute(command, &cfg, cli.config.as_deref(), &output)
        }
    }
}
