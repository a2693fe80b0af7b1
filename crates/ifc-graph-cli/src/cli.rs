//! Command-line arguments

use crate::config::{FileConfig, StoreKind};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Load building models into a property graph
#[derive(Debug, Parser)]
#[command(name = "ifc-graph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, env = "IFC_GRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a model into the graph store
    Ingest(IngestArgs),
    /// Describe a model without writing anything
    Inspect(InspectArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Model document (JSON)
    pub model: PathBuf,
}

#[derive(Debug, Default, Args)]
pub struct IngestArgs {
    /// Model document (JSON)
    pub model: PathBuf,

    /// Clear the graph before loading
    #[arg(long)]
    pub clear: bool,

    /// Relationship batch size, and element batch size when sequential
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Element batch size when parallel
    #[arg(long)]
    pub parallel_batch_size: Option<usize>,

    /// Load batches over a worker pool
    #[arg(long)]
    pub parallel: bool,

    /// Worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Record metrics and write performance reports
    #[arg(long)]
    pub monitor: bool,

    /// Directory for performance reports
    #[arg(long)]
    pub monitor_dir: Option<PathBuf>,

    /// Import topological relations shipped with the model
    #[arg(long)]
    pub topology: bool,

    /// Graph store backend
    #[arg(long, value_enum)]
    pub store: Option<StoreKind>,

    /// Graph server URL
    #[arg(long, env = "IFC_GRAPH_URL")]
    pub url: Option<String>,

    /// API key for authentication
    #[arg(long, env = "IFC_GRAPH_API_KEY")]
    pub api_key: Option<String>,

    /// Username for authentication
    #[arg(long, env = "IFC_GRAPH_USERNAME")]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(long, env = "IFC_GRAPH_PASSWORD")]
    pub password: Option<String>,

    /// Target database
    #[arg(long)]
    pub database: Option<String>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl IngestArgs {
    /// Merge flags over file values; a flag that was given always wins
    pub fn apply(&self, mut cfg: FileConfig) -> FileConfig {
        let pipeline = &mut cfg.pipeline;
        pipeline.clear_existing |= self.clear;
        pipeline.parallel_processing |= self.parallel;
        pipeline.enable_monitoring |= self.monitor;
        pipeline.enable_topological_analysis |= self.topology;
        pipeline.batch_size = self.batch_size.unwrap_or(pipeline.batch_size);
        pipeline.parallel_batch_size = self.parallel_batch_size.unwrap_or(pipeline.parallel_batch_size);
        pipeline.max_workers = self.workers.or(pipeline.max_workers);
        pipeline.monitoring_output_dir = self.monitor_dir.clone().or(pipeline.monitoring_output_dir.take());

        let store = &mut cfg.store;
        store.kind = self.store.unwrap_or(store.kind);
        if let Some(url) = &self.url {
            store.url = url.clone();
        }
        store.api_key = self.api_key.clone().or(store.api_key.take());
        store.username = self.username.clone().or(store.username.take());
        store.password = self.password.clone().or(store.password.take());
        store.database = self.database.clone().or(store.database.take());
        cfg
    }
}
