use anyhow::Result;
use clap::Parser;
use ifc_graph_cli::{logging, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);
    ifc_graph_cli::run(cli).await
}
