use super::OutputContext;
use crate::cli::InspectArgs;
use anyhow::{Context, Result};
use ifc_graph_core::JsonSourceModel;

pub async fn execute(args: InspectArgs, output: &OutputContext) -> Result<()> {
    let model = JsonSourceModel::load(&args.model)
        .await
        .with_context(|| format!("failed to load model {}", args.model.display()))?;
    output.print_summary(&model.summary())
}
