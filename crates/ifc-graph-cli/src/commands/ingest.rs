use super::{create_progress_bar, OutputContext};
use crate::cli::IngestArgs;
use crate::config::FileConfig;
use anyhow::{Context, Result};
use ifc_graph_core::{BatchProgress, GraphStore, JsonSourceModel, Pipeline, PrecomputedTopology};
use std::sync::Arc;
use tracing::info;

pub async fn execute(args: IngestArgs, file_config: FileConfig, output: &OutputContext) -> Result<()> {
    let cfg = args.apply(file_config);

    let model = JsonSourceModel::load(&args.model)
        .await
        .with_context(|| format!("failed to load model {}", args.model.display()))?;
    let source = Arc::new(model);
    let store = cfg.store.build()?;
    info!(store = store.name(), model = %args.model.display(), "Graph store ready");

    let mut pipeline = Pipeline::new(cfg.pipeline.clone(), Arc::clone(&source), store);
    if cfg.pipeline.enable_topological_analysis {
        let analyzer = PrecomputedTopology::new(source.topology().cloned());
        pipeline = pipeline.with_topology_analyzer(Arc::new(analyzer));
    }

    let progress = (!args.no_progress && !output.json).then(|| create_progress_bar(0, "Loading"));
    if let Some(pb) = &progress {
        let pb = pb.clone();
        pipeline = pipeline.with_progress(Arc::new(move |p: BatchProgress| {
            pb.set_length(p.total as u64);
            pb.set_position(p.completed as u64);
            pb.set_message(format!("Loading {}", p.domain));
        }));
    }

    let result = pipeline.run().await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let stats = result.context("ingestion failed")?;

    output.print_statistics(&stats)
}
