//! The ingestion pipeline.
//!
//! A run moves through a fixed sequence of phases:
//!
//! ```text
//! INIT -> SCHEMA_SETUP -> PROJECT -> SPATIAL_HIERARCHY -> ELEMENTS
//!      -> RELATIONSHIPS -> [TOPOLOGY] -> REPORT -> DONE
//! ```
//!
//! ELEMENTS and RELATIONSHIPS are partitioned into batches and handed to the
//! [`BatchExecutor`]; every other phase runs on a single session. A fatal
//! store error in any phase aborts the run. TOPOLOGY never aborts it, not even
//! when the analyzer or importer panics.

mod batches;
pub mod config;
pub mod stats;

pub use batches::{ElementBatchProcessor, RelationshipBatchProcessor};
pub use config::PipelineConfig;
pub use stats::{BatchCounters, PhaseTimer, PhaseTiming, PipelineStatistics, TimingSink};

use crate::error::Result;
use crate::executor::{panic_message, BatchExecutor, BatchProcessor, ExecutionMode, ProgressCallback};
use crate::graph::{GraphSession, GraphStore, SchemaSpec, SessionPool, StorePerformance};
use crate::mapper::{GraphMapper, MapOutcome};
use crate::model::{Attributes, ElementRecord, GlobalId, RelationshipType};
use crate::monitor::PerformanceMonitor;
use crate::partition::{partition, Batch, BatchDomain};
use crate::source::SourceModel;
use crate::topology::{GraphTopologyImporter, PrecomputedTopology, TopologyAnalyzer, TopologyImporter};
use chrono::Local;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Configuration and connectivity checks
    Init,
    /// Optional wipe, then constraints and indexes
    SchemaSetup,
    /// Project node
    Project,
    /// Sites, buildings, storeys and spaces
    SpatialHierarchy,
    /// Batched element loading
    Elements,
    /// Batched relationship loading
    Relationships,
    /// Topological enrichment
    Topology,
    /// Final counts and reports
    Report,
    /// Run finished
    Done,
}

impl Phase {
    /// Snake-case name used in logs and metric names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::SchemaSetup => "schema_setup",
            Self::Project => "project",
            Self::SpatialHierarchy => "spatial_hierarchy",
            Self::Elements => "elements",
            Self::Relationships => "relationships",
            Self::Topology => "topology",
            Self::Report => "report",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RunState {
    stats: PipelineStatistics,
    timings: TimingSink,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl RunState {
    fn enter(&mut self, phase: Phase) -> PhaseTimer {
        info!("Phase {phase}: starting");
        self.stats.final_phase = phase;
        PhaseTimer::start(phase, &self.timings, self.monitor.as_ref())
    }

    fn record(&self, name: &str, value: f64, unit: &str) {
        if let Some(monitor) = &self.monitor {
            monitor.record_metric(name, value, unit, Attributes::new());
        }
    }

    fn measure_memory(&self, label: &str) {
        if let Some(monitor) = &self.monitor {
            if monitor.measure_memory(label, Attributes::new()).is_none() {
                debug!(label, "process memory not available on this platform");
            }
        }
    }
}

/// Loads a [`SourceModel`] into a [`GraphStore`]
pub struct Pipeline<S: SourceModel> {
    config: PipelineConfig,
    source: Arc<S>,
    store: Arc<dyn GraphStore>,
    mapper: GraphMapper,
    schema: SchemaSpec,
    analyzer: Option<Arc<dyn TopologyAnalyzer>>,
    importer: Arc<dyn TopologyImporter>,
    progress: Option<ProgressCallback>,
}

impl<S: SourceModel> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("model", &self.source.name())
            .field("store", &self.store.name())
            .field("config", &self.config)
            .field("analyzer", &self.analyzer.is_some())
            .finish()
    }
}

impl<S: SourceModel> Pipeline<S> {
    /// Create a pipeline over `source` writing into `store`
    pub fn new(config: PipelineConfig, source: Arc<S>, store: Arc<dyn GraphStore>) -> Self {
        Self {
            config,
            source,
            store,
            mapper: GraphMapper::new(),
            schema: SchemaSpec::default(),
            analyzer: None,
            importer: Arc::new(GraphTopologyImporter::new()),
            progress: None,
        }
    }

    /// Analyzer used by the TOPOLOGY phase
    pub fn with_topology_analyzer(mut self, analyzer: Arc<dyn TopologyAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Importer used by the TOPOLOGY phase
    pub fn with_topology_importer(mut self, importer: Arc<dyn TopologyImporter>) -> Self {
        self.importer = importer;
        self
    }

    /// Callback invoked after every batch
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Constraints and indexes applied in SCHEMA_SETUP
    pub fn with_schema(mut self, schema: SchemaSpec) -> Self {
        self.schema = schema;
        self
    }

    /// Run configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every phase and return the statistics.
    ///
    /// Fails on invalid configuration or a lost store. Record-level problems
    /// are counted in the statistics instead.
    pub async fn run(&self) -> Result<PipelineStatistics> {
        let run_start = Instant::now();
        let workers = self.config.effective_workers();
        let mut state = RunState {
            stats: PipelineStatistics::new(self.config.parallel_processing, workers),
            timings: TimingSink::default(),
            monitor: self
                .config
                .enable_monitoring
                .then(|| Arc::new(PerformanceMonitor::new())),
        };
        info!(
            model = %self.source.name(),
            store = self.store.name(),
            parallel = self.config.parallel_processing,
            workers,
            "Starting ingestion"
        );

        {
            let _timer = state.enter(Phase::Init);
            self.config.validate()?;
            self.store.verify_connectivity().await?;
            state.measure_memory("process_start");
        }
        let pool = SessionPool::new(Arc::clone(&self.store), self.config.effective_pool_size());

        {
            let _timer = state.enter(Phase::SchemaSetup);
            let mut session = pool.acquire().await?;
            if self.config.clear_existing {
                info!("Clearing existing graph");
                self.mapper.clear_all(session.session()).await?;
            }
            session.apply_schema(&self.schema).await?;
        }

        let project = {
            let _timer = state.enter(Phase::Project);
            let mut session = pool.acquire().await?;
            self.load_project(session.session(), &mut state.stats).await?
        };

        {
            let _timer = state.enter(Phase::SpatialHierarchy);
            let mut session = pool.acquire().await?;
            self.load_spatial(session.session(), project.as_ref(), &mut state.stats)
                .await?;
            state.measure_memory("after_spatial");
        }

        let mode = if self.config.parallel_processing {
            ExecutionMode::Parallel { workers }
        } else {
            ExecutionMode::Sequential
        };

        {
            let _timer = state.enter(Phase::Elements);
            let processor = Arc::new(ElementBatchProcessor::new(Arc::clone(&self.source), self.mapper));
            let batches = partition(
                self.source.elements(),
                self.config.element_batch_size(),
                BatchDomain::Elements,
            )?;
            self.run_batches(mode, &pool, processor, batches, &mut state.stats)
                .await?;
            state.measure_memory("after_elements");
        }

        {
            let _timer = state.enter(Phase::Relationships);
            let processor = Arc::new(RelationshipBatchProcessor::new(self.mapper));
            let batches = partition(
                self.source.relationships(),
                self.config.relationship_batch_size(),
                BatchDomain::Relationships,
            )?;
            self.run_batches(mode, &pool, processor, batches, &mut state.stats)
                .await?;
        }

        if self.config.enable_topological_analysis {
            let _timer = state.enter(Phase::Topology);
            match AssertUnwindSafe(self.run_topology(&pool)).catch_unwind().await {
                Ok(Ok(breakdown)) => {
                    state.stats.topological_relationship_count = breakdown.values().sum();
                    info!(
                        total = state.stats.topological_relationship_count,
                        "Topological relationships imported: {:?}", breakdown
                    );
                    state.stats.topology_breakdown = breakdown;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Topological analysis failed. Continuing with standard processing");
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!(%reason, "Topological analysis panicked. Continuing with standard processing");
                }
            }
        }

        {
            let _timer = state.enter(Phase::Report);
            let mut session = pool.acquire().await?;
            state.stats.node_count = self.mapper.count_nodes(session.session()).await?;
            state.stats.edge_count = self.mapper.count_edges(session.session()).await?;
            drop(session);

            if let Some(monitor) = state.monitor.clone() {
                self.record_summary(&state);
                state.measure_memory("process_end");
                let perf = self.store.performance();
                match self.write_reports(&monitor, &state.stats, &perf, run_start) {
                    Ok(files) => state.stats.report_files = files,
                    Err(e) => warn!(error = %e, "Could not write performance reports"),
                }
            }
        }

        state.stats.finish(&state.timings);
        info!(
            elements = state.stats.element_count,
            spatial = state.stats.spatial_element_count,
            relationships = state.stats.relationship_count,
            topological = state.stats.topological_relationship_count,
            skipped = state.stats.skipped_records,
            failed = state.stats.failed_records,
            "Ingestion complete in {:.2}s",
            state.stats.elapsed_seconds
        );
        Ok(state.stats)
    }

    async fn load_project(
        &self,
        session: &mut dyn GraphSession,
        stats: &mut PipelineStatistics,
    ) -> Result<Option<GlobalId>> {
        let record = match self.source.project_info() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "No project descriptor; spatial roots stay unattached");
                return Ok(None);
            }
        };
        match self.mapper.upsert_node(session, &record).await? {
            MapOutcome::Created(node) => {
                info!(project = %node, "Project loaded");
                Ok(record.global_id)
            }
            MapOutcome::Skipped(reason) => {
                warn!(%reason, "Project skipped");
                stats.skipped_records += 1;
                Ok(None)
            }
            MapOutcome::Failed(reason) => {
                warn!(%reason, "Project upsert failed");
                stats.failed_records += 1;
                Ok(None)
            }
        }
    }

    async fn load_spatial(
        &self,
        session: &mut dyn GraphSession,
        project: Option<&GlobalId>,
        stats: &mut PipelineStatistics,
    ) -> Result<()> {
        let structure = match self.source.spatial_structure() {
            Ok(structure) => structure,
            Err(e) => {
                warn!(error = %e, "Could not read spatial structure");
                return Ok(());
            }
        };
        let mut counters = BatchCounters::default();

        let mut sites = HashSet::new();
        for site in &structure.sites {
            if let Some(key) = self.upsert_spatial(session, site, project, &mut counters).await? {
                sites.insert(key);
            }
        }
        for building in &structure.buildings {
            let parent = building
                .container
                .as_ref()
                .filter(|site| sites.contains(*site))
                .or(project);
            self.upsert_spatial(session, building, parent, &mut counters).await?;
        }
        for storey in &structure.storeys {
            self.upsert_spatial(session, storey, storey.container.as_ref(), &mut counters)
                .await?;
        }
        for space in &structure.spaces {
            self.upsert_spatial(session, space, space.container.as_ref(), &mut counters)
                .await?;
        }

        info!(
            sites = structure.sites.len(),
            buildings = structure.buildings.len(),
            storeys = structure.storeys.len(),
            spaces = structure.spaces.len(),
            "Spatial hierarchy loaded"
        );
        stats.spatial_element_count += counters.elements;
        stats.relationship_count += counters.relationships;
        stats.skipped_records += counters.skipped;
        stats.failed_records += counters.failed;
        Ok(())
    }

    /// Upsert one spatial node and its aggregation edge from `parent`
    async fn upsert_spatial(
        &self,
        session: &mut dyn GraphSession,
        record: &ElementRecord,
        parent: Option<&GlobalId>,
        counters: &mut BatchCounters,
    ) -> Result<Option<GlobalId>> {
        match self.mapper.upsert_node(session, record).await? {
            MapOutcome::Created(_) => counters.elements += 1,
            MapOutcome::Skipped(reason) => {
                debug!(%reason, "spatial record skipped");
                counters.skipped += 1;
                return Ok(None);
            }
            MapOutcome::Failed(_) => {
                counters.failed += 1;
                return Ok(None);
            }
        }
        let Some(key) = record.global_id.clone() else {
            return Ok(None);
        };

        if let Some(parent) = parent {
            let outcome = self
                .mapper
                .upsert_relationship(
                    session,
                    parent,
                    &key,
                    &RelationshipType::Aggregates,
                    &Attributes::new(),
                )
                .await?;
            match outcome {
                MapOutcome::Created(()) => counters.relationships += 1,
                MapOutcome::Skipped(_) => counters.skipped += 1,
                MapOutcome::Failed(_) => counters.failed += 1,
            }
        }
        Ok(Some(key))
    }

    async fn run_batches<T, P>(
        &self,
        mode: ExecutionMode,
        pool: &SessionPool,
        processor: Arc<P>,
        batches: Vec<Batch<T>>,
        stats: &mut PipelineStatistics,
    ) -> Result<()>
    where
        T: Send + Sync + 'static,
        P: BatchProcessor<T, Output = BatchCounters> + 'static,
    {
        let batch_total = batches.len();
        let items: usize = batches.iter().map(|b| b.len()).sum();
        info!(batches = batch_total, items, "Submitting batches");

        let executor = BatchExecutor::new(mode, pool.clone()).with_progress(self.progress.clone());
        let report = executor.run(processor, batches).await?;
        for failure in &report.failures {
            error!(
                domain = %failure.domain,
                batch = failure.index,
                items = failure.items,
                reason = %failure.reason,
                "Batch failed"
            );
        }
        stats.batch_count += batch_total;
        stats.failed_batches += report.failures.len();
        stats.absorb(report.total());
        Ok(())
    }

    async fn run_topology(&self, pool: &SessionPool) -> Result<BTreeMap<String, u64>> {
        let analyzer = self
            .analyzer
            .clone()
            .unwrap_or_else(|| Arc::new(PrecomputedTopology::new(None)));
        let results = analyzer.analyze_topology().await?;

        let mut session = pool.acquire().await?;
        let cleared = self
            .importer
            .clear_topological_relationships(session.session())
            .await?;
        if cleared > 0 {
            info!(cleared, "Removed topological relationships from a previous run");
        }
        self.importer.import_all(session.session(), &results).await
    }

    fn record_summary(&self, state: &RunState) {
        let stats = &state.stats;
        state.record("element_count", stats.element_count as f64, "count");
        state.record("spatial_element_count", stats.spatial_element_count as f64, "count");
        state.record("relationship_count", stats.relationship_count as f64, "count");
        state.record("property_set_count", stats.property_set_count as f64, "count");
        state.record("material_count", stats.material_count as f64, "count");
        state.record(
            "topological_relationship_count",
            stats.topological_relationship_count as f64,
            "count",
        );
        state.record("node_count", stats.node_count as f64, "count");
        state.record("edge_count", stats.edge_count as f64, "count");

        let perf = self.store.performance();
        state.record("store_queries", perf.queries as f64, "count");
        state.record("store_failed_queries", perf.failed_queries as f64, "count");
        state.record("store_average_query", perf.average_query_ms(), "ms");
    }

    fn write_reports(
        &self,
        monitor: &PerformanceMonitor,
        stats: &PipelineStatistics,
        perf: &StorePerformance,
        run_start: Instant,
    ) -> Result<Vec<PathBuf>> {
        let dir = self
            .config
            .monitoring_output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = self.source.name();
        let report_path = dir.join(format!("{name}_perf_report_{timestamp}.txt"));
        let metrics_path = dir.join(format!("{name}_perf_metrics_{timestamp}.json"));

        let report = render_report(monitor, stats, perf, run_start);
        std::fs::write(&report_path, report)?;
        monitor.export_metrics(&metrics_path)?;

        info!(
            report = %report_path.display(),
            metrics = %metrics_path.display(),
            "Performance reports written"
        );
        Ok(vec![report_path, metrics_path])
    }
}

fn render_report(
    monitor: &PerformanceMonitor,
    stats: &PipelineStatistics,
    perf: &StorePerformance,
    run_start: Instant,
) -> String {
    let mut out = monitor.report();
    let rows: [(&str, String); 12] = [
        ("Elements", stats.element_count.to_string()),
        ("Spatial elements", stats.spatial_element_count.to_string()),
        ("Relationships", stats.relationship_count.to_string()),
        ("Property sets", stats.property_set_count.to_string()),
        ("Materials", stats.material_count.to_string()),
        ("Topological relationships", stats.topological_relationship_count.to_string()),
        ("Skipped records", stats.skipped_records.to_string()),
        ("Failed records", stats.failed_records.to_string()),
        ("Batches", format!("{} ({} failed)", stats.batch_count, stats.failed_batches)),
        ("Nodes", stats.node_count.to_string()),
        ("Edges", stats.edge_count.to_string()),
        ("Elapsed", format!("{:.2}s", run_start.elapsed().as_secs_f64())),
    ];

    let _ = writeln!(out, "\nPipeline statistics");
    for (label, value) in rows {
        let _ = writeln!(out, "  {label}: {value}");
    }
    let _ = writeln!(
        out,
        "  Mode: {}",
        if stats.parallel_processing {
            format!("parallel ({} workers)", stats.parallel_workers)
        } else {
            "sequential".to_string()
        }
    );

    let _ = writeln!(out, "\nGraph store ({})", perf.store);
    let _ = writeln!(out, "  Queries: {} ({} failed)", perf.queries, perf.failed_queries);
    let _ = writeln!(out, "  Average query: {:.3} ms", perf.average_query_ms());
    let _ = writeln!(
        out,
        "  Sessions: {} opened, {} peak",
        perf.sessions_opened, perf.peak_open_sessions
    );
    out
}
