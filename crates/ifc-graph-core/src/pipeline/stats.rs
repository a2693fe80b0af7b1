//! Run statistics and phase timing

use super::Phase;
use crate::monitor::PerformanceMonitor;
use crate::model::Attributes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Per-batch write counters; summing is commutative, so totals do not
/// depend on completion order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounters {
    /// Element nodes upserted
    pub elements: u64,
    /// Property sets attached
    pub property_sets: u64,
    /// Materials attached
    pub materials: u64,
    /// Relationship edges created
    pub relationships: u64,
    /// Records skipped (no key, unreadable, missing endpoint)
    pub skipped: u64,
    /// Writes the store rejected
    pub failed: u64,
}

impl AddAssign for BatchCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.elements += rhs.elements;
        self.property_sets += rhs.property_sets;
        self.materials += rhs.materials;
        self.relationships += rhs.relationships;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

impl Add for BatchCounters {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for BatchCounters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Duration of one phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTiming {
    /// Phase
    pub phase: Phase,
    /// Elapsed seconds
    pub seconds: f64,
}

/// Shared sink the phase timers write into
pub type TimingSink = Arc<Mutex<Vec<PhaseTiming>>>;

/// Records how long a phase took when dropped, on every exit path
pub struct PhaseTimer {
    phase: Phase,
    start: Instant,
    sink: TimingSink,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl PhaseTimer {
    /// Start timing `phase`
    pub fn start(phase: Phase, sink: &TimingSink, monitor: Option<&Arc<PerformanceMonitor>>) -> Self {
        Self {
            phase,
            start: Instant::now(),
            sink: Arc::clone(sink),
            monitor: monitor.cloned(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        info!("Phase {} complete in {:.2}s", self.phase, elapsed.as_secs_f64());
        self.sink.lock().push(PhaseTiming {
            phase: self.phase,
            seconds: elapsed.as_secs_f64(),
        });
        if let Some(monitor) = &self.monitor {
            let mut context = Attributes::new();
            context.insert("phase".to_string(), self.phase.as_str().into());
            monitor.record_metric(
                &format!("{}_duration", self.phase.as_str()),
                elapsed.as_secs_f64() * 1000.0,
                "ms",
                context,
            );
        }
    }
}

/// Statistics returned by a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatistics {
    /// Element nodes upserted
    pub element_count: u64,
    /// Sites, buildings, storeys and spaces upserted
    pub spatial_element_count: u64,
    /// Edges created by aggregation, containment and generic relationships
    pub relationship_count: u64,
    /// Property sets attached
    pub property_set_count: u64,
    /// Materials attached
    pub material_count: u64,
    /// Edges created by topological analysis
    pub topological_relationship_count: u64,
    /// Topological edges per category
    pub topology_breakdown: BTreeMap<String, u64>,
    /// Records skipped
    pub skipped_records: u64,
    /// Writes the store rejected
    pub failed_records: u64,
    /// Batches submitted across both batched phases
    pub batch_count: usize,
    /// Batches that contributed zero because they failed
    pub failed_batches: usize,
    /// Nodes in the store at the end of the run
    pub node_count: u64,
    /// Edges in the store at the end of the run
    pub edge_count: u64,
    /// Whether the worker pool was used
    pub parallel_processing: bool,
    /// Workers in the batched phases
    pub parallel_workers: usize,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration
    pub elapsed_seconds: f64,
    /// Duration of every phase that ran, in order
    pub phase_timings: Vec<PhaseTiming>,
    /// Last phase reached
    pub final_phase: Phase,
    /// Performance report and metrics files written by the run
    pub report_files: Vec<PathBuf>,
}

impl PipelineStatistics {
    /// Fresh statistics at the start of a run
    pub fn new(parallel_processing: bool, parallel_workers: usize) -> Self {
        Self {
            element_count: 0,
            spatial_element_count: 0,
            relationship_count: 0,
            property_set_count: 0,
            material_count: 0,
            topological_relationship_count: 0,
            topology_breakdown: BTreeMap::new(),
            skipped_records: 0,
            failed_records: 0,
            batch_count: 0,
            failed_batches: 0,
            node_count: 0,
            edge_count: 0,
            parallel_processing,
            parallel_workers,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_seconds: 0.0,
            phase_timings: Vec::new(),
            final_phase: Phase::Init,
            report_files: Vec::new(),
        }
    }

    /// Add one phase's batch totals
    pub fn absorb(&mut self, counters: BatchCounters) {
        self.element_count += counters.elements;
        self.property_set_count += counters.property_sets;
        self.material_count += counters.materials;
        self.relationship_count += counters.relationships;
        self.skipped_records += counters.skipped;
        self.failed_records += counters.failed;
    }

    /// Seconds spent in `phase`, if it ran
    pub fn phase_seconds(&self, phase: Phase) -> Option<f64> {
        self.phase_timings
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.seconds)
    }

    pub(crate) fn finish(&mut self, timings: &TimingSink) {
        let finished = Utc::now();
        self.elapsed_seconds = (finished - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.finished_at = Some(finished);
        self.phase_timings = timings.lock().clone();
        self.final_phase = Phase::Done;
    }
}
