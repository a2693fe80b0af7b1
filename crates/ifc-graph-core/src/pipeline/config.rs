//! Run configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wipe the graph before loading
    pub clear_existing: bool,
    /// Relationship batch size, and element batch size in sequential mode
    pub batch_size: usize,
    /// Element batch size in parallel mode
    pub parallel_batch_size: usize,
    /// Use the worker pool for elements and relationships
    pub parallel_processing: bool,
    /// Worker count, host parallelism when unset
    pub max_workers: Option<usize>,
    /// Record metrics and write reports
    pub enable_monitoring: bool,
    /// Run the topology phase
    pub enable_topological_analysis: bool,
    /// Where reports go, working directory when unset
    pub monitoring_output_dir: Option<PathBuf>,
    /// Session pool size, worker count when unset
    pub pool_size: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clear_existing: false,
            batch_size: 100,
            parallel_batch_size: 200,
            parallel_processing: false,
            max_workers: None,
            enable_monitoring: false,
            enable_topological_analysis: false,
            monitoring_output_dir: None,
            pool_size: None,
        }
    }
}

impl PipelineConfig {
    /// Reject impossible settings
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::configuration("batch_size must be greater than zero"));
        }
        if self.parallel_batch_size == 0 {
            return Err(Error::configuration("parallel_batch_size must be greater than zero"));
        }
        if self.max_workers == Some(0) {
            return Err(Error::configuration("max_workers must be at least 1"));
        }
        if let Some(pool_size) = self.pool_size {
            let workers = self.effective_workers();
            if pool_size < workers {
                return Err(Error::configuration(format!(
                    "pool_size ({pool_size}) must be at least the worker count ({workers})"
                )));
            }
        }
        Ok(())
    }

    /// Workers used by the batched phases
    pub fn effective_workers(&self) -> usize {
        if !self.parallel_processing {
            return 1;
        }
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Session pool size
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size
            .unwrap_or(0)
            .max(self.effective_workers())
    }

    /// Batch size of the ELEMENTS phase
    pub fn element_batch_size(&self) -> usize {
        if self.parallel_processing {
            self.parallel_batch_size
        } else {
            self.batch_size
        }
    }

    /// Batch size of the RELATIONSHIPS phase
    pub fn relationship_batch_size(&self) -> usize {
        self.batch_size
    }
}
