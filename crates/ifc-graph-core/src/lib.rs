//! IFC Graph Core - building-model to property-graph ingestion
//!
//! This crate turns a parsed building model into a property graph:
//! - Spatial hierarchy (project, sites, buildings, storeys, spaces)
//! - Physical elements with property sets, materials and containment
//! - Generic model relationships, with placeholders for unknown endpoints
//! - Optional topological enrichment (adjacency, containment, boundaries)
//! - Batched loading, sequential or over a bounded worker pool
//! - Performance monitoring with text and JSON reports
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Pipeline                        │
//! │  (phases, statistics, reports)              │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │     Partitioner + Batch Executor             │
//! │  (ordered results, failure isolation)       │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │            Graph Mapper                      │
//! │  (idempotent upserts, normalization)        │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │        Graph Store / Session Pool            │
//! │   (in-memory, Cypher over HTTP)             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ifc_graph_core::{JsonSourceModel, MemoryGraphStore, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> ifc_graph_core::Result<()> {
//! let model = JsonSourceModel::load("tower.json").await?;
//! let store = Arc::new(MemoryGraphStore::new());
//! let stats = Pipeline::new(PipelineConfig::default(), Arc::new(model), store)
//!     .run()
//!     .await?;
//! println!("{} elements", stats.element_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod graph;
pub mod mapper;
pub mod model;
pub mod monitor;
pub mod normalize;
pub mod partition;
pub mod pipeline;
pub mod source;
pub mod topology;

pub use error::{Error, Result};
pub use executor::{BatchExecutor, BatchFailure, BatchProcessor, BatchProgress, ExecutionMode, ProgressCallback};
pub use graph::{GraphSession, GraphStore, HttpGraphStore, HttpStoreConfig, MemoryGraphStore, SessionPool};
pub use mapper::{GraphMapper, MapOutcome};
pub use model::{ElementRecord, GlobalId, MaterialRecord, PropertySetRecord, RelationshipRecord, RelationshipType};
pub use monitor::PerformanceMonitor;
pub use partition::{partition, Batch, BatchDomain};
pub use pipeline::{Phase, Pipeline, PipelineConfig, PipelineStatistics};
pub use source::{JsonSourceModel, ModelSummary, SourceModel, SpatialStructure};
pub use topology::{GraphTopologyImporter, PrecomputedTopology, TopologyAnalyzer, TopologyImporter, TopologyResults};
