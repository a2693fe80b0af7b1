//! Batch processors for the ELEMENTS and RELATIONSHIPS phases

use super::stats::BatchCounters;
use crate::error::Result;
use crate::executor::BatchProcessor;
use crate::graph::GraphSession;
use crate::mapper::{GraphMapper, MapOutcome};
use crate::model::{ChildRecord, RelationshipRecord, RelationshipType};
use crate::partition::Batch;
use crate::source::SourceModel;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes elements with their property sets, materials and container edge
pub struct ElementBatchProcessor<S: SourceModel> {
    source: Arc<S>,
    mapper: GraphMapper,
}

impl<S: SourceModel> ElementBatchProcessor<S> {
    /// Create a processor reading from `source`
    pub fn new(source: Arc<S>, mapper: GraphMapper) -> Self {
        Self { source, mapper }
    }
}

fn count<T>(outcome: &MapOutcome<T>, created: &mut u64, failed: &mut u64) {
    match outcome {
        MapOutcome::Created(_) => *created += 1,
        MapOutcome::Skipped(_) => {}
        MapOutcome::Failed(_) => *failed += 1,
    }
}

#[async_trait]
impl<S: SourceModel> BatchProcessor<S::Element> for ElementBatchProcessor<S> {
    type Output = BatchCounters;

    async fn process(
        &self,
        session: &mut dyn GraphSession,
        batch: &Batch<S::Element>,
    ) -> Result<BatchCounters> {
        let mut counters = BatchCounters::default();

        for element in &batch.items {
            let record = match self.source.element_attributes(element) {
                Ok(record) => record,
                Err(e) => {
                    debug!(batch = batch.index, error = %e, "skipping unreadable element");
                    counters.skipped += 1;
                    continue;
                }
            };
            let Some(global_id) = record.global_id.clone() else {
                debug!(batch = batch.index, type_tag = %record.type_tag, "skipping element without GlobalId");
                counters.skipped += 1;
                continue;
            };

            match self.mapper.upsert_node(session, &record).await? {
                MapOutcome::Created(_) => counters.elements += 1,
                MapOutcome::Skipped(_) => {
                    counters.skipped += 1;
                    continue;
                }
                MapOutcome::Failed(_) => {
                    counters.failed += 1;
                    continue;
                }
            }

            let property_sets = self.source.element_property_sets(element).unwrap_or_else(|e| {
                warn!(global_id = %global_id, error = %e, "could not read property sets");
                Vec::new()
            });
            for pset in &property_sets {
                let outcome = self
                    .mapper
                    .attach_child(session, &global_id, ChildRecord::PropertySet(pset))
                    .await?;
                count(&outcome, &mut counters.property_sets, &mut counters.failed);
            }

            let materials = self.source.element_materials(element).unwrap_or_else(|e| {
                warn!(global_id = %global_id, error = %e, "could not read materials");
                Vec::new()
            });
            for material in &materials {
                let outcome = self
                    .mapper
                    .attach_child(session, &global_id, ChildRecord::Material(material))
                    .await?;
                count(&outcome, &mut counters.materials, &mut counters.failed);
            }

            let container = self.source.element_container(element).unwrap_or_else(|e| {
                warn!(global_id = %global_id, error = %e, "could not read spatial container");
                None
            });
            if let Some(container) = container {
                let outcome = self
                    .mapper
                    .upsert_relationship(
                        session,
                        &global_id,
                        &container,
                        &RelationshipType::ContainedIn,
                        &Default::default(),
                    )
                    .await?;
                count(&outcome, &mut counters.relationships, &mut counters.failed);
            }
        }

        Ok(counters)
    }
}

/// Writes generic relationship records
#[derive(Debug, Clone, Default)]
pub struct RelationshipBatchProcessor {
    mapper: GraphMapper,
}

impl RelationshipBatchProcessor {
    /// Create a processor
    pub fn new(mapper: GraphMapper) -> Self {
        Self { mapper }
    }
}

#[async_trait]
impl BatchProcessor<RelationshipRecord> for RelationshipBatchProcessor {
    type Output = BatchCounters;

    async fn process(
        &self,
        session: &mut dyn GraphSession,
        batch: &Batch<RelationshipRecord>,
    ) -> Result<BatchCounters> {
        let mut counters = BatchCounters::default();
        for record in &batch.items {
            match self.mapper.upsert_record(session, record).await? {
                MapOutcome::Created(()) => counters.relationships += 1,
                MapOutcome::Skipped(reason) => {
                    debug!(batch = batch.index, %reason, "skipping relationship");
                    counters.skipped += 1;
                }
                MapOutcome::Failed(_) => counters.failed += 1,
            }
        }
        Ok(counters)
    }
}
