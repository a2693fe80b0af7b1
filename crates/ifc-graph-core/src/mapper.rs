//! Translation of domain records into idempotent graph upserts.
//!
//! Every operation returns a [`MapOutcome`] for record-level problems and
//! reserves `Err` for fatal store failures, so a batch can keep going past a
//! bad record and still stop on a lost connection.

use crate::error::Result;
use crate::graph::{
    sanitize_label, EdgeUpsert, GraphSession, NodeRef, NodeUpsert, PropertyMap, PropertyMerge,
    PropertyValue,
};
use crate::model::{Attributes, ChildRecord, ElementRecord, GlobalId, RelationshipRecord, RelationshipType};
use crate::normalize::normalize_attributes;
use tracing::{debug, warn};

/// Result of mapping one record
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome<T> {
    /// The write was applied
    Created(T),
    /// Nothing was written; the record is incomplete
    Skipped(String),
    /// The store rejected the write
    Failed(String),
}

impl<T> MapOutcome<T> {
    /// True for `Created`
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// True for `Skipped`
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// True for `Failed`
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The created value, if any
    pub fn created(self) -> Option<T> {
        match self {
            Self::Created(value) => Some(value),
            _ => None,
        }
    }
}

/// Keep fatal errors, turn the rest into a failure reason
fn recover<T>(result: Result<T>) -> Result<std::result::Result<T, String>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => Ok(Err(e.to_string())),
    }
}

/// Stateless mapper, cheap to clone into every worker
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphMapper;

impl GraphMapper {
    /// Create a mapper
    pub fn new() -> Self {
        Self
    }

    /// Build the node merge for a record, `None` without an identity key
    pub fn node_for(&self, record: &ElementRecord) -> Option<NodeUpsert> {
        let global_id = record.global_id.as_ref()?;
        let mut properties = normalize_attributes(&record.attributes);
        properties.insert("GlobalId".to_string(), PropertyValue::from(global_id.as_str()));

        let mut labels = Vec::new();
        let type_tag = record.type_tag.trim();
        if !type_tag.is_empty() {
            properties.insert("IFCType".to_string(), PropertyValue::from(type_tag));
            labels.push(sanitize_label(type_tag));
        }

        Some(NodeUpsert {
            node: NodeRef::entity(global_id.as_str()),
            labels,
            properties,
            merge: PropertyMerge::Replace,
        })
    }

    /// Merge an element node by identity key
    pub async fn upsert_node(
        &self,
        session: &mut dyn GraphSession,
        record: &ElementRecord,
    ) -> Result<MapOutcome<NodeRef>> {
        let Some(upsert) = self.node_for(record) else {
            return Ok(MapOutcome::Skipped(format!(
                "{} record has no GlobalId",
                if record.type_tag.is_empty() { "untyped" } else { record.type_tag.as_str() }
            )));
        };

        Ok(match recover(session.merge_node(&upsert).await)? {
            Ok(()) => MapOutcome::Created(upsert.node),
            Err(reason) => {
                warn!(node = %upsert.node, %reason, "node upsert failed");
                MapOutcome::Failed(reason)
            }
        })
    }

    /// Merge an edge between two entity keys, creating placeholders for
    /// endpoints that do not exist yet
    pub async fn upsert_relationship(
        &self,
        session: &mut dyn GraphSession,
        source: &GlobalId,
        target: &GlobalId,
        rel_type: &RelationshipType,
        properties: &Attributes,
    ) -> Result<MapOutcome<()>> {
        let edge = EdgeUpsert {
            source: NodeRef::entity(source.as_str()),
            target: NodeRef::entity(target.as_str()),
            rel_type: rel_type.edge_type(),
            properties: normalize_attributes(properties),
        };
        self.merge_edge_with_placeholders(session, edge).await
    }

    /// Merge a relationship record; records missing an endpoint are skipped
    pub async fn upsert_record(
        &self,
        session: &mut dyn GraphSession,
        record: &RelationshipRecord,
    ) -> Result<MapOutcome<()>> {
        match record.endpoints() {
            Some((source, target)) => {
                self.upsert_relationship(session, source, target, &record.rel_type, &record.properties)
                    .await
            }
            None => Ok(MapOutcome::Skipped(format!(
                "{} relationship is missing an endpoint key",
                record.rel_type
            ))),
        }
    }

    /// Merge an edge carrying pre-normalized properties
    pub async fn upsert_edge(
        &self,
        session: &mut dyn GraphSession,
        source: &str,
        target: &str,
        rel_type: &str,
        properties: PropertyMap,
    ) -> Result<MapOutcome<()>> {
        if source.trim().is_empty() || target.trim().is_empty() {
            return Ok(MapOutcome::Skipped(format!("{rel_type} edge is missing an endpoint key")));
        }
        let edge = EdgeUpsert {
            source: NodeRef::entity(source),
            target: NodeRef::entity(target),
            rel_type: rel_type.to_string(),
            properties,
        };
        self.merge_edge_with_placeholders(session, edge).await
    }

    async fn merge_edge_with_placeholders(
        &self,
        session: &mut dyn GraphSession,
        edge: EdgeUpsert,
    ) -> Result<MapOutcome<()>> {
        for endpoint in [&edge.source, &edge.target] {
            match recover(session.ensure_node(endpoint).await)? {
                Ok(true) => debug!(node = %endpoint, "created placeholder for unresolved endpoint"),
                Ok(false) => {}
                Err(reason) => {
                    warn!(node = %endpoint, %reason, "placeholder creation failed");
                    return Ok(MapOutcome::Failed(reason));
                }
            }
        }

        Ok(match recover(session.merge_edge(&edge).await)? {
            Ok(()) => MapOutcome::Created(()),
            Err(reason) => {
                warn!(source = %edge.source, target = %edge.target, rel_type = %edge.rel_type, %reason, "edge upsert failed");
                MapOutcome::Failed(reason)
            }
        })
    }

    /// Create a property set or material node and link it from its owner.
    /// The owner must already exist.
    pub async fn attach_child(
        &self,
        session: &mut dyn GraphSession,
        owner: &GlobalId,
        child: ChildRecord<'_>,
    ) -> Result<MapOutcome<NodeRef>> {
        let Some(node) = self.child_node(owner, child) else {
            return Ok(MapOutcome::Skipped(format!("empty {:?} payload", child.kind())));
        };

        if let Err(reason) = recover(session.merge_node(&node).await)? {
            warn!(node = %node.node, %reason, "child upsert failed");
            return Ok(MapOutcome::Failed(reason));
        }

        let edge = EdgeUpsert {
            source: NodeRef::entity(owner.as_str()),
            target: node.node.clone(),
            rel_type: child.kind().relationship_type().edge_type(),
            properties: PropertyMap::new(),
        };
        Ok(match recover(session.merge_edge(&edge).await)? {
            Ok(()) => MapOutcome::Created(node.node),
            Err(reason) => {
                warn!(owner = %owner, child = %edge.target, %reason, "child edge upsert failed");
                MapOutcome::Failed(reason)
            }
        })
    }

    fn child_node(&self, owner: &GlobalId, child: ChildRecord<'_>) -> Option<NodeUpsert> {
        match child {
            ChildRecord::PropertySet(pset) => {
                if pset.is_empty() {
                    return None;
                }
                let key = match &pset.global_id {
                    Some(id) => id.to_string(),
                    None => format!("{owner}:{}", pset.name),
                };
                let mut properties = normalize_attributes(&pset.properties);
                if !pset.name.trim().is_empty() {
                    properties.insert("name".to_string(), PropertyValue::from(pset.name.as_str()));
                }
                Some(NodeUpsert {
                    node: NodeRef::property_set(key),
                    labels: Vec::new(),
                    properties,
                    merge: PropertyMerge::Replace,
                })
            }
            ChildRecord::Material(material) => {
                if material.is_empty() {
                    return None;
                }
                // Shared by every element that names it
                let name = material.name.trim();
                Some(NodeUpsert {
                    node: NodeRef::material(name),
                    labels: Vec::new(),
                    properties: normalize_attributes(&material.properties),
                    merge: PropertyMerge::Extend,
                })
            }
        }
    }

    /// Remove the whole graph in one statement
    pub async fn clear_all(&self, session: &mut dyn GraphSession) -> Result<()> {
        session.clear_all().await
    }

    /// Authoritative node count
    pub async fn count_nodes(&self, session: &mut dyn GraphSession) -> Result<u64> {
        session.count_nodes().await
    }

    /// Authoritative edge count
    pub async fn count_edges(&self, session: &mut dyn GraphSession) -> Result<u64> {
        session.count_edges().await
    }
}
