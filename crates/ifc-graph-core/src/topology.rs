//! Topological enrichment.
//!
//! An analyzer computes spatial relations (adjacency, containment, space
//! boundaries, connectivity) and an importer replaces the previous
//! analysis' edges with the new set. Every imported edge is tagged with
//! `relationshipSource = "topologicalAnalysis"` so re-imports only touch
//! their own edges.

use crate::error::{Error, Result};
use crate::graph::{GraphSession, PropertyMap, PropertyValue};
use crate::mapper::{GraphMapper, MapOutcome};
use crate::model::Attributes;
use crate::normalize::normalize_attributes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Property marking edges created by topological analysis
pub const TOPOLOGY_SOURCE_PROPERTY: &str = "relationshipSource";
/// Value of [`TOPOLOGY_SOURCE_PROPERTY`]
pub const TOPOLOGY_SOURCE_VALUE: &str = "topologicalAnalysis";

/// Edge type for adjacent elements
pub const ADJACENT: &str = "ADJACENT";
/// Edge type from container to contained element
pub const CONTAINS_TOPOLOGICALLY: &str = "CONTAINS_TOPOLOGICALLY";
/// Inverse of [`CONTAINS_TOPOLOGICALLY`]
pub const IS_CONTAINED_IN: &str = "IS_CONTAINED_IN";
/// Edge type from space to bounding element
pub const IS_BOUNDED_BY: &str = "IS_BOUNDED_BY";
/// Inverse of [`IS_BOUNDED_BY`]
pub const BOUNDS_SPACE: &str = "BOUNDS_SPACE";

/// A typed connectivity edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityEdge {
    /// Source key
    pub source: String,
    /// Target key
    pub target: String,
    /// Edge type, e.g. `CONNECTS_SPACES`
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Extra edge properties
    #[serde(default)]
    pub properties: Attributes,
}

/// Output of a topological analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyResults {
    /// Element → adjacent elements
    #[serde(default)]
    pub adjacency: BTreeMap<String, Vec<String>>,
    /// Container → contained elements
    #[serde(default)]
    pub containment: BTreeMap<String, Vec<String>>,
    /// Space → bounding elements
    #[serde(default)]
    pub space_boundaries: BTreeMap<String, Vec<String>>,
    /// Typed connectivity edges
    #[serde(default)]
    pub connectivity: Vec<ConnectivityEdge>,
}

impl TopologyResults {
    /// True when no relation was found
    pub fn is_empty(&self) -> bool {
        self.adjacency.values().all(Vec::is_empty)
            && self.containment.values().all(Vec::is_empty)
            && self.space_boundaries.values().all(Vec::is_empty)
            && self.connectivity.is_empty()
    }
}

/// Computes topological relations of a model
#[async_trait]
pub trait TopologyAnalyzer: Send + Sync {
    /// Run the analysis
    async fn analyze_topology(&self) -> Result<TopologyResults>;
}

/// Writes topological relations into the graph
#[async_trait]
pub trait TopologyImporter: Send + Sync {
    /// Delete edges left by a previous analysis, returning how many
    async fn clear_topological_relationships(&self, session: &mut dyn GraphSession) -> Result<u64>;

    /// Import all relations; returns category → edges created
    async fn import_all(
        &self,
        session: &mut dyn GraphSession,
        results: &TopologyResults,
    ) -> Result<BTreeMap<String, u64>>;
}

/// Serves results computed ahead of time, e.g. shipped with the model
#[derive(Debug, Clone, Default)]
pub struct PrecomputedTopology {
    results: Option<TopologyResults>,
}

impl PrecomputedTopology {
    /// Wrap results; `None` makes every analysis fail
    pub fn new(results: Option<TopologyResults>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl TopologyAnalyzer for PrecomputedTopology {
    async fn analyze_topology(&self) -> Result<TopologyResults> {
        self.results
            .clone()
            .ok_or_else(|| Error::enrichment("model carries no topology data"))
    }
}

/// One edge to import
#[derive(Debug, Clone)]
struct PlannedEdge {
    source: String,
    target: String,
    rel_type: String,
    properties: PropertyMap,
}

/// Imports topology through the [`GraphMapper`], so endpoints missing from
/// the graph become placeholders
#[derive(Debug, Clone)]
pub struct GraphTopologyImporter {
    mapper: GraphMapper,
    distance_tolerance: f64,
}

impl Default for GraphTopologyImporter {
    fn default() -> Self {
        Self {
            mapper: GraphMapper::new(),
            distance_tolerance: 0.001,
        }
    }
}

impl GraphTopologyImporter {
    /// Create an importer
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerance recorded on adjacency edges
    pub fn with_distance_tolerance(mut self, tolerance: f64) -> Self {
        self.distance_tolerance = tolerance;
        self
    }

    fn base_properties(kind: &str) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert(TOPOLOGY_SOURCE_PROPERTY.to_string(), PropertyValue::from(TOPOLOGY_SOURCE_VALUE));
        props.insert("relationshipType".to_string(), PropertyValue::from(kind));
        props
    }

    fn plan_adjacency(&self, results: &TopologyResults) -> Vec<PlannedEdge> {
        let mut props = Self::base_properties("adjacency");
        props.insert("distanceTolerance".to_string(), PropertyValue::Float(self.distance_tolerance));
        pairs(&results.adjacency)
            .map(|(a, b)| PlannedEdge {
                source: a.to_string(),
                target: b.to_string(),
                rel_type: ADJACENT.to_string(),
                properties: props.clone(),
            })
            .collect()
    }

    fn plan_containment(results: &TopologyResults) -> Vec<PlannedEdge> {
        let mut props = Self::base_properties("containment");
        props.insert("containmentType".to_string(), PropertyValue::from("full"));
        paired_with_inverse(&results.containment, CONTAINS_TOPOLOGICALLY, IS_CONTAINED_IN, &props)
    }

    fn plan_space_boundaries(results: &TopologyResults) -> Vec<PlannedEdge> {
        let mut props = Self::base_properties("spaceBoundary");
        props.insert("boundaryType".to_string(), PropertyValue::from("physical"));
        paired_with_inverse(&results.space_boundaries, IS_BOUNDED_BY, BOUNDS_SPACE, &props)
    }

    fn plan_connectivity(results: &TopologyResults) -> Vec<PlannedEdge> {
        results
            .connectivity
            .iter()
            .map(|edge| {
                let mut props = normalize_attributes(&edge.properties);
                props.extend(Self::base_properties("connectivity"));
                PlannedEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    rel_type: crate::model::RelationshipType::parse(&edge.rel_type).edge_type(),
                    properties: props,
                }
            })
            .collect()
    }

    async fn import_edges(
        &self,
        session: &mut dyn GraphSession,
        category: &str,
        edges: Vec<PlannedEdge>,
    ) -> Result<u64> {
        let mut seen = HashSet::new();
        let mut created = 0;
        let mut failed = 0;
        for edge in edges {
            if !seen.insert((edge.source.clone(), edge.rel_type.clone(), edge.target.clone())) {
                continue;
            }
            match self
                .mapper
                .upsert_edge(session, &edge.source, &edge.target, &edge.rel_type, edge.properties)
                .await?
            {
                MapOutcome::Created(()) => created += 1,
                MapOutcome::Skipped(_) => {}
                MapOutcome::Failed(_) => failed += 1,
            }
        }
        if failed > 0 {
            warn!(category, failed, "some topological relationships could not be imported");
        }
        Ok(created)
    }
}

fn pairs(map: &BTreeMap<String, Vec<String>>) -> impl Iterator<Item = (&str, &str)> {
    map.iter()
        .flat_map(|(key, related)| related.iter().map(move |other| (key.as_str(), other.as_str())))
}

fn paired_with_inverse(
    map: &BTreeMap<String, Vec<String>>,
    forward: &str,
    inverse: &str,
    props: &PropertyMap,
) -> Vec<PlannedEdge> {
    pairs(map)
        .flat_map(|(owner, other)| {
            [
                PlannedEdge {
                    source: owner.to_string(),
                    target: other.to_string(),
                    rel_type: forward.to_string(),
                    properties: props.clone(),
                },
                PlannedEdge {
                    source: other.to_string(),
                    target: owner.to_string(),
                    rel_type: inverse.to_string(),
                    properties: props.clone(),
                },
            ]
        })
        .collect()
}

#[async_trait]
impl TopologyImporter for GraphTopologyImporter {
    async fn clear_topological_relationships(&self, session: &mut dyn GraphSession) -> Result<u64> {
        let removed = session
            .delete_edges_where(TOPOLOGY_SOURCE_PROPERTY, &PropertyValue::from(TOPOLOGY_SOURCE_VALUE))
            .await?;
        info!(removed, "cleared previous topological relationships");
        Ok(removed)
    }

    async fn import_all(
        &self,
        session: &mut dyn GraphSession,
        results: &TopologyResults,
    ) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        counts.insert(
            "adjacency".to_string(),
            self.import_edges(session, "adjacency", self.plan_adjacency(results)).await?,
        );
        counts.insert(
            "containment".to_string(),
            self.import_edges(session, "containment", Self::plan_containment(results)).await?,
        );
        counts.insert(
            "space_boundaries".to_string(),
            self.import_edges(session, "space_boundaries", Self::plan_space_boundaries(results))
                .await?,
        );
        counts.insert(
            "connectivity".to_string(),
            self.import_edges(session, "connectivity", Self::plan_connectivity(results)).await?,
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, MemoryGraphStore, NodeRef};
    use serde_json::json;

    fn results() -> TopologyResults {
        serde_json::from_value(json!({
            "adjacency": {"W1": ["W2"], "W2": ["W1"]},
            "containment": {"R1": ["C1"]},
            "space_boundaries": {"R1": ["W1", "W2"]},
            "connectivity": [
                {"source": "R1", "target": "R2", "type": "CONNECTS_SPACES"},
                {"source": "R1", "target": "R2", "type": "CONNECTS_SPACES"}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_import_all_counts_per_category() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        let counts = GraphTopologyImporter::new()
            .import_all(session.as_mut(), &results())
            .await
            .unwrap();

        assert_eq!(counts["adjacency"], 2);
        assert_eq!(counts["containment"], 2);
        assert_eq!(counts["space_boundaries"], 4);
        assert_eq!(counts["connectivity"], 1);
        assert_eq!(store.edge_count(), 9);

        let edge = store
            .edge(&NodeRef::entity("R1"), IS_BOUNDED_BY, &NodeRef::entity("W1"))
            .unwrap();
        assert_eq!(edge["boundaryType"], PropertyValue::from("physical"));
        assert!(store
            .edge(&NodeRef::entity("W1"), BOUNDS_SPACE, &NodeRef::entity("R1"))
            .is_some());
        assert!(store.node(&NodeRef::entity("C1")).unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn test_reimport_replaces_only_topological_edges() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        let mapper = GraphMapper::new();
        mapper
            .upsert_edge(session.as_mut(), "W1", "W2", "CONNECTS_TO", PropertyMap::new())
            .await
            .unwrap();

        let importer = GraphTopologyImporter::new();
        importer.import_all(session.as_mut(), &results()).await.unwrap();
        let removed = importer
            .clear_topological_relationships(session.as_mut())
            .await
            .unwrap();

        assert_eq!(removed, 9);
        assert_eq!(store.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_precomputed_without_data_fails() {
        let err = PrecomputedTopology::new(None).analyze_topology().await.unwrap_err();
        assert!(matches!(err, Error::Enrichment(_)));
        let ok = PrecomputedTopology::new(Some(results())).analyze_topology().await.unwrap();
        assert!(!ok.is_empty());
    }
}
