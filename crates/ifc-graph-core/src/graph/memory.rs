//! In-process property graph.
//!
//! Used for dry runs, inspection and tests. All sessions share one graph
//! behind a read-write lock; each primitive takes the lock once, so
//! `clear_all` is observed either entirely or not at all.

use super::{
    EdgeUpsert, GraphSession, GraphStore, NodeDomain, NodeRef, NodeUpsert, PerformanceCounters,
    PropertyMap, PropertyMerge, PropertyValue, SchemaItem, SchemaSpec, StorePerformance, UNRESOLVED_LABEL,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A stored node
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    /// All labels, including the domain label
    pub labels: BTreeSet<String>,
    /// Properties
    pub properties: PropertyMap,
}

impl StoredNode {
    /// True if the node carries `label`
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// True if this node is a placeholder for an unresolved endpoint
    pub fn is_placeholder(&self) -> bool {
        self.has_label(UNRESOLVED_LABEL)
    }
}

/// Edge identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    /// Source node
    pub source: NodeRef,
    /// Edge type
    pub rel_type: String,
    /// Target node
    pub target: NodeRef,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeRef, StoredNode>,
    edges: BTreeMap<EdgeKey, PropertyMap>,
    schema: Vec<SchemaItem>,
}

/// In-memory graph store
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
    counters: Arc<PerformanceCounters>,
    next_session: Arc<AtomicU64>,
}

impl MemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node
    pub fn node(&self, node: &NodeRef) -> Option<StoredNode> {
        self.state.read().nodes.get(node).cloned()
    }

    /// Look up an edge's properties
    pub fn edge(&self, source: &NodeRef, rel_type: &str, target: &NodeRef) -> Option<PropertyMap> {
        let key = EdgeKey {
            source: source.clone(),
            rel_type: rel_type.to_string(),
            target: target.clone(),
        };
        self.state.read().edges.get(&key).cloned()
    }

    /// All edges of one type
    pub fn edges_of_type(&self, rel_type: &str) -> Vec<(EdgeKey, PropertyMap)> {
        self.state
            .read()
            .edges
            .iter()
            .filter(|(key, _)| key.rel_type == rel_type)
            .map(|(key, props)| (key.clone(), props.clone()))
            .collect()
    }

    /// Number of nodes carrying `label`
    pub fn count_label(&self, label: &str) -> usize {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .count()
    }

    /// Total node count
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Total edge count
    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    /// Schema items applied so far
    pub fn schema(&self) -> Vec<SchemaItem> {
        self.state.read().schema.clone()
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> u64 {
        self.counters.open_sessions()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open_session(&self) -> Result<Box<dyn GraphSession>> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.counters.session_opened();
        Ok(Box::new(MemorySession {
            id,
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn verify_connectivity(&self) -> Result<()> {
        Ok(())
    }

    fn performance(&self) -> StorePerformance {
        self.counters.snapshot(self.name())
    }
}

/// Session on a [`MemoryGraphStore`]
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    state: Arc<RwLock<GraphState>>,
    counters: Arc<PerformanceCounters>,
}

impl MemorySession {
    /// Session number, unique per store
    pub fn id(&self) -> u64 {
        self.id
    }

    fn timed<T>(&self, f: impl FnOnce(&mut GraphState) -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = {
            let mut state = self.state.write();
            f(&mut state)
        };
        self.counters.record_query(start.elapsed(), result.is_ok());
        result
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.counters.session_closed();
    }
}

fn domain_labels(domain: NodeDomain, extra: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    let mut labels: BTreeSet<String> = extra.into_iter().collect();
    labels.insert(domain.label().to_string());
    labels
}

#[async_trait]
impl GraphSession for MemorySession {
    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<()> {
        self.timed(|state| {
            let stored = state.nodes.entry(node.node.clone()).or_insert_with(|| StoredNode {
                labels: BTreeSet::new(),
                properties: PropertyMap::new(),
            });
            stored.labels.remove(UNRESOLVED_LABEL);
            stored
                .labels
                .extend(domain_labels(node.node.domain, node.labels.iter().cloned()));

            if node.merge == PropertyMerge::Replace {
                stored.properties.clear();
            }
            stored.properties.extend(node.properties.clone());
            stored.properties.insert(
                node.node.domain.key_property().to_string(),
                PropertyValue::String(node.node.key.clone()),
            );
            Ok(())
        })
    }

    async fn ensure_node(&mut self, node: &NodeRef) -> Result<bool> {
        self.timed(|state| {
            if state.nodes.contains_key(node) {
                return Ok(false);
            }
            let mut properties = PropertyMap::new();
            properties.insert(
                node.domain.key_property().to_string(),
                PropertyValue::String(node.key.clone()),
            );
            state.nodes.insert(
                node.clone(),
                StoredNode {
                    labels: domain_labels(node.domain, [UNRESOLVED_LABEL.to_string()]),
                    properties,
                },
            );
            Ok(true)
        })
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<()> {
        self.timed(|state| {
            for endpoint in [&edge.source, &edge.target] {
                if !state.nodes.contains_key(endpoint) {
                    return Err(Error::store_query(format!(
                        "cannot merge {} edge: endpoint {endpoint} does not exist",
                        edge.rel_type
                    )));
                }
            }
            state.edges.insert(
                EdgeKey {
                    source: edge.source.clone(),
                    rel_type: edge.rel_type.clone(),
                    target: edge.target.clone(),
                },
                edge.properties.clone(),
            );
            Ok(())
        })
    }

    async fn delete_edges_where(&mut self, property: &str, value: &PropertyValue) -> Result<u64> {
        self.timed(|state| {
            let before = state.edges.len();
            state
                .edges
                .retain(|_, props| props.get(property) != Some(value));
            Ok((before - state.edges.len()) as u64)
        })
    }

    async fn clear_all(&mut self) -> Result<()> {
        self.timed(|state| {
            state.nodes.clear();
            state.edges.clear();
            Ok(())
        })
    }

    async fn apply_schema(&mut self, schema: &SchemaSpec) -> Result<()> {
        self.timed(|state| {
            for item in &schema.items {
                if !state.schema.contains(item) {
                    state.schema.push(item.clone());
                }
            }
            Ok(())
        })
    }

    async fn count_nodes(&mut self) -> Result<u64> {
        self.timed(|state| Ok(state.nodes.len() as u64))
    }

    async fn count_edges(&mut self) -> Result<u64> {
        self.timed(|state| Ok(state.edges.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(key: &str, name: &str) -> NodeUpsert {
        let mut properties = PropertyMap::new();
        properties.insert("Name".to_string(), PropertyValue::from(name));
        NodeUpsert {
            node: NodeRef::entity(key),
            labels: vec!["IfcWall".to_string()],
            properties,
            merge: PropertyMerge::Replace,
        }
    }

    #[tokio::test]
    async fn test_merge_node_replaces_properties() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();

        session.merge_node(&wall("w1", "first")).await.unwrap();
        session.merge_node(&wall("w1", "second")).await.unwrap();

        assert_eq!(store.node_count(), 1);
        let node = store.node(&NodeRef::entity("w1")).unwrap();
        assert_eq!(node.properties["Name"], PropertyValue::from("second"));
        assert_eq!(node.properties["GlobalId"], PropertyValue::from("w1"));
        assert!(node.has_label("IfcEntity"));
        assert!(node.has_label("IfcWall"));
    }

    #[tokio::test]
    async fn test_merge_node_extend_keeps_stored_properties() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        let concrete = |properties: PropertyMap| NodeUpsert {
            node: NodeRef::material("Concrete"),
            labels: Vec::new(),
            properties,
            merge: PropertyMerge::Extend,
        };

        let mut density = PropertyMap::new();
        density.insert("Density".to_string(), PropertyValue::Int(2400));
        session.merge_node(&concrete(density)).await.unwrap();
        session.merge_node(&concrete(PropertyMap::new())).await.unwrap();

        let node = store.node(&NodeRef::material("Concrete")).unwrap();
        assert_eq!(node.properties["Density"], PropertyValue::Int(2400));
        assert_eq!(node.properties["name"], PropertyValue::from("Concrete"));
    }

    #[tokio::test]
    async fn test_merge_node_keeps_earlier_labels() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();

        session.ensure_node(&NodeRef::entity("w1")).await.unwrap();
        session.merge_node(&wall("w1", "wall")).await.unwrap();
        let mut retyped = wall("w1", "curtain");
        retyped.labels = vec!["IfcCurtainWall".to_string()];
        session.merge_node(&retyped).await.unwrap();

        let node = store.node(&NodeRef::entity("w1")).unwrap();
        assert!(!node.is_placeholder());
        assert!(node.has_label("IfcWall"));
        assert!(node.has_label("IfcCurtainWall"));
        assert_eq!(node.properties["Name"], PropertyValue::from("curtain"));
    }

    #[tokio::test]
    async fn test_ensure_node_never_touches_existing() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();

        session.merge_node(&wall("w1", "real")).await.unwrap();
        assert!(!session.ensure_node(&NodeRef::entity("w1")).await.unwrap());
        assert!(!store.node(&NodeRef::entity("w1")).unwrap().is_placeholder());

        assert!(session.ensure_node(&NodeRef::entity("w2")).await.unwrap());
        assert!(store.node(&NodeRef::entity("w2")).unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn test_merge_node_upgrades_placeholder() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();

        session.ensure_node(&NodeRef::entity("w1")).await.unwrap();
        session.merge_node(&wall("w1", "real")).await.unwrap();

        let node = store.node(&NodeRef::entity("w1")).unwrap();
        assert!(!node.is_placeholder());
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_merge_edge_requires_endpoints() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        let edge = EdgeUpsert {
            source: NodeRef::entity("a"),
            target: NodeRef::entity("b"),
            rel_type: "CONNECTS_TO".to_string(),
            properties: PropertyMap::new(),
        };

        let err = session.merge_edge(&edge).await.unwrap_err();
        assert!(matches!(err, Error::StoreQuery(_)));

        session.ensure_node(&edge.source).await.unwrap();
        session.ensure_node(&edge.target).await.unwrap();
        session.merge_edge(&edge).await.unwrap();
        session.merge_edge(&edge).await.unwrap();
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.performance().failed_queries, 1);
    }

    #[tokio::test]
    async fn test_delete_edges_where_and_clear_all() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        for key in ["a", "b", "c"] {
            session.ensure_node(&NodeRef::entity(key)).await.unwrap();
        }
        let mut tagged = PropertyMap::new();
        tagged.insert("relationshipSource".to_string(), PropertyValue::from("topologicalAnalysis"));
        for (target, props) in [("b", tagged.clone()), ("c", PropertyMap::new())] {
            session
                .merge_edge(&EdgeUpsert {
                    source: NodeRef::entity("a"),
                    target: NodeRef::entity(target),
                    rel_type: "ADJACENT".to_string(),
                    properties: props,
                })
                .await
                .unwrap();
        }

        let removed = session
            .delete_edges_where("relationshipSource", &PropertyValue::from("topologicalAnalysis"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(session.count_edges().await.unwrap(), 1);

        session.clear_all().await.unwrap();
        assert_eq!(session.count_nodes().await.unwrap(), 0);
        assert_eq!(session.count_edges().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apply_schema_is_idempotent() {
        let store = MemoryGraphStore::new();
        let mut session = store.open_session().await.unwrap();
        session.apply_schema(&SchemaSpec::default()).await.unwrap();
        session.apply_schema(&SchemaSpec::default()).await.unwrap();
        assert_eq!(store.schema().len(), SchemaSpec::default().items.len());
    }

    #[tokio::test]
    async fn test_session_lifecycle_counters() {
        let store = MemoryGraphStore::new();
        let first = store.open_session().await.unwrap();
        let second = store.open_session().await.unwrap();
        assert_eq!(store.open_sessions(), 2);
        drop(first);
        drop(second);
        assert_eq!(store.open_sessions(), 0);
        assert_eq!(store.performance().peak_open_sessions, 2);
    }
}
