//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ifc_graph_core::graph::{
    EdgeUpsert, NodeRef, NodeUpsert, PropertyValue, SchemaSpec, StorePerformance,
};
use ifc_graph_core::{Error, GraphSession, GraphStore, JsonSourceModel, MemoryGraphStore, Result};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A small but complete model: project, one site, one building, two
/// storeys, a space, `elements` walls and a handful of relationships
pub fn building_model(elements: usize) -> Value {
    let walls: Vec<Value> = (0..elements)
        .map(|i| {
            json!({
                "GlobalId": format!("W{i}"),
                "IFCType": "IfcWall",
                "Name": format!("Wall {i}"),
                "ContainedIn": if i % 2 == 0 { "L1" } else { "L2" },
                "PropertySets": [{"Name": "Pset_WallCommon", "Properties": {"IsExternal": i % 3 == 0}}],
                "Materials": ["Concrete"]
            })
        })
        .collect();
    let relationships: Vec<Value> = (1..elements)
        .map(|i| {
            json!({
                "SourceGlobalId": format!("W{}", i - 1),
                "TargetGlobalId": format!("W{i}"),
                "RelationshipType": "IfcRelConnectsPathElements"
            })
        })
        .collect();

    json!({
        "name": "tower",
        "project": {"GlobalId": "P1", "IFCType": "IfcProject", "Name": "Tower"},
        "sites": [{"GlobalId": "S1", "Name": "Plot"}],
        "buildings": [{"GlobalId": "B1", "Name": "Main", "SiteGlobalId": "S1"}],
        "storeys": [
            {"GlobalId": "L1", "Name": "Ground", "BuildingGlobalId": "B1", "Elevation": 0.0},
            {"GlobalId": "L2", "Name": "First", "BuildingGlobalId": "B1", "Elevation": 3.2}
        ],
        "spaces": [{"GlobalId": "R1", "Name": "Lobby", "StoreyGlobalId": "L1"}],
        "elements": walls,
        "relationships": relationships,
        "topology": {
            "adjacency": {"R1": ["W0"]},
            "containment": {},
            "space_boundaries": {},
            "connectivity": []
        }
    })
}

/// Parse a model document
pub fn model(value: Value) -> Arc<JsonSourceModel> {
    Arc::new(JsonSourceModel::from_value(value, "fixture").unwrap())
}

/// Model with `n` bare elements and nothing else
pub fn flat_model(n: usize) -> Arc<JsonSourceModel> {
    let elements: Vec<Value> = (0..n)
        .map(|i| json!({"GlobalId": format!("E{i}"), "IFCType": "IfcBeam"}))
        .collect();
    model(json!({"elements": elements}))
}

#[derive(Debug, Default)]
struct Faults {
    reject_keys: HashSet<String>,
    unavailable_after: Option<usize>,
    unreachable: bool,
}

/// Memory store wrapper that injects store failures
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: MemoryGraphStore,
    faults: Arc<Faults>,
    operations: Arc<AtomicUsize>,
}

impl FaultyStore {
    /// Reject node upserts for the given identity keys
    pub fn rejecting(keys: &[&str]) -> Self {
        Self::with(Faults {
            reject_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        })
    }

    /// Lose the connection after `operations` session calls
    pub fn unavailable_after(operations: usize) -> Self {
        Self::with(Faults {
            unavailable_after: Some(operations),
            ..Default::default()
        })
    }

    /// Fail the connectivity check
    pub fn unreachable() -> Self {
        Self::with(Faults {
            unreachable: true,
            ..Default::default()
        })
    }

    fn with(faults: Faults) -> Self {
        Self {
            inner: MemoryGraphStore::new(),
            faults: Arc::new(faults),
            operations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &MemoryGraphStore {
        &self.inner
    }
}

#[async_trait]
impl GraphStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn open_session(&self) -> Result<Box<dyn GraphSession>> {
        Ok(Box::new(FaultySession {
            inner: self.inner.open_session().await?,
            faults: Arc::clone(&self.faults),
            operations: Arc::clone(&self.operations),
        }))
    }

    async fn verify_connectivity(&self) -> Result<()> {
        if self.faults.unreachable {
            return Err(Error::store_unavailable("connection refused"));
        }
        self.inner.verify_connectivity().await
    }

    fn performance(&self) -> StorePerformance {
        self.inner.performance()
    }
}

struct FaultySession {
    inner: Box<dyn GraphSession>,
    faults: Arc<Faults>,
    operations: Arc<AtomicUsize>,
}

impl FaultySession {
    fn tick(&self) -> Result<()> {
        let done = self.operations.fetch_add(1, Ordering::SeqCst);
        match self.faults.unavailable_after {
            Some(limit) if done >= limit => Err(Error::store_unavailable("connection reset")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GraphSession for FaultySession {
    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<()> {
        self.tick()?;
        if self.faults.reject_keys.contains(&node.node.key) {
            return Err(Error::store_query(format!("constraint violated for {}", node.node)));
        }
        self.inner.merge_node(node).await
    }

    async fn ensure_node(&mut self, node: &NodeRef) -> Result<bool> {
        self.tick()?;
        self.inner.ensure_node(node).await
    }

    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<()> {
        self.tick()?;
        self.inner.merge_edge(edge).await
    }

    async fn delete_edges_where(&mut self, property: &str, value: &PropertyValue) -> Result<u64> {
        self.tick()?;
        self.inner.delete_edges_where(property, value).await
    }

    async fn clear_all(&mut self) -> Result<()> {
        self.tick()?;
        self.inner.clear_all().await
    }

    async fn apply_schema(&mut self, schema: &SchemaSpec) -> Result<()> {
        self.tick()?;
        self.inner.apply_schema(schema).await
    }

    async fn count_nodes(&mut self) -> Result<u64> {
        self.tick()?;
        self.inner.count_nodes().await
    }

    async fn count_edges(&mut self) -> Result<u64> {
        self.tick()?;
        self.inner.count_edges().await
    }
}
