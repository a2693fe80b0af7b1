//! Graph store abstraction.
//!
//! The pipeline writes through [`GraphSession`]s opened from a
//! [`GraphStore`]. Every write primitive is an upsert keyed by identity, so
//! concurrent sessions writing overlapping nodes or edges converge without
//! client-side locking.
//!
//! ```text
//! ┌──────────────┐  open_session  ┌──────────────┐
//! │  GraphStore  │ ─────────────> │ GraphSession │  one per worker
//! └──────────────┘                └──────┬───────┘
//!        ▲                               │ merge_node / ensure_node
//!        │ SessionPool (bounded)         │ merge_edge / delete_edges_where
//!        │                               ▼
//!   MemoryGraphStore               property graph
//!   HttpGraphStore  ── POST /cypher ──> Cypher HTTP server
//! ```

pub mod cypher;
pub mod http;
pub mod memory;
pub mod pool;

pub use http::{HttpGraphStore, HttpStoreConfig};
pub use memory::MemoryGraphStore;
pub use pool::{PooledSession, SessionPool};

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Generic label carried by every model entity node
pub const ENTITY_LABEL: &str = "IfcEntity";
/// Label marking a placeholder created for an unresolved endpoint
pub const UNRESOLVED_LABEL: &str = "Unresolved";
/// Label of property set nodes
pub const PROPERTY_SET_LABEL: &str = "PropertySet";
/// Label of material nodes
pub const MATERIAL_LABEL: &str = "Material";

/// A store-native property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String
    String(String),
    /// Homogeneous list of scalars
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// String content, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered property mapping
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Node key domain: generic label plus the property holding the unique key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeDomain {
    /// Model entities keyed by `GlobalId`
    Entity,
    /// Property sets keyed by `id`
    PropertySet,
    /// Materials keyed by `name`
    Material,
}

impl NodeDomain {
    /// Every domain, in schema order
    pub const ALL: [NodeDomain; 3] = [Self::Entity, Self::PropertySet, Self::Material];

    /// Generic label for the domain
    pub fn label(&self) -> &'static str {
        match self {
            Self::Entity => ENTITY_LABEL,
            Self::PropertySet => PROPERTY_SET_LABEL,
            Self::Material => MATERIAL_LABEL,
        }
    }

    /// Property holding the unique key
    pub fn key_property(&self) -> &'static str {
        match self {
            Self::Entity => "GlobalId",
            Self::PropertySet => "id",
            Self::Material => "name",
        }
    }
}

/// Reference to a node by (domain, key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    /// Key domain
    pub domain: NodeDomain,
    /// Unique key within the domain
    pub key: String,
}

impl NodeRef {
    /// Reference to a model entity
    pub fn entity(key: impl Into<String>) -> Self {
        Self {
            domain: NodeDomain::Entity,
            key: key.into(),
        }
    }

    /// Reference to a property set
    pub fn property_set(key: impl Into<String>) -> Self {
        Self {
            domain: NodeDomain::PropertySet,
            key: key.into(),
        }
    }

    /// Reference to a material
    pub fn material(key: impl Into<String>) -> Self {
        Self {
            domain: NodeDomain::Material,
            key: key.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.domain.label(), self.key)
    }
}

/// How a node merge treats the properties already stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PropertyMerge {
    /// The stored map is replaced (`SET n = $props`)
    #[default]
    Replace,
    /// Incoming keys are added or overwritten, other keys are kept
    /// (`SET n += $props`)
    Extend,
}

/// Node merge request.
///
/// `labels` are added to the domain label; labels from earlier merges are
/// kept and only `Unresolved` is removed. `properties` always end up
/// including the key property, and `merge` decides whether they replace or
/// extend the stored map.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    /// Node identity
    pub node: NodeRef,
    /// Additional labels (type tag)
    pub labels: Vec<String>,
    /// Property map to write
    pub properties: PropertyMap,
    /// Replace or extend the stored properties
    pub merge: PropertyMerge,
}

/// Edge merge request, unique per (source, rel_type, target)
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpsert {
    /// Source node
    pub source: NodeRef,
    /// Target node
    pub target: NodeRef,
    /// Edge type
    pub rel_type: String,
    /// Complete property map
    pub properties: PropertyMap,
}

/// Constraints and indexes the pipeline relies on
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaItem {
    /// Uniqueness of a domain key
    UniqueKey(NodeDomain),
    /// Index on a label property
    Index {
        /// Indexed label
        label: String,
        /// Indexed property
        property: String,
    },
}

/// Schema applied during SCHEMA_SETUP
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    /// Constraint and index items, applied in order
    pub items: Vec<SchemaItem>,
}

impl Default for SchemaSpec {
    fn default() -> Self {
        let mut items: Vec<SchemaItem> = NodeDomain::ALL.iter().copied().map(SchemaItem::UniqueKey).collect();
        for (label, property) in [
            (ENTITY_LABEL, "IFCType"),
            (ENTITY_LABEL, "Name"),
            (PROPERTY_SET_LABEL, "name"),
            (MATERIAL_LABEL, "name"),
        ] {
            items.push(SchemaItem::Index {
                label: label.to_string(),
                property: property.to_string(),
            });
        }
        Self { items }
    }
}

/// Store-side performance counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorePerformance {
    /// Store backend name
    pub store: String,
    /// Statements executed
    pub queries: u64,
    /// Statements that failed
    pub failed_queries: u64,
    /// Total time spent in statements, milliseconds
    pub total_query_ms: f64,
    /// Sessions opened over the store's lifetime
    pub sessions_opened: u64,
    /// Highest number of sessions open at once
    pub peak_open_sessions: u64,
}

impl StorePerformance {
    /// Average statement latency in milliseconds
    pub fn average_query_ms(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.total_query_ms / self.queries as f64
        }
    }
}

/// Shared counters behind [`StorePerformance`]
#[derive(Debug, Default)]
pub(crate) struct PerformanceCounters {
    inner: Mutex<StorePerformance>,
    open_sessions: Mutex<u64>,
}

impl PerformanceCounters {
    pub(crate) fn record_query(&self, elapsed: Duration, ok: bool) {
        let mut perf = self.inner.lock();
        perf.queries += 1;
        perf.total_query_ms += elapsed.as_secs_f64() * 1000.0;
        if !ok {
            perf.failed_queries += 1;
        }
    }

    pub(crate) fn session_opened(&self) {
        let mut open = self.open_sessions.lock();
        *open += 1;
        let mut perf = self.inner.lock();
        perf.sessions_opened += 1;
        perf.peak_open_sessions = perf.peak_open_sessions.max(*open);
    }

    pub(crate) fn session_closed(&self) {
        let mut open = self.open_sessions.lock();
        *open = open.saturating_sub(1);
    }

    pub(crate) fn open_sessions(&self) -> u64 {
        *self.open_sessions.lock()
    }

    pub(crate) fn snapshot(&self, store: &str) -> StorePerformance {
        let mut perf = self.inner.lock().clone();
        perf.store = store.to_string();
        perf
    }
}

/// A graph store that hands out sessions
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Backend name for logs and reports
    fn name(&self) -> &str;

    /// Open a new session, exclusively owned by the caller
    async fn open_session(&self) -> Result<Box<dyn GraphSession>>;

    /// Check that the store can be reached. Failure is `StoreUnavailable`.
    async fn verify_connectivity(&self) -> Result<()>;

    /// Snapshot of store-side performance counters
    fn performance(&self) -> StorePerformance;
}

/// A stateful session against a graph store.
///
/// Sessions are never shared between workers.
#[async_trait]
pub trait GraphSession: Send {
    /// Merge a node by (domain, key), replacing its labels and properties
    async fn merge_node(&mut self, node: &NodeUpsert) -> Result<()>;

    /// Create a placeholder node when the key is absent. Existing nodes are
    /// left untouched. Returns true if a placeholder was created.
    async fn ensure_node(&mut self, node: &NodeRef) -> Result<bool>;

    /// Merge an edge by (source, type, target), replacing its properties.
    /// Both endpoints must exist.
    async fn merge_edge(&mut self, edge: &EdgeUpsert) -> Result<()>;

    /// Delete every edge whose `property` equals `value`, returning how many
    /// were removed
    async fn delete_edges_where(&mut self, property: &str, value: &PropertyValue) -> Result<u64>;

    /// Remove every node and edge in one step
    async fn clear_all(&mut self) -> Result<()>;

    /// Apply constraints and indexes; safe to re-run
    async fn apply_schema(&mut self, schema: &SchemaSpec) -> Result<()>;

    /// Number of nodes in the store
    async fn count_nodes(&mut self) -> Result<u64>;

    /// Number of edges in the store
    async fn count_edges(&mut self) -> Result<u64>;
}

/// Turn a type tag into a safe label: ASCII alphanumerics and `_` only
pub fn sanitize_label(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "Unknown".to_string()
    } else if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{cleaned}")
    } else {
        cleaned.to_string()
    }
}
