//! Domain records read from a building model.
//!
//! These are the shapes the source adapter hands to the pipeline. They carry
//! raw attribute values; normalization into store-native properties happens
//! in the mapper.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw attribute mapping as read from the source model
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Globally unique identity key of a model entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(String);

impl GlobalId {
    /// Build an identity key, rejecting blank values
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == value.len() {
            Some(Self(value))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GlobalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One entity of the model (element, spatial element or project)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementRecord {
    /// Identity key; records without one are skipped
    pub global_id: Option<GlobalId>,
    /// Entity type tag, e.g. `IfcWall`
    pub type_tag: String,
    /// Flat attribute mapping
    pub attributes: Attributes,
    /// Attached property sets
    pub property_sets: Vec<PropertySetRecord>,
    /// Attached materials
    pub materials: Vec<MaterialRecord>,
    /// Identity key of the spatial parent (container for elements,
    /// aggregating parent for spatial records)
    pub container: Option<GlobalId>,
}

impl ElementRecord {
    /// Create a record with an identity key and type tag
    pub fn new(global_id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            global_id: GlobalId::new(global_id),
            type_tag: type_tag.into(),
            ..Default::default()
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set the spatial parent reference
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = GlobalId::new(container);
        self
    }

    /// Attach a property set
    pub fn with_property_set(mut self, pset: PropertySetRecord) -> Self {
        self.property_sets.push(pset);
        self
    }

    /// Attach a material
    pub fn with_material(mut self, material: MaterialRecord) -> Self {
        self.materials.push(material);
        self
    }
}

/// A named group of properties owned by an element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySetRecord {
    /// Identity key of the property set itself, when the model has one
    #[serde(rename = "GlobalId", default)]
    pub global_id: Option<GlobalId>,
    /// Property set name, e.g. `Pset_WallCommon`
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Property values
    #[serde(rename = "Properties", default)]
    pub properties: Attributes,
}

impl PropertySetRecord {
    /// Create a property set with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// True when there is nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty() && self.properties.is_empty()
    }
}

/// A material assigned to an element, shared by name across the model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialRecord {
    /// Material name; materials are merged by name
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Material properties
    #[serde(rename = "Properties", default)]
    pub properties: Attributes,
}

impl MaterialRecord {
    /// Create a material with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True when there is nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// Child payload attached to an owning element
#[derive(Debug, Clone, Copy)]
pub enum ChildRecord<'a> {
    /// Property set child
    PropertySet(&'a PropertySetRecord),
    /// Material child
    Material(&'a MaterialRecord),
}

impl ChildRecord<'_> {
    /// Kind of this child
    pub fn kind(&self) -> ChildKind {
        match self {
            Self::PropertySet(_) => ChildKind::PropertySet,
            Self::Material(_) => ChildKind::Material,
        }
    }
}

/// Kind of a child payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// Property set
    PropertySet,
    /// Material
    Material,
}

impl ChildKind {
    /// Fixed edge type from owner to child
    pub fn relationship_type(&self) -> RelationshipType {
        match self {
            Self::PropertySet => RelationshipType::HasPropertySet,
            Self::Material => RelationshipType::HasMaterial,
        }
    }
}

/// A generic relationship between two model entities
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    /// Source identity key
    pub source: Option<GlobalId>,
    /// Target identity key
    pub target: Option<GlobalId>,
    /// Relationship kind
    pub rel_type: RelationshipType,
    /// Optional edge properties
    pub properties: Attributes,
}

impl RelationshipRecord {
    /// Create a relationship between two keys
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        rel_type: impl Into<RelationshipType>,
    ) -> Self {
        Self {
            source: GlobalId::new(source),
            target: GlobalId::new(target),
            rel_type: rel_type.into(),
            properties: Attributes::new(),
        }
    }

    /// Add an edge property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Both endpoint keys, if both are present
    pub fn endpoints(&self) -> Option<(&GlobalId, &GlobalId)> {
        Some((self.source.as_ref()?, self.target.as_ref()?))
    }
}

/// Enumerated relationship kinds.
///
/// Source-model names (`IfcRelAggregates`) and edge type names
/// (`AGGREGATES`) both parse into the same variant. Unknown kinds are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipType {
    /// Spatial decomposition (project → site → building → storey → space)
    Aggregates,
    /// Element placed in a spatial container
    ContainedIn,
    /// Physical connection between elements
    ConnectsElements,
    /// Connection between path elements (walls)
    ConnectsPathElements,
    /// Opening voids an element
    VoidsElement,
    /// Element fills an opening
    FillsElement,
    /// Element defined by a type object
    DefinesByType,
    /// Element bounded by a space boundary
    SpaceBoundary,
    /// Nesting decomposition
    Nests,
    /// Element to property set
    HasPropertySet,
    /// Element to material
    HasMaterial,
    /// Any other relationship kind
    Other(String),
}

impl RelationshipType {
    /// Parse a relationship name
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "IfcRelAggregates" | "AGGREGATES" => Self::Aggregates,
            "IfcRelContainedInSpatialStructure" | "CONTAINED_IN" => Self::ContainedIn,
            "IfcRelConnectsElements" | "CONNECTS_TO" => Self::ConnectsElements,
            "IfcRelConnectsPathElements" | "CONNECTS_PATH" => Self::ConnectsPathElements,
            "IfcRelVoidsElement" | "VOIDS" => Self::VoidsElement,
            "IfcRelFillsElement" | "FILLS" => Self::FillsElement,
            "IfcRelDefinesByType" | "IS_TYPED_BY" => Self::DefinesByType,
            "IfcRelSpaceBoundary" | "BOUNDED_BY" => Self::SpaceBoundary,
            "IfcRelNests" | "NESTS" => Self::Nests,
            "IfcRelDefinesByProperties" | "HAS_PROPERTY_SET" => Self::HasPropertySet,
            "IfcRelAssociatesMaterial" | "HAS_MATERIAL" => Self::HasMaterial,
            other => Self::Other(other.to_string()),
        }
    }

    /// Edge type name used in the graph store
    pub fn edge_type(&self) -> String {
        match self {
            Self::Aggregates => "AGGREGATES".to_string(),
            Self::ContainedIn => "CONTAINED_IN".to_string(),
            Self::ConnectsElements => "CONNECTS_TO".to_string(),
            Self::ConnectsPathElements => "CONNECTS_PATH".to_string(),
            Self::VoidsElement => "VOIDS".to_string(),
            Self::FillsElement => "FILLS".to_string(),
            Self::DefinesByType => "IS_TYPED_BY".to_string(),
            Self::SpaceBoundary => "BOUNDED_BY".to_string(),
            Self::Nests => "NESTS".to_string(),
            Self::HasPropertySet => "HAS_PROPERTY_SET".to_string(),
            Self::HasMaterial => "HAS_MATERIAL".to_string(),
            Self::Other(raw) => screaming_snake(raw.strip_prefix("IfcRel").unwrap_or(raw)),
        }
    }
}

impl From<&str> for RelationshipType {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for RelationshipType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<RelationshipType> for String {
    fn from(rel: RelationshipType) -> Self {
        rel.edge_type()
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.edge_type())
    }
}

/// `ConnectsSpaces` / `connects spaces` → `CONNECTS_SPACES`
fn screaming_snake(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if ch.is_ascii_uppercase() && prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch.to_ascii_uppercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "RELATED_TO".to_string()
    } else {
        trimmed.to_string()
    }
}
