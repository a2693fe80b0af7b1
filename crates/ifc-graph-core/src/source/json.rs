//! Source adapter for exported model documents (JSON).
//!
//! Document layout:
//!
//! ```json
//! {
//!   "name": "duplex",
//!   "project":   { "GlobalId": "...", "Name": "..." },
//!   "sites":     [ { "GlobalId": "...", "Name": "..." } ],
//!   "buildings": [ { "GlobalId": "...", "SiteGlobalId": "..." } ],
//!   "storeys":   [ { "GlobalId": "...", "BuildingGlobalId": "...", "Elevation": 0.0 } ],
//!   "spaces":    [ { "GlobalId": "...", "StoreyGlobalId": "..." } ],
//!   "elements":  [ { "GlobalId": "...", "IFCType": "IfcWall", "ContainedIn": "...",
//!                    "PropertySets": [ { "Name": "Pset_WallCommon", "Properties": { } } ],
//!                    "Materials": [ "Concrete", { "Name": "Steel", "Properties": { } } ] } ],
//!   "relationships": [ { "SourceGlobalId": "...", "TargetGlobalId": "...",
//!                        "RelationshipType": "IfcRelVoidsElement", "Properties": { } } ],
//!   "topology": { "adjacency": { }, "containment": { }, "space_boundaries": { }, "connectivity": [ ] }
//! }
//! ```
//!
//! Every entry is decoded on its own, so one malformed element only makes
//! that element unreadable.

use super::{SourceModel, SpatialStructure};
use crate::error::{Error, Result};
use crate::model::{
    Attributes, ElementRecord, GlobalId, MaterialRecord, PropertySetRecord, RelationshipRecord,
    RelationshipType,
};
use crate::topology::TopologyResults;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    project: Option<Value>,
    #[serde(default)]
    sites: Vec<Value>,
    #[serde(default)]
    buildings: Vec<Value>,
    #[serde(default)]
    storeys: Vec<Value>,
    #[serde(default)]
    spaces: Vec<Value>,
    #[serde(default)]
    elements: Vec<Value>,
    #[serde(default)]
    relationships: Vec<Value>,
    #[serde(default)]
    topology: Option<TopologyResults>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaterialEntry {
    Name(String),
    Record(MaterialRecord),
}

impl From<MaterialEntry> for MaterialRecord {
    fn from(entry: MaterialEntry) -> Self {
        match entry {
            MaterialEntry::Name(name) => MaterialRecord::new(name),
            MaterialEntry::Record(record) => record,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "GlobalId", default)]
    global_id: Option<String>,
    #[serde(rename = "IFCType", alias = "type", default)]
    type_tag: Option<String>,
    #[serde(rename = "PropertySets", default)]
    property_sets: Vec<PropertySetRecord>,
    #[serde(rename = "Materials", default)]
    materials: Vec<MaterialEntry>,
    #[serde(rename = "ContainedIn", default)]
    contained_in: Option<String>,
    #[serde(flatten)]
    attributes: Attributes,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(rename = "SourceGlobalId", default)]
    source: Option<String>,
    #[serde(rename = "TargetGlobalId", default)]
    target: Option<String>,
    #[serde(rename = "RelationshipType", default)]
    rel_type: Option<String>,
    #[serde(rename = "Properties", default)]
    properties: Attributes,
}

#[derive(Debug, Clone)]
struct ParsedElement {
    record: ElementRecord,
}

/// Counts describing a model document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSummary {
    /// Model name
    pub name: String,
    /// Whether a project descriptor is present
    pub has_project: bool,
    /// Sites
    pub sites: usize,
    /// Buildings
    pub buildings: usize,
    /// Storeys
    pub storeys: usize,
    /// Spaces
    pub spaces: usize,
    /// Elements
    pub elements: usize,
    /// Elements that cannot be decoded
    pub unreadable_elements: usize,
    /// Relationships
    pub relationships: usize,
    /// Relationships missing an endpoint key
    pub incomplete_relationships: usize,
    /// Whether precomputed topology is present
    pub has_topology: bool,
}

/// A model document loaded into memory
#[derive(Debug, Clone)]
pub struct JsonSourceModel {
    name: String,
    project: Option<Value>,
    spatial: [Vec<Value>; 4],
    elements: Vec<std::result::Result<ParsedElement, String>>,
    relationships: Vec<RelationshipRecord>,
    topology: Option<TopologyResults>,
}

const SPATIAL_PARENT_KEYS: [Option<&str>; 4] = [
    None,
    Some("SiteGlobalId"),
    Some("BuildingGlobalId"),
    Some("StoreyGlobalId"),
];
const SPATIAL_TYPES: [&str; 4] = ["IfcSite", "IfcBuilding", "IfcBuildingStorey", "IfcSpace"];

impl JsonSourceModel {
    /// Read a document from disk; the file stem names the model unless the
    /// document has a `name`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        Self::from_json_str(&content, &stem)
    }

    /// Parse a document from a string
    pub fn from_json_str(content: &str, default_name: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value, default_name)
    }

    /// Build from an already parsed document
    pub fn from_value(value: Value, default_name: &str) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::source_read("model document must be a JSON object"));
        }
        let doc: Document = serde_json::from_value(value)
            .map_err(|e| Error::source_read(format!("invalid model document: {e}")))?;

        let elements = doc
            .elements
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_element(raw, "IfcElement", None).map_err(|e| format!("element #{index}: {e}")))
            .map(|parsed| parsed.map(|record| ParsedElement { record }))
            .collect();

        let relationships = doc
            .relationships
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_relationship(index, raw))
            .collect();

        let name = doc
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name.to_string());
        debug!(model = %name, "model document parsed");

        Ok(Self {
            name,
            project: doc.project,
            spatial: [doc.sites, doc.buildings, doc.storeys, doc.spaces],
            elements,
            relationships,
            topology: doc.topology,
        })
    }

    /// Precomputed topology carried by the document
    pub fn topology(&self) -> Option<&TopologyResults> {
        self.topology.as_ref()
    }

    /// Counts describing the document
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            has_project: self.project.is_some(),
            sites: self.spatial[0].len(),
            buildings: self.spatial[1].len(),
            storeys: self.spatial[2].len(),
            spaces: self.spatial[3].len(),
            elements: self.elements.len(),
            unreadable_elements: self.elements.iter().filter(|e| e.is_err()).count(),
            relationships: self.relationships.len(),
            incomplete_relationships: self
                .relationships
                .iter()
                .filter(|r| r.endpoints().is_none())
                .count(),
            has_topology: self.topology.is_some(),
        }
    }

    fn parsed(&self, element: &usize) -> Result<&ParsedElement> {
        match self.elements.get(*element) {
            Some(Ok(parsed)) => Ok(parsed),
            Some(Err(reason)) => Err(Error::source_read(reason.clone())),
            None => Err(Error::source_read(format!("element #{element} does not exist"))),
        }
    }
}

fn parse_element(raw: Value, default_type: &str, parent_key: Option<&str>) -> std::result::Result<ElementRecord, String> {
    if !raw.is_object() {
        return Err(format!("expected an object, found {raw}"));
    }
    let entity: RawEntity = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    let mut attributes = entity.attributes;

    let parent = parent_key
        .and_then(|key| attributes.remove(key))
        .and_then(|v| v.as_str().and_then(GlobalId::new));
    let container = parent.or_else(|| entity.contained_in.and_then(GlobalId::new));

    Ok(ElementRecord {
        global_id: entity.global_id.and_then(GlobalId::new),
        type_tag: entity
            .type_tag
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| default_type.to_string()),
        attributes,
        property_sets: entity.property_sets,
        materials: entity.materials.into_iter().map(MaterialRecord::from).collect(),
        container,
    })
}

fn parse_relationship(index: usize, raw: Value) -> RelationshipRecord {
    match serde_json::from_value::<RawRelationship>(raw) {
        Ok(rel) => RelationshipRecord {
            source: rel.source.and_then(GlobalId::new),
            target: rel.target.and_then(GlobalId::new),
            rel_type: rel
                .rel_type
                .map(RelationshipType::from)
                .unwrap_or_else(|| RelationshipType::Other("RELATED_TO".to_string())),
            properties: rel.properties,
        },
        Err(e) => {
            warn!(index, error = %e, "unreadable relationship record");
            RelationshipRecord {
                source: None,
                target: None,
                rel_type: RelationshipType::Other("UNREADABLE".to_string()),
                properties: Attributes::new(),
            }
        }
    }
}

impl SourceModel for JsonSourceModel {
    type Element = usize;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn project_info(&self) -> Result<ElementRecord> {
        let raw = self
            .project
            .clone()
            .ok_or_else(|| Error::source_read("model has no project descriptor"))?;
        parse_element(raw, "IfcProject", None).map_err(|e| Error::source_read(format!("project: {e}")))
    }

    fn spatial_structure(&self) -> Result<SpatialStructure> {
        let mut levels: [Vec<ElementRecord>; 4] = Default::default();
        for (level, entries) in self.spatial.iter().enumerate() {
            for (index, raw) in entries.iter().enumerate() {
                match parse_element(raw.clone(), SPATIAL_TYPES[level], SPATIAL_PARENT_KEYS[level]) {
                    Ok(record) => levels[level].push(record),
                    Err(e) => warn!(level = SPATIAL_TYPES[level], index, error = %e, "skipping unreadable spatial record"),
                }
            }
        }
        let [sites, buildings, storeys, spaces] = levels;

        Ok(SpatialStructure {
            project: self.project_info().ok(),
            sites,
            buildings,
            storeys,
            spaces,
        })
    }

    fn elements(&self) -> Vec<usize> {
        (0..self.elements.len()).collect()
    }

    fn element_attributes(&self, element: &usize) -> Result<ElementRecord> {
        let parsed = self.parsed(element)?;
        Ok(ElementRecord {
            property_sets: Vec::new(),
            materials: Vec::new(),
            container: None,
            ..parsed.record.clone()
        })
    }

    fn element_property_sets(&self, element: &usize) -> Result<Vec<PropertySetRecord>> {
        Ok(self.parsed(element)?.record.property_sets.clone())
    }

    fn element_materials(&self, element: &usize) -> Result<Vec<MaterialRecord>> {
        Ok(self.parsed(element)?.record.materials.clone())
    }

    fn element_container(&self, element: &usize) -> Result<Option<GlobalId>> {
        Ok(self.parsed(element)?.record.container.clone())
    }

    fn relationships(&self) -> Vec<RelationshipRecord> {
        self.relationships.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonSourceModel {
        JsonSourceModel::from_value(
            json!({
                "project": {"GlobalId": "P1", "Name": "Duplex"},
                "sites": [{"GlobalId": "S1"}],
                "buildings": [{"GlobalId": "B1", "SiteGlobalId": "S1"}],
                "storeys": [{"GlobalId": "L1", "BuildingGlobalId": "B1", "Elevation": 0.0}],
                "spaces": [{"GlobalId": "R1", "StoreyGlobalId": "L1"}],
                "elements": [
                    {
                        "GlobalId": "W1",
                        "IFCType": "IfcWall",
                        "Name": "Wall-01",
                        "ContainedIn": "L1",
                        "PropertySets": [{"Name": "Pset_WallCommon", "Properties": {"IsExternal": true}}],
                        "Materials": ["Concrete", {"Name": "Insulation", "Properties": {"Thickness": 0.1}}]
                    },
                    "not an element",
                    {"GlobalId": 17}
                ],
                "relationships": [
                    {"SourceGlobalId": "W1", "TargetGlobalId": "D1", "RelationshipType": "IfcRelFillsElement"},
                    {"SourceGlobalId": "W1", "RelationshipType": "IfcRelVoidsElement"},
                    42
                ]
            }),
            "sample",
        )
        .unwrap()
    }

    #[test]
    fn test_element_parts() {
        let model = sample();
        assert_eq!(model.elements(), vec![0, 1, 2]);

        let wall = model.element_attributes(&0).unwrap();
        assert_eq!(wall.global_id, GlobalId::new("W1"));
        assert_eq!(wall.type_tag, "IfcWall");
        assert_eq!(wall.attributes["Name"], json!("Wall-01"));
        assert!(!wall.attributes.contains_key("ContainedIn"));

        assert_eq!(model.element_container(&0).unwrap(), GlobalId::new("L1"));
        assert_eq!(model.element_property_sets(&0).unwrap()[0].name, "Pset_WallCommon");
        let materials = model.element_materials(&0).unwrap();
        assert_eq!(materials[0].name, "Concrete");
        assert_eq!(materials[1].properties["Thickness"], json!(0.1));
    }

    #[test]
    fn test_malformed_elements_are_read_errors() {
        let model = sample();
        assert!(matches!(model.element_attributes(&1), Err(Error::SourceRead(_))));
        assert!(matches!(model.element_attributes(&2), Err(Error::SourceRead(_))));
        assert!(matches!(model.element_attributes(&99), Err(Error::SourceRead(_))));
    }

    #[test]
    fn test_spatial_parents_are_extracted() {
        let spatial = sample().spatial_structure().unwrap();
        assert_eq!(spatial.project.as_ref().unwrap().type_tag, "IfcProject");
        assert_eq!(spatial.sites[0].container, None);
        assert_eq!(spatial.buildings[0].container, GlobalId::new("S1"));
        assert_eq!(spatial.storeys[0].container, GlobalId::new("B1"));
        assert_eq!(spatial.storeys[0].type_tag, "IfcBuildingStorey");
        assert!(!spatial.storeys[0].attributes.contains_key("BuildingGlobalId"));
        assert_eq!(spatial.spaces[0].container, GlobalId::new("L1"));
        assert_eq!(spatial.len(), 4);
    }

    #[test]
    fn test_relationships_keep_incomplete_records() {
        let model = sample();
        let rels = model.relationships();
        assert_eq!(rels.len(), 3);
        assert_eq!(rels[0].rel_type, RelationshipType::FillsElement);
        assert!(rels[1].endpoints().is_none());
        assert!(rels[2].endpoints().is_none());

        let summary = model.summary();
        assert_eq!(summary.elements, 3);
        assert_eq!(summary.unreadable_elements, 2);
        assert_eq!(summary.incomplete_relationships, 2);
        assert!(!summary.has_topology);
        assert_eq!(summary.name, "sample");
    }

    #[test]
    fn test_non_object_document_is_rejected() {
        assert!(JsonSourceModel::from_json_str("[1, 2]", "x").is_err());
        assert!(JsonSourceModel::from_json_str("{", "x").is_err());
    }

    #[tokio::test]
    async fn test_load_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.json");
        tokio::fs::write(&path, r#"{"elements": [{"GlobalId": "A", "IFCType": "IfcSlab"}]}"#)
            .await
            .unwrap();
        let model = JsonSourceModel::load(&path).await.unwrap();
        assert_eq!(model.name(), "office");
        assert!(matches!(model.project_info(), Err(Error::SourceRead(_))));
    }
}
