//! Source adapters: where building-model records come from.

pub mod json;

pub use json::{JsonSourceModel, ModelSummary};

use crate::error::Result;
use crate::model::{ElementRecord, GlobalId, MaterialRecord, PropertySetRecord, RelationshipRecord};

/// Spatial decomposition of a model.
///
/// Each record's `container` holds its declared parent: the site for a
/// building, the building for a storey, the storey for a space. Sites always
/// hang off the project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialStructure {
    /// Project descriptor, if the model has one
    pub project: Option<ElementRecord>,
    /// Sites
    pub sites: Vec<ElementRecord>,
    /// Buildings
    pub buildings: Vec<ElementRecord>,
    /// Storeys
    pub storeys: Vec<ElementRecord>,
    /// Spaces
    pub spaces: Vec<ElementRecord>,
}

impl SpatialStructure {
    /// Number of spatial records, project excluded
    pub fn len(&self) -> usize {
        self.sites.len() + self.buildings.len() + self.storeys.len() + self.spaces.len()
    }

    /// True when there are no spatial records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read access to a parsed building model.
///
/// Element handles are opaque and cheap to clone; the pipeline partitions
/// them into batches and asks for each element's parts from worker tasks,
/// so implementations must be shareable across threads.
pub trait SourceModel: Send + Sync + 'static {
    /// Element handle
    type Element: Clone + Send + Sync + 'static;

    /// Model name, used to label reports
    fn name(&self) -> String;

    /// The project descriptor
    fn project_info(&self) -> Result<ElementRecord>;

    /// Sites, buildings, storeys and spaces
    fn spatial_structure(&self) -> Result<SpatialStructure>;

    /// All physical elements, in model order
    fn elements(&self) -> Vec<Self::Element>;

    /// Identity, type tag and attributes of one element
    fn element_attributes(&self, element: &Self::Element) -> Result<ElementRecord>;

    /// Property sets of one element
    fn element_property_sets(&self, element: &Self::Element) -> Result<Vec<PropertySetRecord>>;

    /// Materials of one element
    fn element_materials(&self, element: &Self::Element) -> Result<Vec<MaterialRecord>>;

    /// Spatial container of one element
    fn element_container(&self, element: &Self::Element) -> Result<Option<GlobalId>>;

    /// Generic relationships, in model order
    fn relationships(&self) -> Vec<RelationshipRecord>;
}
