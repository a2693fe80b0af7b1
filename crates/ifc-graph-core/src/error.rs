//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias using the pipeline Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while moving a building model into the graph store
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (model files, report exports)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record could not be read from the source model
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// A property value could not be normalized
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// The graph store cannot be reached or dropped the session
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// The graph store rejected a single statement
    #[error("Graph store query failed: {0}")]
    StoreQuery(String),

    /// Topological analysis or import failed
    #[error("Topology enrichment failed: {0}")]
    Enrichment(String),

    /// Invalid run configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A batch function failed or panicked
    #[error("Batch execution error: {0}")]
    Execution(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a source read error
    pub fn source_read(msg: impl Into<String>) -> Self {
        Self::SourceRead(msg.into())
    }

    /// Create a mapping error
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    /// Create a store unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a store query error
    pub fn store_query(msg: impl Into<String>) -> Self {
        Self::StoreQuery(msg.into())
    }

    /// Create an enrichment error
    pub fn enrichment(msg: impl Into<String>) -> Self {
        Self::Enrichment(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a batch execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error must abort the whole run.
    ///
    /// Only loss of the graph store is fatal. Everything else is recovered
    /// at the record, batch or enrichment-phase boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
