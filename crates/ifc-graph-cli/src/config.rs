//! Configuration file handling

use clap::ValueEnum;
use ifc_graph_core::{GraphStore, HttpGraphStore, HttpStoreConfig, MemoryGraphStore, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// CLI-level errors
#[derive(Error, Debug)]
pub enum CliError {
    /// The configuration file cannot be read
    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("invalid config file {path}: {source}")]
    ConfigParse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// The configuration cannot be rendered
    #[error("cannot render config: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    /// The graph store cannot be built
    #[error(transparent)]
    Store(#[from] ifc_graph_core::Error),
}

/// Which graph store to write into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process graph, discarded on exit
    #[default]
    Memory,
    /// Cypher over HTTP
    Http,
}

/// `[store]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let http = HttpStoreConfig::default();
        Self {
            kind: StoreKind::Memory,
            url: http.url,
            api_key: None,
            username: None,
            password: None,
            database: None,
            timeout_secs: http.timeout_secs,
            max_retries: http.max_retries,
        }
    }
}

impl StoreConfig {
    /// Settings for the HTTP store
    pub fn http_config(&self) -> HttpStoreConfig {
        HttpStoreConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }

    /// Build the configured store
    pub fn build(&self) -> Result<Arc<dyn GraphStore>, CliError> {
        Ok(match self.kind {
            StoreKind::Memory => Arc::new(MemoryGraphStore::new()),
            StoreKind::Http => Arc::new(HttpGraphStore::new(self.http_config())?),
        })
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
}

impl FileConfig {
    /// Load from `path`, or from the default location. A missing file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| CliError::ConfigRead {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| CliError::ConfigParse { path, source })
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, CliError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ifc-graph")
            .join("config.toml")
    }
}
