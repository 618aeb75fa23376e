//! Persisted per-collection metadata.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_LEXICAL_WEIGHT: f32 = 0.3;
pub const DEFAULT_QDRANT_PORT: u16 = 6334;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Connection fields of a remote Qdrant backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub collection_name: String,
    pub use_tls: bool,
    pub timeout_secs: u64,
    pub create_if_missing: bool,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_QDRANT_PORT,
            api_key: None,
            collection_name: String::new(),
            use_tls: false,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            create_if_missing: true,
        }
    }
}

impl QdrantConfig {
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Which vector backend a collection lives on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    #[default]
    #[serde(alias = "internal")]
    BruteForce,
    /// LanceDB table; `path` defaults to `<collection dir>/lance`.
    Approximate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    Qdrant(QdrantConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::BruteForce => BackendKind::BruteForce,
            Self::Approximate { .. } => BackendKind::Approximate,
            Self::Qdrant(_) => BackendKind::Qdrant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    BruteForce,
    Approximate,
    Qdrant,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BruteForce => "brute_force",
            Self::Approximate => "approximate",
            Self::Qdrant => "qdrant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub enabled: bool,
    /// Empty means "use the collection's generation model".
    pub model: String,
    pub weight: f32,
    pub threshold: f32,
    pub top_k: usize,
    pub initial_k: usize,
    pub adaptive_filtering: bool,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model: String::new(),
            weight: 0.7,
            threshold: 0.0,
            top_k: 5,
            initial_k: 20,
            adaptive_filtering: false,
        }
    }
}

/// Everything the engine needs to reopen a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    /// Generation model; also the embedding fallback model.
    pub model_name: String,
    pub dimensions: usize,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    #[serde(default = "default_true")]
    pub hybrid_search: bool,
    #[serde(default)]
    pub reranker: RerankerSettings,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_lexical_weight() -> f32 {
    DEFAULT_LEXICAL_WEIGHT
}

fn default_true() -> bool {
    true
}

impl CollectionMeta {
    pub fn new(name: impl Into<String>, model_name: impl Into<String>, dimensions: usize) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            model_name: model_name.into(),
            dimensions,
            backend: BackendConfig::default(),
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            hybrid_search: true,
            reranker: RerankerSettings::default(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("collection name is empty".into()));
        }
        if self.dimensions == 0 {
            return Err(Error::InvalidConfig(format!(
                "collection '{}' has zero dimensions",
                self.name
            )));
        }
        check_weight("lexical_weight", self.lexical_weight)?;
        check_weight("reranker.weight", self.reranker.weight)?;
        if let BackendConfig::Qdrant(q) = &self.backend {
            if q.host.is_empty() || q.port == 0 {
                return Err(Error::InvalidConfig("qdrant host/port not set".into()));
            }
        }
        Ok(())
    }
}

pub fn check_weight(name: &str, w: f32) -> Result<()> {
    if (0.0..=1.0).contains(&w) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be within [0, 1], got {w}")))
    }
}
