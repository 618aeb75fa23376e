//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates nested keys, e.g. `APP_CACHE__TTL_SECS`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::collection::{DEFAULT_QDRANT_PORT, DEFAULT_REMOTE_TIMEOUT_SECS};
use crate::error::{Error, Result};

pub const MAX_EMBEDDING_WORKERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    /// Deterministic offline embeddings; no generation.
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    /// Preferred embedding model; the collection model is the fallback.
    pub embedding_model: String,
    pub hashing_dimensions: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Ollama,
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            timeout_secs: 60,
            embedding_model: "snowflake-arctic-embed2".to_string(),
            hashing_dimensions: 768,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 1000, ttl_secs: 3600 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub context_size: usize,
    /// Context budget is `context_size * chars_per_result` bytes.
    pub chars_per_result: usize,
    pub embedding_workers: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { context_size: 20, chars_per_result: 1000, embedding_workers: 3 }
    }
}

/// Defaults applied when a collection is moved to a remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantDefaults {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub use_tls: bool,
    pub timeout_secs: u64,
}

impl Default for QdrantDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_QDRANT_PORT,
            api_key: None,
            use_tls: false,
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: String,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub qdrant: QdrantDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.ragdb".to_string(),
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            qdrant: QdrantDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Typed view of `Config::load()`.
    pub fn load() -> Result<Self> {
        Config::load()?.engine()
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    /// Worker count clamped to `1..=MAX_EMBEDDING_WORKERS`.
    pub fn embedding_workers(&self) -> usize {
        self.retrieval.embedding_workers.clamp(1, MAX_EMBEDDING_WORKERS)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(Error::InvalidConfig("cache.max_size must be > 0".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(Error::InvalidConfig("cache.ttl_secs must be > 0".into()));
        }
        if self.provider.port == 0 || self.qdrant.port == 0 {
            return Err(Error::InvalidConfig("ports must be > 0".into()));
        }
        if self.provider.embedding_model.trim().is_empty() {
            return Err(Error::InvalidConfig("provider.embedding_model is empty".into()));
        }
        if self.provider.kind == ProviderKind::Hashing && self.provider.hashing_dimensions == 0 {
            return Err(Error::InvalidConfig("provider.hashing_dimensions must be > 0".into()));
        }
        Ok(())
    }
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    pub fn engine(&self) -> Result<EngineConfig> {
        let cfg: EngineConfig = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
