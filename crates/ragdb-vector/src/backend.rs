use std::path::{Path, PathBuf};

use ragdb_core::collection::{BackendConfig, BackendKind};
use ragdb_core::error::Result;
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{RecordPayload, SearchResult, VectorData};

use crate::{ApproximateStore, BruteForceStore, QdrantStore};

/// Default directory of the approximate backend under a collection dir.
pub const LANCE_DIR: &str = "lance";

/// One of the concrete backends, chosen per collection.
pub enum VectorBackend {
    BruteForce(BruteForceStore),
    Approximate(ApproximateStore),
    Qdrant(QdrantStore),
}

impl VectorBackend {
    /// Build the backend described by `config`. Relative approximate paths
    /// resolve against `base_dir`.
    pub fn open(config: &BackendConfig, dimensions: usize, base_dir: &Path) -> Result<Self> {
        Ok(match config {
            BackendConfig::BruteForce => Self::BruteForce(BruteForceStore::new(dimensions)),
            BackendConfig::Approximate { path } => {
                Self::Approximate(ApproximateStore::open(&approximate_path(path.as_deref(), base_dir), dimensions)?)
            }
            BackendConfig::Qdrant(q) => Self::Qdrant(QdrantStore::connect(q, dimensions)?),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::BruteForce(_) => BackendKind::BruteForce,
            Self::Approximate(_) => BackendKind::Approximate,
            Self::Qdrant(_) => BackendKind::Qdrant,
        }
    }

    fn inner(&self) -> &dyn VectorStore {
        match self {
            Self::BruteForce(s) => s,
            Self::Approximate(s) => s,
            Self::Qdrant(s) => s,
        }
    }
}

pub fn approximate_path(path: Option<&Path>, base_dir: &Path) -> PathBuf {
    match path {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => base_dir.join(p),
        None => base_dir.join(LANCE_DIR),
    }
}

impl VectorStore for VectorBackend {
    fn dimensions(&self) -> usize {
        self.inner().dimensions()
    }

    fn try_add(&self, id: &str, vector: &[f32], payload: Option<&RecordPayload>) -> Result<()> {
        self.inner().try_add(id, vector, payload)
    }

    fn try_add_batch(&self, items: &[VectorData]) -> Result<()> {
        self.inner().try_add_batch(items)
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.inner().remove(id)
    }

    fn clear(&self) -> Result<()> {
        self.inner().clear()
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        self.inner().search(query, k)
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.inner().save(path)
    }

    fn load(&self, path: &Path) -> Result<()> {
        self.inner().load(path)
    }

    fn close(&self) -> Result<()> {
        self.inner().close()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }
}
