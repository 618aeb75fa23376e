use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use ragdb_core::error::{Error, Result};
use ragdb_core::similarity::{cosine_similarity, rank};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{RecordPayload, SearchResult, VectorData};

#[derive(Serialize, Deserialize)]
struct VectorFile {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
}

/// Exact search over an in-memory id -> vector map.
pub struct BruteForceStore {
    dimensions: usize,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl BruteForceStore {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, vectors: RwLock::new(HashMap::new()) }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<f32>>> {
        self.vectors.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<f32>>> {
        self.vectors.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl VectorStore for BruteForceStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn try_add(&self, id: &str, vector: &[f32], _payload: Option<&RecordPayload>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
        }
        self.write().insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    fn try_add_batch(&self, items: &[VectorData]) -> Result<()> {
        if let Some(bad) = items.iter().find(|i| i.vector.len() != self.dimensions) {
            return Err(Error::DimensionMismatch { expected: self.dimensions, actual: bad.vector.len() });
        }
        let mut guard = self.write();
        for item in items {
            guard.insert(item.id.clone(), item.vector.clone());
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.write().remove(id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.write().clear();
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if k == 0 {
            return Vec::new();
        }
        let mut results: Vec<SearchResult> = self
            .read()
            .iter()
            .map(|(id, v)| SearchResult::new(id.clone(), cosine_similarity(query, v)))
            .collect();
        rank(&mut results, k);
        results
    }

    /// Atomic write: temp file in the target directory, then rename.
    fn save(&self, path: &Path) -> Result<()> {
        let guard = self.write();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let file = VectorFile { dimensions: self.dimensions, vectors: guard.clone() };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut w, &file)?;
            w.flush()?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        tracing::debug!(path = %path.display(), vectors = file.vectors.len(), "saved vectors");
        Ok(())
    }

    /// Missing file leaves an empty store.
    fn load(&self, path: &Path) -> Result<()> {
        let mut guard = self.write();
        if !path.exists() {
            guard.clear();
            return Ok(());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let file: VectorFile = serde_json::from_reader(reader)?;
        if file.dimensions != self.dimensions {
            return Err(Error::InvalidConfig(format!(
                "{} holds {}-dimensional vectors, store expects {}",
                path.display(),
                file.dimensions,
                self.dimensions
            )));
        }
        if let Some((id, v)) = file.vectors.iter().find(|(_, v)| v.len() != self.dimensions) {
            return Err(Error::Storage(format!("vector '{id}' has length {}", v.len())));
        }
        *guard = file.vectors;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
