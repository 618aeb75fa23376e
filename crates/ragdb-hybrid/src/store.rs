use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use ragdb_core::collection::{check_weight, BackendConfig, BackendKind, DEFAULT_LEXICAL_WEIGHT};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::VectorStore;
use ragdb_core::types::{HybridSearchResult, RecordPayload, SearchResult, VectorData};
use ragdb_text::LexicalIndex;
use ragdb_vector::VectorBackend;

use crate::fusion::fuse;

#[derive(Debug, Clone)]
pub struct HybridStoreConfig {
    pub dimensions: usize,
    pub backend: BackendConfig,
    pub lexical_weight: f32,
    /// On-disk lexical index; in memory when `None`.
    pub index_path: Option<PathBuf>,
    /// Resolves relative backend paths.
    pub base_dir: PathBuf,
}

impl HybridStoreConfig {
    pub fn new(dimensions: usize, backend: BackendConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            dimensions,
            backend,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            index_path: None,
            base_dir: base_dir.into(),
        }
    }
}

/// Vector backend + lexical index + content/metadata caches.
///
/// Writers are serialized by `write_lock`. A document is indexed lexically
/// first and the vector second. A failed vector write puts the previous
/// lexical entry back (or removes it for a new id), and the caches only change
/// once both sides succeeded.
pub struct HybridStore {
    vector: VectorBackend,
    text: LexicalIndex,
    contents: RwLock<HashMap<String, String>>,
    metadata: RwLock<HashMap<String, String>>,
    lexical_weight: f32,
    write_lock: Mutex<()>,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl HybridStore {
    pub fn open(cfg: &HybridStoreConfig) -> Result<Self> {
        if cfg.dimensions == 0 {
            return Err(Error::InvalidConfig("dimensions must be > 0".into()));
        }
        check_weight("lexical_weight", cfg.lexical_weight)?;
        let text = match &cfg.index_path {
            Some(p) => LexicalIndex::open_or_create(p)?,
            None => LexicalIndex::in_memory()?,
        };
        let vector = VectorBackend::open(&cfg.backend, cfg.dimensions, &cfg.base_dir)?;
        Self::from_parts(vector, text, cfg.lexical_weight)
    }

    pub fn from_parts(vector: VectorBackend, text: LexicalIndex, lexical_weight: f32) -> Result<Self> {
        check_weight("lexical_weight", lexical_weight)?;
        Ok(Self {
            vector,
            text,
            contents: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            lexical_weight,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.vector.dimensions()
    }

    pub fn lexical_weight(&self) -> f32 {
        self.lexical_weight
    }

    pub fn kind(&self) -> BackendKind {
        self.vector.kind()
    }

    pub fn backend(&self) -> &VectorBackend {
        &self.vector
    }

    fn cached(&self, id: &str) -> Option<(String, String)> {
        let content = read(&self.contents).get(id).cloned()?;
        let metadata = read(&self.metadata).get(id).cloned().unwrap_or_default();
        Some((content, metadata))
    }

    fn undo_lexical(&self, id: &str, previous: Option<&(String, String)>) {
        let undo = match previous {
            Some((content, metadata)) => self.text.index_document(id, content, metadata),
            None => self.text.delete(id),
        };
        if let Err(err) = undo {
            tracing::error!(id, error = %err, "lexical rollback failed");
        }
    }

    pub fn add_document(&self, id: &str, content: &str, metadata: &str, vector: &[f32]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dims = self.vector.dimensions();
        if vector.len() != dims {
            return Err(Error::DimensionMismatch { expected: dims, actual: vector.len() });
        }
        let previous = self.cached(id);
        self.text.index_document(id, content, metadata)?;
        let payload = RecordPayload { content: content.to_string(), metadata: metadata.to_string() };
        if let Err(err) = self.vector.try_add(id, vector, Some(&payload)) {
            self.undo_lexical(id, previous.as_ref());
            return Err(err);
        }
        write(&self.contents).insert(id.to_string(), content.to_string());
        write(&self.metadata).insert(id.to_string(), metadata.to_string());
        Ok(())
    }

    /// Batched `add_document`: one lexical commit and one backend write. On a
    /// vector failure every document of the batch is rolled back.
    pub fn add_documents(&self, docs: &[VectorData]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let dims = self.vector.dimensions();
        if let Some(bad) = docs.iter().find(|d| d.vector.len() != dims) {
            return Err(Error::DimensionMismatch { expected: dims, actual: bad.vector.len() });
        }
        if docs.is_empty() {
            return Ok(());
        }
        let previous: Vec<_> = docs.iter().map(|d| self.cached(&d.id)).collect();
        self.text.index_batch(docs.iter().map(|d| (d.id.as_str(), d.content.as_str(), d.metadata.as_str())))?;
        if let Err(err) = self.vector.try_add_batch(docs) {
            for (doc, prev) in docs.iter().zip(&previous) {
                self.undo_lexical(&doc.id, prev.as_ref());
            }
            return Err(err);
        }
        let mut contents = write(&self.contents);
        let mut metadata = write(&self.metadata);
        for doc in docs {
            contents.insert(doc.id.clone(), doc.content.clone());
            metadata.insert(doc.id.clone(), doc.metadata.clone());
        }
        Ok(())
    }

    /// Register documents whose vectors the backend already holds.
    pub fn attach_documents<'a, I>(&self, docs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let docs: Vec<_> = docs.into_iter().collect();
        self.text.index_batch(docs.iter().copied())?;
        let mut contents = write(&self.contents);
        let mut metadata = write(&self.metadata);
        for (id, content, meta) in &docs {
            contents.insert((*id).to_string(), (*content).to_string());
            metadata.insert((*id).to_string(), (*meta).to_string());
        }
        Ok(docs.len())
    }

    /// No-op when absent.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.vector.remove(id)?;
        self.text.delete(id)?;
        write(&self.contents).remove(id);
        write(&self.metadata).remove(id);
        Ok(())
    }

    /// Empty every view: backend, lexical index and caches.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.vector.clear()?;
        self.text.clear()?;
        write(&self.contents).clear();
        write(&self.metadata).clear();
        Ok(())
    }

    pub fn content(&self, id: &str) -> Option<String> {
        read(&self.contents).get(id).cloned()
    }

    pub fn metadata(&self, id: &str) -> Option<String> {
        read(&self.metadata).get(id).cloned()
    }

    /// Number of documents known to the caches.
    pub fn len(&self) -> usize {
        read(&self.contents).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector-only search.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        self.vector.search(query, k)
    }

    /// Over-fetch `2 * limit` from each side and fuse.
    pub fn hybrid_search(&self, query_vector: &[f32], query_text: &str, limit: usize) -> Vec<HybridSearchResult> {
        if limit == 0 {
            return Vec::new();
        }
        let fetch = limit.saturating_mul(2);
        let vector_hits = self.vector.search(query_vector, fetch);
        let text_hits = match self.text.search(query_text, fetch) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "lexical search failed, using vector hits only");
                Vec::new()
            }
        };
        tracing::debug!(vector = vector_hits.len(), text = text_hits.len(), limit, "hybrid candidates");
        fuse(&vector_hits, &text_hits, self.lexical_weight, limit)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.vector.save(path)
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.vector.load(path)
    }

    pub fn close(&self) -> Result<()> {
        self.vector.close()
    }
}
