use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ragdb_core::collection::CollectionMeta;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{ChunkLookup, VectorStore};
use ragdb_core::types::{DocumentChunk, VectorData};
use ragdb_hybrid::{HybridStore, HybridStoreConfig};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Chunks in insertion order with an id index.
#[derive(Default)]
struct ChunkTable {
    rows: Vec<DocumentChunk>,
    index: HashMap<String, usize>,
}

impl ChunkTable {
    fn upsert(&mut self, chunk: DocumentChunk) {
        match self.index.get(&chunk.id) {
            Some(&pos) => self.rows[pos] = chunk,
            None => {
                self.index.insert(chunk.id.clone(), self.rows.len());
                self.rows.push(chunk);
            }
        }
    }

    fn get(&self, id: &str) -> Option<&DocumentChunk> {
        self.index.get(id).map(|&pos| &self.rows[pos])
    }

    fn retain<F: FnMut(&DocumentChunk) -> bool>(&mut self, keep: F) {
        self.rows.retain(keep);
        self.index = self.rows.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();
    }
}

/// One retrieval corpus: persisted metadata, the chunk table and the active
/// hybrid store. The store sits behind an `Arc` so a migration can swap it
/// while in-flight queries finish on the old one.
pub struct Collection {
    meta: RwLock<CollectionMeta>,
    chunks: RwLock<ChunkTable>,
    store: RwLock<Arc<HybridStore>>,
}

/// Hybrid store configuration derived from collection metadata.
pub fn store_config(meta: &CollectionMeta, base_dir: &Path) -> HybridStoreConfig {
    let mut cfg = HybridStoreConfig::new(meta.dimensions, meta.backend.clone(), base_dir);
    cfg.lexical_weight = meta.lexical_weight;
    cfg
}

impl Collection {
    /// Open the backend described by `meta`; relative backend paths resolve
    /// against `base_dir`.
    pub fn open(meta: CollectionMeta, base_dir: &Path) -> Result<Self> {
        meta.validate()?;
        let store = HybridStore::open(&store_config(&meta, base_dir))?;
        Ok(Self::with_store(meta, store))
    }

    pub fn with_store(meta: CollectionMeta, store: HybridStore) -> Self {
        Self {
            meta: RwLock::new(meta),
            chunks: RwLock::new(ChunkTable::default()),
            store: RwLock::new(Arc::new(store)),
        }
    }

    pub fn name(&self) -> String {
        read(&self.meta).name.clone()
    }

    pub fn meta(&self) -> CollectionMeta {
        read(&self.meta).clone()
    }

    pub fn set_meta(&self, meta: CollectionMeta) {
        *write(&self.meta) = meta;
    }

    pub fn dimensions(&self) -> usize {
        read(&self.meta).dimensions
    }

    pub fn store(&self) -> Arc<HybridStore> {
        Arc::clone(&read(&self.store))
    }

    /// Install `store` as the active store and hand back the previous one.
    pub fn swap_store(&self, store: Arc<HybridStore>) -> Arc<HybridStore> {
        std::mem::replace(&mut *write(&self.store), store)
    }

    /// Upsert embedded chunks into the store and the chunk table.
    pub fn add_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let dims = self.dimensions();
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dims) {
            tracing::warn!(id = %bad.id, "chunk rejected before indexing");
            return Err(Error::DimensionMismatch { expected: dims, actual: bad.embedding.len() });
        }
        let store = self.store();
        let count = chunks.len();
        for chunk in chunks {
            store.add_document(&chunk.id, &chunk.content, &chunk.metadata_string(), &chunk.embedding)?;
            write(&self.chunks).upsert(chunk);
        }
        write(&self.meta).touch();
        tracing::debug!(collection = %self.name(), count, "chunks added");
        Ok(count)
    }

    /// Put chunks whose vectors the backend already holds back into the
    /// table and the lexical side of the store.
    pub fn restore_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        let store = self.store();
        let docs: Vec<(String, String, String)> =
            chunks.iter().map(|c| (c.id.clone(), c.content.clone(), c.metadata_string())).collect();
        store.attach_documents(docs.iter().map(|(i, c, m)| (i.as_str(), c.as_str(), m.as_str())))?;
        let mut table = write(&self.chunks);
        for chunk in chunks {
            table.upsert(chunk);
        }
        Ok(table.rows.len())
    }

    /// Returns whether the chunk existed.
    pub fn remove_chunk(&self, id: &str) -> Result<bool> {
        if read(&self.chunks).get(id).is_none() {
            return Ok(false);
        }
        self.store().remove(id)?;
        write(&self.chunks).retain(|c| c.id != id);
        write(&self.meta).touch();
        Ok(true)
    }

    /// Remove every chunk of `document_id`. Returns how many were removed.
    pub fn remove_document(&self, document_id: &str) -> Result<usize> {
        let ids: Vec<String> = read(&self.chunks)
            .rows
            .iter()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let store = self.store();
        for id in &ids {
            store.remove(id)?;
        }
        write(&self.chunks).retain(|c| c.document_id != document_id);
        write(&self.meta).touch();
        tracing::debug!(collection = %self.name(), document_id, removed = ids.len(), "document removed");
        Ok(ids.len())
    }

    pub fn chunk(&self, id: &str) -> Option<DocumentChunk> {
        read(&self.chunks).get(id).cloned()
    }

    pub fn chunks(&self) -> Vec<DocumentChunk> {
        read(&self.chunks).rows.clone()
    }

    pub fn len(&self) -> usize {
        read(&self.chunks).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Migration units, one per chunk that carries an embedding.
    pub fn vector_data(&self) -> Vec<VectorData> {
        read(&self.chunks)
            .rows
            .iter()
            .filter(|c| c.has_embedding())
            .map(|c| VectorData {
                id: c.id.clone(),
                vector: c.embedding.clone(),
                content: c.content.clone(),
                metadata: c.metadata_string(),
            })
            .collect()
    }

    /// Replay stored embeddings into the vector side only.
    pub(crate) fn reload_vectors(&self) -> Result<usize> {
        let store = self.store();
        let table = read(&self.chunks);
        let mut count = 0;
        for chunk in table.rows.iter().filter(|c| c.has_embedding()) {
            store.backend().try_add(&chunk.id, &chunk.embedding, None)?;
            count += 1;
        }
        Ok(count)
    }
}

impl ChunkLookup for Collection {
    fn chunk(&self, id: &str) -> Option<DocumentChunk> {
        Collection::chunk(self, id)
    }
}
