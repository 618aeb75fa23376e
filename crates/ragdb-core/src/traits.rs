use std::path::Path;

use crate::error::Result;
use crate::types::{DocumentChunk, RecordPayload, SearchResult, VectorData};

/// Uniform contract for every vector backend.
pub trait VectorStore: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Upsert a vector, reporting why it was rejected.
    fn try_add(&self, id: &str, vector: &[f32], payload: Option<&RecordPayload>) -> Result<()>;

    /// Upsert that never fails the caller; rejected vectors are logged.
    fn add(&self, id: &str, vector: &[f32]) {
        if let Err(err) = self.try_add(id, vector, None) {
            tracing::warn!(id, error = %err, "vector not added");
        }
    }

    /// Upsert several documents, stopping at the first rejected one.
    fn try_add_batch(&self, items: &[VectorData]) -> Result<()> {
        for item in items {
            let payload = RecordPayload { content: item.content.clone(), metadata: item.metadata.clone() };
            self.try_add(&item.id, &item.vector, Some(&payload))?;
        }
        Ok(())
    }

    /// No-op when `id` is absent.
    fn remove(&self, id: &str) -> Result<()>;

    /// Drop every vector the backend holds.
    fn clear(&self) -> Result<()>;

    /// At most `k` hits, non-increasing score.
    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult>;

    fn save(&self, path: &Path) -> Result<()>;
    fn load(&self, path: &Path) -> Result<()>;
    fn close(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remote embedding and generation capability.
pub trait Provider: Send + Sync {
    fn generate_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>>;
    fn generate_completion(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Resolves ids returned by a search back to their chunks.
pub trait ChunkLookup {
    fn chunk(&self, id: &str) -> Option<DocumentChunk>;
}
