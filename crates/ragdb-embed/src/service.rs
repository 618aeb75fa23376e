use std::sync::{Arc, RwLock};

use rayon::prelude::*;

use ragdb_core::config::{EngineConfig, MAX_EMBEDDING_WORKERS};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Provider;
use ragdb_core::types::DocumentChunk;

use crate::cache::EmbeddingCache;

/// Cached, model-fallback-aware access to the embedding provider.
pub struct EmbeddingService {
    provider: Arc<dyn Provider>,
    cache: EmbeddingCache,
    preferred_model: RwLock<String>,
    pool: rayon::ThreadPool,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn Provider>,
        cache: EmbeddingCache,
        preferred_model: impl Into<String>,
        workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.clamp(1, MAX_EMBEDDING_WORKERS))
            .thread_name(|i| format!("ragdb-embed-{i}"))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("embedding worker pool: {e}")))?;
        Ok(Self { provider, cache, preferred_model: RwLock::new(preferred_model.into()), pool })
    }

    pub fn from_config(provider: Arc<dyn Provider>, cfg: &EngineConfig) -> Result<Self> {
        Self::new(
            provider,
            EmbeddingCache::from_config(&cfg.cache),
            cfg.provider.embedding_model.clone(),
            cfg.embedding_workers(),
        )
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn preferred_model(&self) -> String {
        self.preferred_model.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub fn set_preferred_model(&self, model: impl Into<String>) {
        let mut guard = self.preferred_model.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = model.into();
    }

    fn embed_with(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get(text, model) {
            return Ok(hit);
        }
        let embedding = self.provider.generate_embedding(model, text)?;
        self.cache.set(text, model, embedding.clone());
        Ok(embedding)
    }

    /// Embed with the preferred model, falling back once to `collection_model`.
    pub fn embed_text(&self, text: &str, collection_model: &str) -> Result<Vec<f32>> {
        let preferred = self.preferred_model();
        match self.embed_with(&preferred, text) {
            Ok(v) => Ok(v),
            Err(err) if !collection_model.is_empty() && collection_model != preferred => {
                tracing::warn!(preferred = %preferred, fallback = collection_model, error = %err, "embedding model failed, falling back");
                self.embed_with(collection_model, text)
            }
            Err(err) => Err(err),
        }
    }

    pub fn embed_query(&self, query: &str, collection_model: &str) -> Result<Vec<f32>> {
        self.embed_text(query, collection_model)
    }

    /// Fill in missing embeddings on the worker pool. Returns how many were computed.
    pub fn embed_chunks(&self, chunks: &mut [DocumentChunk], collection_model: &str, dimensions: usize) -> Result<usize> {
        let pending: Vec<&mut DocumentChunk> = chunks.iter_mut().filter(|c| !c.has_embedding()).collect();
        let count = pending.len();
        if count == 0 {
            return Ok(0);
        }
        self.pool.install(|| {
            pending.into_par_iter().try_for_each(|chunk| {
                let embedding = self.embed_text(&chunk.content, collection_model)?;
                if dimensions > 0 && embedding.len() != dimensions {
                    return Err(Error::DimensionMismatch { expected: dimensions, actual: embedding.len() });
                }
                chunk.embedding = embedding;
                Ok(())
            })
        })?;
        tracing::debug!(count, "embedded chunks");
        Ok(count)
    }
}
