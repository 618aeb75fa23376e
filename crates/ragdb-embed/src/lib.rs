//! ragdb-embed
//!
//! Embedding and completion providers, the embedding cache, and the service
//! that combines them with model fallback and parallel chunk embedding.

pub mod cache;
pub mod hashing;
pub mod ollama;
pub mod service;

use std::sync::Arc;

use ragdb_core::config::{ProviderConfig, ProviderKind};
use ragdb_core::error::Result;
use ragdb_core::traits::Provider;

pub use cache::EmbeddingCache;
pub use hashing::HashingProvider;
pub use ollama::OllamaProvider;
pub use service::EmbeddingService;

/// Provider selected by configuration.
pub fn provider_from_config(cfg: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    Ok(match cfg.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(cfg)?),
        ProviderKind::Hashing => {
            tracing::info!(dimensions = cfg.hashing_dimensions, "using hashing embeddings");
            Arc::new(HashingProvider::new(cfg.hashing_dimensions))
        }
    })
}
