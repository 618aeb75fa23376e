use std::sync::Arc;

use ragdb_core::config::RetrievalConfig;
use ragdb_core::error::Result;
use ragdb_core::types::{RankedResult, SearchResult};
use ragdb_embed::EmbeddingService;

use crate::collection::Collection;
use crate::reranker::{RerankerOptions, RerankerService};

pub const DEFAULT_CONTEXT_SIZE: usize = 20;
pub const CONTEXT_HEADER: &str = "Relevant information:\n\n";
const TRUNCATION_MARK: &str = "...";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides accurate information based on the documents you've been given. Answer the question based on the context provided. If you don't know the answer based on the context, say that you don't know rather than making up an answer. Important: Always respond in the same language as the user's query.";

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Concatenate tagged chunks until `budget` bytes. The chunk that crosses the
/// budget is cut on a char boundary and marked; later chunks are dropped.
pub fn build_context(results: &[RankedResult], budget: usize) -> String {
    let mut out = String::from(CONTEXT_HEADER);
    for r in results {
        let entry = format!("--- {} ---\n{}\n\n", r.chunk.source_ref(), r.chunk.content);
        if out.len() + entry.len() <= budget {
            out.push_str(&entry);
            continue;
        }
        let room = budget.saturating_sub(out.len());
        if room > 0 {
            out.push_str(&entry[..floor_char_boundary(&entry, room)]);
            out.push_str(TRUNCATION_MARK);
        }
        break;
    }
    out
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "System: {SYSTEM_PROMPT}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer based on the provided information. If the information doesn't contain the answer, say so clearly.\nInclude references to the source documents in your answer using the format (Source: document name)."
    )
}

/// Embed, retrieve, rerank and generate against one collection.
pub struct QueryService {
    embeddings: Arc<EmbeddingService>,
    reranker: RerankerService,
    retrieval: RetrievalConfig,
}

impl QueryService {
    pub fn new(embeddings: Arc<EmbeddingService>, retrieval: RetrievalConfig) -> Self {
        let reranker = RerankerService::new(Arc::clone(embeddings.provider()));
        Self { embeddings, reranker, retrieval }
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    /// `0` falls back to the configured size, then to `DEFAULT_CONTEXT_SIZE`.
    pub fn effective_context_size(&self, context_size: usize) -> usize {
        [context_size, self.retrieval.context_size]
            .into_iter()
            .find(|&n| n > 0)
            .unwrap_or(DEFAULT_CONTEXT_SIZE)
    }

    pub fn context_budget(&self, context_size: usize) -> usize {
        self.effective_context_size(context_size).saturating_mul(self.retrieval.chars_per_result.max(1))
    }

    /// Ranked chunks for `query`, best first, without generation.
    pub fn retrieve(&self, collection: &Collection, query: &str, context_size: usize) -> Result<Vec<RankedResult>> {
        let meta = collection.meta();
        let wanted = self.effective_context_size(context_size);
        let query_vector = self.embeddings.embed_query(query, &meta.model_name)?;
        let store = collection.store();

        let fetch = if meta.reranker.enabled { wanted.max(meta.reranker.initial_k) } else { wanted };
        let candidates: Vec<SearchResult> = if meta.hybrid_search {
            store
                .hybrid_search(&query_vector, query, fetch)
                .into_iter()
                .map(|h| SearchResult::new(h.id, h.combined_score))
                .collect()
        } else {
            store.search(&query_vector, fetch)
        };
        tracing::debug!(collection = %meta.name, candidates = candidates.len(), hybrid = meta.hybrid_search, "retrieved");

        if meta.reranker.enabled {
            let options = RerankerOptions::from(&meta.reranker);
            match self.reranker.rerank(query, &candidates, collection, &meta.model_name, &options) {
                Ok(ranked) => return Ok(ranked),
                Err(err) => {
                    tracing::warn!(collection = %meta.name, error = %err, "reranking failed, keeping retrieval order");
                }
            }
        }

        Ok(candidates
            .into_iter()
            .filter_map(|c| {
                collection.chunk(&c.id).map(|chunk| RankedResult {
                    chunk,
                    vector_score: c.score,
                    reranker_score: 0.0,
                    final_score: c.score,
                })
            })
            .take(wanted)
            .collect())
    }

    /// Answer `query` from the collection's documents.
    pub fn query(&self, collection: &Collection, query: &str, context_size: usize) -> Result<String> {
        let results = self.retrieve(collection, query, context_size)?;
        let context = build_context(&results, self.context_budget(context_size));
        let prompt = build_prompt(query, &context);
        let model = collection.meta().model_name;
        tracing::debug!(model = %model, chunks = results.len(), context_len = context.len(), "generating answer");
        self.embeddings.provider().generate_completion(&model, &prompt)
    }
}
