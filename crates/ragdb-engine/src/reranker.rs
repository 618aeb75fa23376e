use std::sync::{Arc, LazyLock};

use regex::Regex;

use ragdb_core::collection::RerankerSettings;
use ragdb_core::error::Result;
use ragdb_core::similarity::compare_scores;
use ragdb_core::traits::{ChunkLookup, Provider};
use ragdb_core::types::{RankedResult, SearchResult};

const RELEVANCE_PROMPT: &str = "You are a document relevance scoring system. Rate how relevant a document is to a query on a scale from 0 to 1, where 0 is completely irrelevant and 1 is highly relevant.

Query: {query}

Document:
{document}

Relevance score (output only a single number between 0 and 1):
";

const ADAPTIVE_PROMPT: &str = "You are an advanced document relevance scoring system. Your task is to determine if a document contains useful information to answer a specific query.

Query: {query}

Document Content:
{document}

Score guidelines:
- Score 0.0-0.2: Document is completely irrelevant to the query
- Score 0.3-0.5: Document has minimal relevance but doesn't directly answer the query
- Score 0.6-0.8: Document contains partial information that's useful for answering the query
- Score 0.9-1.0: Document contains highly relevant information that directly answers the query

Only output a single number between 0 and 1 representing your relevance assessment:
";

static SCORE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?").ok());

#[derive(Debug, Clone, PartialEq)]
pub struct RerankerOptions {
    pub top_k: usize,
    pub initial_k: usize,
    pub score_threshold: f32,
    pub reranker_weight: f32,
    /// Empty means the collection's generation model.
    pub model: String,
    /// Keep everything above the threshold instead of truncating to `top_k`.
    pub adaptive_filtering: bool,
}

impl Default for RerankerOptions {
    fn default() -> Self {
        Self::from(&RerankerSettings::default())
    }
}

impl From<&RerankerSettings> for RerankerOptions {
    fn from(s: &RerankerSettings) -> Self {
        Self {
            top_k: s.top_k,
            initial_k: s.initial_k,
            score_threshold: s.threshold,
            reranker_weight: s.weight,
            model: s.model.clone(),
            adaptive_filtering: s.adaptive_filtering,
        }
    }
}

/// First number in a completion, if it is finite.
pub fn parse_relevance_score(text: &str) -> Option<f32> {
    let re = SCORE_PATTERN.as_ref()?;
    let score: f32 = re.find(text)?.as_str().parse().ok()?;
    score.is_finite().then_some(score)
}

pub fn build_scoring_prompt(query: &str, document: &str, adaptive: bool) -> String {
    let template = if adaptive { ADAPTIVE_PROMPT } else { RELEVANCE_PROMPT };
    template.replacen("{query}", query, 1).replacen("{document}", document, 1)
}

/// Second-pass scoring of retrieved candidates with the completion provider.
pub struct RerankerService {
    provider: Arc<dyn Provider>,
}

impl RerankerService {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// A provider error fails the whole batch; an unparsable answer falls
    /// back to the candidate's vector score.
    pub fn rerank(
        &self,
        query: &str,
        candidates: &[SearchResult],
        chunks: &dyn ChunkLookup,
        collection_model: &str,
        options: &RerankerOptions,
    ) -> Result<Vec<RankedResult>> {
        let model = if options.model.is_empty() { collection_model } else { options.model.as_str() };
        let weight = options.reranker_weight;
        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(chunk) = chunks.chunk(&candidate.id) else {
                continue;
            };
            let prompt = build_scoring_prompt(query, &chunk.content, options.adaptive_filtering);
            let response = self.provider.generate_completion(model, &prompt)?;
            let reranker_score = match parse_relevance_score(&response) {
                Some(score) => score.clamp(0.0, 1.0),
                None => {
                    tracing::warn!(id = %candidate.id, response = %response.trim(), "unparsable relevance score, using vector score");
                    candidate.score.clamp(0.0, 1.0)
                }
            };
            let final_score = weight * reranker_score + (1.0 - weight) * candidate.score;
            if final_score >= options.score_threshold {
                ranked.push(RankedResult { chunk, vector_score: candidate.score, reranker_score, final_score });
            }
        }
        ranked.sort_by(|a, b| compare_scores(a.final_score, b.final_score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        if !options.adaptive_filtering && options.top_k > 0 && ranked.len() > options.top_k {
            tracing::debug!(from = ranked.len(), to = options.top_k, "truncating reranked results");
            ranked.truncate(options.top_k);
        }
        Ok(ranked)
    }
}
