//! Weighted fusion of a vector result list and a lexical result list.

use std::collections::HashMap;

use ragdb_core::similarity::compare_scores;
use ragdb_core::types::{HybridSearchResult, SearchResult};
use ragdb_text::LexicalHit;

/// Score given to the side on which a candidate did not appear.
pub const MISSING_SIGNAL_FLOOR: f32 = 0.01;

fn max_score<I: Iterator<Item = f32>>(scores: I) -> f32 {
    scores.filter(|s| s.is_finite()).fold(0.0, f32::max)
}

fn normalize(score: f32, max: f32) -> f32 {
    if max > 0.0 && score.is_finite() {
        score / max
    } else {
        0.0
    }
}

/// Normalize each side by its best score, union the ids, and combine as
/// `weight * text + (1 - weight) * vector`. Sorted by combined score, then id.
pub fn fuse(vector: &[SearchResult], text: &[LexicalHit], weight: f32, limit: usize) -> Vec<HybridSearchResult> {
    let max_vec = max_score(vector.iter().map(|r| r.score));
    let max_text = max_score(text.iter().map(|h| h.score));

    let mut by_id: HashMap<&str, (Option<f32>, Option<f32>)> = HashMap::new();
    for r in vector {
        let slot = by_id.entry(r.id.as_str()).or_default();
        let s = normalize(r.score, max_vec);
        slot.0 = Some(slot.0.map_or(s, |old| old.max(s)));
    }
    for h in text {
        let slot = by_id.entry(h.id.as_str()).or_default();
        let s = normalize(h.score, max_text);
        slot.1 = Some(slot.1.map_or(s, |old| old.max(s)));
    }

    let mut fused: Vec<HybridSearchResult> = by_id
        .into_iter()
        .map(|(id, (v, t))| {
            let vector_score = v.unwrap_or(MISSING_SIGNAL_FLOOR);
            let text_score = t.unwrap_or(MISSING_SIGNAL_FLOOR);
            HybridSearchResult {
                id: id.to_string(),
                vector_score,
                text_score,
                combined_score: weight * text_score + (1.0 - weight) * vector_score,
            }
        })
        .collect();
    fused.sort_by(|a, b| compare_scores(a.combined_score, b.combined_score).then_with(|| a.id.cmp(&b.id)));
    fused.truncate(limit);
    fused
}
