//! Cosine similarity and the result ordering shared by every backend.

use std::cmp::Ordering;

use crate::types::SearchResult;

/// Cosine similarity of two vectors.
///
/// Returns 0 when either side is empty, the lengths differ, or either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        #[allow(clippy::cast_possible_truncation)]
        let sim = sim as f32;
        sim
    } else {
        0.0
    }
}

/// Descending by score, ties by ascending id. NaN sorts last.
pub fn by_score_desc(a: &SearchResult, b: &SearchResult) -> Ordering {
    compare_scores(a.score, b.score).then_with(|| a.id.cmp(&b.id))
}

pub fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Sort in place and keep the best `k`.
pub fn rank(results: &mut Vec<SearchResult>, k: usize) {
    results.sort_by(by_score_desc);
    results.truncate(k);
}
