//! Hybrid retrieval scoring (§4.C).
//!
//! Pure, storage-agnostic scoring functions. `manager.rs` runs the FTS (and,
//! when an `Embedder` is configured, vector) queries, turns each result set
//! into a 1-based rank list, and calls into here to combine them. Keeping
//! the arithmetic free of `rusqlite` types makes it straightforward to unit
//! test against the exact formulas §4.C pins down.

use std::collections::HashMap;
use std::hash::Hash;

use vigil_core::config::RetrievalConfig;

use crate::types::ConfidenceTier;

/// `exp(-ln2 * age / halfLife)`, zero-clamped on `half_life_days <= 0`.
pub fn recency_decay(age_ms: i64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = age_ms.max(0) as f64 / 86_400_000.0;
    (-std::f64::consts::LN_2 * age_days / half_life_days).exp()
}

/// FTS-only score: `ftsWeight * 1/(rrfK + rank) * (1 + recencyWeight *
/// decay) * (1 + confidenceBoost)`. `rank` is 1-based (best match = 1).
pub fn fts_only_score(
    rank: usize,
    age_ms: i64,
    confidence: ConfidenceTier,
    half_life_days: f64,
    cfg: &RetrievalConfig,
) -> f64 {
    let decay = recency_decay(age_ms, half_life_days);
    let base = cfg.fts_weight * (1.0 / (cfg.rrf_k + rank as f64));
    base * (1.0 + cfg.recency_weight * decay) * (1.0 + confidence.boost())
}

/// Hybrid score: `rrf = ftsWeight/(rrfK+rank_fts) + vecWeight/(rrfK+rank_vec)`,
/// missing ranks contribute 0, then the same recency/confidence multipliers.
pub fn hybrid_score(
    rank_fts: Option<usize>,
    rank_vec: Option<usize>,
    age_ms: i64,
    confidence: ConfidenceTier,
    half_life_days: f64,
    cfg: &RetrievalConfig,
) -> f64 {
    let fts_term = rank_fts
        .map(|r| cfg.fts_weight / (cfg.rrf_k + r as f64))
        .unwrap_or(0.0);
    let vec_term = rank_vec
        .map(|r| cfg.vec_weight / (cfg.rrf_k + r as f64))
        .unwrap_or(0.0);
    let rrf = fts_term + vec_term;
    let decay = recency_decay(age_ms, half_life_days);
    rrf * (1.0 + cfg.recency_weight * decay) * (1.0 + confidence.boost())
}

/// Turn a result set already ordered best-first into a `{id -> 1-based
/// rank}` map, for feeding into `hybrid_score`.
pub fn rank_map<I: Eq + Hash + Clone>(ordered_ids: &[I]) -> HashMap<I, usize> {
    ordered_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i + 1))
        .collect()
}

/// Sanitize free-text user input into a literal-phrase FTS5 `MATCH` query.
/// Each whitespace-delimited token becomes a quoted literal (doubled inner
/// quotes), so the query operators FTS5 would otherwise parse out of raw
/// text (`-`, `*`, `:`, `"`) cannot be injected by the person being
/// remembered about.
pub fn sanitize_fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cosine similarity between two equal-length embeddings. Returns 0.0 for
/// a zero-magnitude vector rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Rank candidates by descending cosine similarity to `query`, ties broken
/// by original order (stable sort).
pub fn rank_by_embedding<I: Clone>(query: &[f32], candidates: &[(I, Vec<f32>)]) -> Vec<I> {
    let mut scored: Vec<(I, f32)> = candidates
        .iter()
        .map(|(id, emb)| (id.clone(), cosine_similarity(query, emb)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(id, _)| id).collect()
}
