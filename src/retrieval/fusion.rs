//! Reciprocal Rank Fusion of retrieval lanes.
//!
//! RRF combines ranked lists using ranks only, so no score calibration is
//! needed across heterogeneous retrievers: `RRF(d) = Σ_i 1/(k + rank_i(d))`
//! with ranks starting at 1.

/// The standard RRF damping constant.
pub const RRF_K: f32 = 60.0;

/// Fuse ranked candidate lists into a single descending-score ranking.
///
/// Each input list is ordered best-first. Ties break lexicographically by
/// id so the output is deterministic for fixed inputs.
pub fn reciprocal_rank_fusion(lists: &[Vec<String>], k: f32) -> Vec<(String, f32)> {
    let mut scores: std::collections::HashMap<String, f32> = std::collections::HashMap::new();

    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + (rank + 1) as f32);
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

/// Normalize fused scores into [0, 1] by dividing by the top score.
pub fn normalize_scores(mut fused: Vec<(String, f32)>) -> Vec<(String, f32)> {
    let top = fused.first().map(|(_, s)| *s).unwrap_or(0.0);
    if top > 0.0 {
        for (_, score) in &mut fused {
            *score /= top;
        }
    }
    fused
}
