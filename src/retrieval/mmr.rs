//! Maximal Marginal Relevance diversification.
//!
//! Re-ranks candidates to balance relevance against redundancy with
//! already-selected results: pick
//! `argmax (λ · rel(d) − (1 − λ) · max_{s ∈ S} sim(d, s))` until k
//! results are selected. λ = 1 reduces to pure relevance order, so the
//! selected set equals the top-k of the incoming ranking.

use crate::store::cosine_similarity;

/// Select up to `k` candidate indices by MMR, with relevance supplied by
/// the caller (e.g., fused retrieval scores).
///
/// `candidates` are embeddings aligned with `relevance`. A candidate with
/// an empty embedding contributes zero redundancy, so it competes on
/// relevance alone. The returned indices are in selection order.
pub fn mmr_select(
    relevance: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    if k == 0 || candidates.is_empty() || relevance.len() != candidates.len() {
        return Vec::new();
    }

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx], &candidates[s]))
                .fold(0.0f32, f32::max);

            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.swap_remove(best_pos));
    }

    selected
}

/// MMR against a query embedding: relevance is cosine similarity to the
/// query.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();
    mmr_select(&relevance, candidates, k, lambda)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pick_is_most_relevant() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.5, 0.5],
        ];
        let selected = maximal_marginal_relevance(&query, &candidates, 3, 0.7);
        assert_eq!(selected[0], 1);
    }

    #[test]
    fn test_diversity_penalizes_near_duplicates() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.1, 0.0],  // near-duplicate of the first
            vec![0.6, 0.0, 0.8],   // less relevant, more diverse
        ];
        let selected = maximal_marginal_relevance(&query, &candidates, 2, 0.5);
        assert_eq!(selected, vec![0, 2]);
    }

    #[test]
    fn test_lambda_one_is_pure_relevance_order() {
        let relevance = vec![0.4, 1.0, 0.7];
        let candidates = vec![vec![1.0, 0.0]; 3];
        let selected = mmr_select(&relevance, &candidates, 3, 1.0);
        assert_eq!(selected, vec![1, 2, 0]);
    }

    #[test]
    fn test_lambda_one_membership_equals_top_k() {
        let relevance = vec![0.9, 0.2, 0.8, 0.1, 0.7];
        let candidates = vec![vec![1.0, 0.0]; 5];
        let mut selected = mmr_select(&relevance, &candidates, 3, 1.0);
        selected.sort_unstable();
        assert_eq!(selected, vec![0, 2, 4]);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let query = vec![1.0];
        let candidates = vec![vec![1.0], vec![0.5]];
        let selected = maximal_marginal_relevance(&query, &candidates, 10, 0.7);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_empty_embedding_competes_on_relevance() {
        let relevance = vec![0.9, 0.5];
        let candidates = vec![Vec::new(), vec![1.0, 0.0]];
        let selected = mmr_select(&relevance, &candidates, 2, 0.7);
        // The embedding-less candidate still ranks by its fused score
        assert_eq!(selected, vec![0, 1]);
    }

    #[test]
    fn test_length_mismatch_returns_empty() {
        let relevance = vec![0.9];
        let candidates = vec![vec![1.0], vec![0.5]];
        assert!(mmr_select(&relevance, &candidates, 2, 0.7).is_empty());
    }
}
