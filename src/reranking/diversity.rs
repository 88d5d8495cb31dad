//! Stage 2 of the FlashRank-style reranker: greedy marginal-utility
//! selection for result diversity, run after cross-encoder relevance
//! scoring (`CrossEncoderReranker`).

/// Greedily select `top_k` indices from `relevance`, penalizing candidates
/// similar to ones already chosen.
///
/// `argmax(relevance)` is picked first; every subsequent pick maximizes
/// `relevance[i] - diversity_weight * max_{j in selected} sim(i, j)`, where
/// `sim` is cosine similarity over `embeddings`. Returns indices into the
/// original candidate list, in selection order (selection order doubles as
/// final rank order).
pub fn marginal_utility_selection(
    relevance: &[f32],
    embeddings: &[Vec<f32>],
    top_k: usize,
    diversity_weight: f32,
) -> Vec<usize> {
    let n = relevance.len();
    if n == 0 {
        return Vec::new();
    }
    if embeddings.len() != n {
        // Embeddings unavailable for diversity scoring — degrade to plain top-k by relevance.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            relevance[b]
                .partial_cmp(&relevance[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(top_k);
        return order;
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(top_k.min(n));

    let first = *remaining
        .iter()
        .max_by(|&&a, &&b| relevance[a].partial_cmp(&relevance[b]).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap();
    selected.push(first);
    remaining.retain(|&i| i != first);

    while selected.len() < top_k.min(n) && !remaining.is_empty() {
        let mut best_idx = remaining[0];
        let mut best_score = f32::MIN;

        for &candidate in &remaining {
            let max_sim = selected
                .iter()
                .map(|&s| cosine_similarity(&embeddings[candidate], &embeddings[s]))
                .fold(f32::MIN, f32::max);
            let score = relevance[candidate] - diversity_weight * max_sim;
            if score > best_score {
                best_score = score;
                best_idx = candidate;
            }
        }

        selected.push(best_idx);
        remaining.retain(|&i| i != best_idx);
    }

    selected
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pick_is_always_highest_relevance() {
        let relevance = vec![0.9, 0.95, 0.8];
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let picked = marginal_utility_selection(&relevance, &embeddings, 3, 0.3);
        assert_eq!(picked[0], 1);
    }

    #[test]
    fn diverse_candidate_beats_near_duplicate_of_the_top_pick() {
        // index 1 is a near-duplicate of index 0; index 2 is dissimilar but slightly less relevant.
        let relevance = vec![0.95, 0.93, 0.85];
        let embeddings = vec![vec![1.0, 0.0], vec![0.99, 0.01], vec![0.0, 1.0]];
        let picked = marginal_utility_selection(&relevance, &embeddings, 2, 0.8);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn missing_embeddings_degrades_to_plain_relevance_order() {
        let relevance = vec![0.2, 0.9, 0.5];
        let picked = marginal_utility_selection(&relevance, &[], 3, 0.3);
        assert_eq!(picked, vec![1, 2, 0]);
    }
}
