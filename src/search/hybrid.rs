use std::collections::HashMap;

use crate::storage::SearchHit;

/// Result from hybrid search combining vector and FTS results
#[derive(Debug, Clone)]
pub struct HybridResult {
    pub id: String,
    pub score: f32,
    pub source: HybridSource,
    pub hit: Option<SearchHit>,
}

#[derive(Debug, Clone, Copy)]
pub enum HybridSource {
    Vector,
    TextSearch,
    Both,
}

/// Score-aware RRF — standard RRF weighted by normalized original similarity scores.
/// Unlike plain RRF which discards quality signals, this modulates rank-based scores
/// by the original similarity/BM25 scores so high-confidence matches get a boost.
/// `score_weight` controls the blend: 0.0 = pure RRF, higher = more score influence.
pub fn score_aware_rrf(
    vector_results: Vec<(String, f32)>,
    fts_results: Vec<(String, f32)>,
    k: usize,
    top_k: usize,
    score_weight: f32,
) -> Vec<(String, f32, HybridSource)> {
    let normalize = |results: &[(String, f32)]| -> HashMap<String, f32> {
        if results.is_empty() {
            return HashMap::new();
        }
        let max = results.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let min = results.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
        if (max - min).abs() < 1e-9 {
            // All scores identical — assign uniform normalized score
            return results.iter().map(|(id, _)| (id.clone(), 0.5)).collect();
        }
        let range = max - min;
        results
            .iter()
            .map(|(id, s)| (id.clone(), (s - min) / range))
            .collect()
    };

    let vec_norm = normalize(&vector_results);
    let fts_norm = normalize(&fts_results);

    let mut scores: HashMap<String, (f32, HybridSource)> = HashMap::new();

    for (rank, (id, _)) in vector_results.iter().enumerate() {
        let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
        let orig_score = vec_norm.get(id).copied().unwrap_or(0.0);
        let combined = rrf * (1.0 + score_weight * orig_score);
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += combined;
                *src = HybridSource::Both;
            })
            .or_insert((combined, HybridSource::Vector));
    }

    for (rank, (id, _)) in fts_results.iter().enumerate() {
        let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
        let orig_score = fts_norm.get(id).copied().unwrap_or(0.0);
        let combined = rrf * (1.0 + score_weight * orig_score);
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += combined;
                *src = HybridSource::Both;
            })
            .or_insert((combined, HybridSource::TextSearch));
    }

    let mut merged: Vec<(String, f32, HybridSource)> = scores
        .into_iter()
        .map(|(id, (score, source))| (id, score, source))
        .collect();

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);

    // Normalize scores to [0, 1] so downstream thresholds work correctly.
    // Raw RRF scores are in the 0.01-0.05 range which makes threshold filtering meaningless.
    if let Some(max_score) = merged.first().map(|(_, s, _)| *s) {
        if max_score > 0.0 {
            for item in &mut merged {
                item.1 /= max_score;
            }
        }
    }

    merged
}

/// Alpha-weighted Reciprocal Rank Fusion — blends two independent rank-based
/// RRF contributions rather than blending normalized scores. Each list
/// contributes `alpha * 1/(k+rank)` (dense) or `(1-alpha) * 1/(k+rank)`
/// (sparse); a document appearing in both lists sums both contributions.
/// A document's position in each list matters more than its raw score, so
/// extreme outlier scores from one side can't drown out the other.
pub fn alpha_rrf(
    vector_results: Vec<(String, f32)>,
    fts_results: Vec<(String, f32)>,
    k: usize,
    alpha: f32,
    top_k: usize,
) -> Vec<(String, f32, HybridSource)> {
    let mut scores: HashMap<String, (f32, HybridSource)> = HashMap::new();

    for (rank, (id, _)) in vector_results.iter().enumerate() {
        let contribution = alpha * (1.0 / (k as f32 + rank as f32 + 1.0));
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += contribution;
                *src = HybridSource::Both;
            })
            .or_insert((contribution, HybridSource::Vector));
    }

    for (rank, (id, _)) in fts_results.iter().enumerate() {
        let contribution = (1.0 - alpha) * (1.0 / (k as f32 + rank as f32 + 1.0));
        scores
            .entry(id.clone())
            .and_modify(|(s, src)| {
                *s += contribution;
                *src = HybridSource::Both;
            })
            .or_insert((contribution, HybridSource::TextSearch));
    }

    let mut merged: Vec<(String, f32, HybridSource)> = scores
        .into_iter()
        .map(|(id, (score, source))| (id, score, source))
        .collect();

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod alpha_rrf_tests {
    use super::*;

    #[test]
    fn pure_dense_at_alpha_one_matches_dense_rank_order() {
        let dense = vec![
            ("a".to_string(), 0.9),
            ("b".to_string(), 0.5),
            ("c".to_string(), 0.1),
        ];
        let sparse = vec![
            ("c".to_string(), 10.0),
            ("a".to_string(), 1.0),
            ("b".to_string(), 0.1),
        ];
        let fused = alpha_rrf(dense, sparse, 60, 1.0, 10);
        let order: Vec<&str> = fused.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn pure_sparse_at_alpha_zero_matches_sparse_rank_order() {
        let dense = vec![
            ("a".to_string(), 0.9),
            ("b".to_string(), 0.5),
            ("c".to_string(), 0.1),
        ];
        let sparse = vec![
            ("c".to_string(), 10.0),
            ("a".to_string(), 1.0),
            ("b".to_string(), 0.1),
        ];
        let fused = alpha_rrf(dense, sparse, 60, 0.0, 10);
        let order: Vec<&str> = fused.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn doc_in_both_lists_outranks_single_list_doc_at_similar_rank() {
        let dense = vec![("shared".to_string(), 0.8), ("dense_only".to_string(), 0.79)];
        let sparse = vec![("shared".to_string(), 0.8), ("sparse_only".to_string(), 0.79)];
        let fused = alpha_rrf(dense, sparse, 60, 0.5, 10);
        assert_eq!(fused[0].0, "shared");
        assert!(matches!(fused[0].2, HybridSource::Both));
    }
}
