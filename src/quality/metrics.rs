//! Quality Metrics & Logger (C18): the overall-score formula, a rolling
//! JSON-lines log of every interaction, and an aggregate report bucketed by
//! complexity (§4.18). The logger never blocks the answer path — a write
//! failure is logged and swallowed, same posture as self-critique.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::answer::{AnswerMetadata, QualityTier};
use crate::rag::AnswerComplexity;

pub const STRUCTURE_WEIGHT: f32 = 0.25;
pub const DENSITY_WEIGHT: f32 = 0.25;
pub const NATURALNESS_WEIGHT: f32 = 0.20;
pub const CONFIDENCE_WEIGHT: f32 = 0.30;

/// `overall = 0.25*structure + 0.25*density + 0.20*naturalness + 0.30*confidence`.
/// [`QualityTier::from_overall`] turns the result into a tier.
pub fn overall_score(structure: f32, density: f32, naturalness: f32, confidence: f32) -> f32 {
    STRUCTURE_WEIGHT * structure
        + DENSITY_WEIGHT * density
        + NATURALNESS_WEIGHT * naturalness
        + CONFIDENCE_WEIGHT * confidence
}

/// One line of `quality_metrics.jsonl`: everything needed to reconstruct an
/// aggregate report without re-running the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub query: String,
    pub complexity: AnswerComplexity,
    pub structure_score: f32,
    pub density_score: f32,
    pub naturalness_score: f32,
    pub confidence: f32,
    pub overall_quality_score: f32,
    pub quality_tier: QualityTier,
    pub refinement_applied: bool,
    pub used_web_search: bool,
}

impl QualityRecord {
    pub fn from_metadata(query: &str, metadata: &AnswerMetadata, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            timestamp,
            query: query.to_string(),
            complexity: metadata.complexity,
            structure_score: metadata.structure_score,
            density_score: metadata.density_score,
            naturalness_score: metadata.naturalness_score,
            confidence: metadata.confidence,
            overall_quality_score: metadata.overall_quality_score,
            quality_tier: metadata.quality_tier,
            refinement_applied: metadata.refinement_applied,
            used_web_search: metadata.used_web_search,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComplexityBucketReport {
    pub count: usize,
    pub avg_structure_score: f32,
    pub avg_density_score: f32,
    pub avg_naturalness_score: f32,
    pub avg_confidence: f32,
    pub avg_overall_quality_score: f32,
    pub refinement_rate: f32,
    pub web_search_rate: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateReport {
    pub total_interactions: usize,
    pub by_complexity: HashMap<String, ComplexityBucketReport>,
    pub overall_refinement_rate: f32,
}

/// Appends one JSON line per interaction to a file and can reload that file
/// to compute an [`AggregateReport`]. Writes are serialized with a mutex so
/// concurrent `answer()` calls don't interleave lines.
pub struct QualityLogger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl QualityLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), write_lock: Arc::new(Mutex::new(())) }
    }

    /// Appends `record` as one JSON line. Logged and swallowed on I/O error —
    /// metrics logging must never fail an answer.
    pub async fn log(&self, record: &QualityRecord) {
        let _guard = self.write_lock.lock();
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize quality record");
                return;
            }
        };
        let result = async {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to append quality record");
        }
    }

    /// Reads every line written so far and builds an aggregate report,
    /// bucketed by [`AnswerComplexity`]. Malformed lines are skipped.
    pub async fn aggregate_report(&self) -> AggregateReport {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(_) => return AggregateReport::default(),
        };

        let records: Vec<QualityRecord> = contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        build_report(&records)
    }
}

fn build_report(records: &[QualityRecord]) -> AggregateReport {
    let mut by_complexity: HashMap<String, Vec<&QualityRecord>> = HashMap::new();
    for record in records {
        by_complexity.entry(record.complexity.as_str().to_string()).or_default().push(record);
    }

    let mut report = AggregateReport { total_interactions: records.len(), ..Default::default() };

    for (bucket, items) in by_complexity {
        let n = items.len() as f32;
        let refined = items.iter().filter(|r| r.refinement_applied).count() as f32;
        let web = items.iter().filter(|r| r.used_web_search).count() as f32;
        report.by_complexity.insert(
            bucket,
            ComplexityBucketReport {
                count: items.len(),
                avg_structure_score: items.iter().map(|r| r.structure_score).sum::<f32>() / n,
                avg_density_score: items.iter().map(|r| r.density_score).sum::<f32>() / n,
                avg_naturalness_score: items.iter().map(|r| r.naturalness_score).sum::<f32>() / n,
                avg_confidence: items.iter().map(|r| r.confidence).sum::<f32>() / n,
                avg_overall_quality_score: items.iter().map(|r| r.overall_quality_score).sum::<f32>() / n,
                refinement_rate: refined / n,
                web_search_rate: web / n,
            },
        );
    }

    if !records.is_empty() {
        let refined = records.iter().filter(|r| r.refinement_applied).count() as f32;
        report.overall_refinement_rate = refined / records.len() as f32;
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(complexity: AnswerComplexity, overall: f32, refined: bool) -> QualityRecord {
        QualityRecord {
            timestamp: chrono::DateTime::from_timestamp(0, 0).expect("epoch is valid"),
            query: "q".to_string(),
            complexity,
            structure_score: 1.0,
            density_score: 1.0,
            naturalness_score: 1.0,
            confidence: overall,
            overall_quality_score: overall,
            quality_tier: QualityTier::from_overall(overall),
            refinement_applied: refined,
            used_web_search: false,
        }
    }

    #[test]
    fn overall_score_matches_weighted_formula() {
        let score = overall_score(0.8, 0.6, 0.9, 0.7);
        let expected = 0.25 * 0.8 + 0.25 * 0.6 + 0.20 * 0.9 + 0.30 * 0.7;
        assert!((score - expected).abs() < 1e-6);
    }

    #[test]
    fn aggregate_report_buckets_by_complexity() {
        let records = vec![
            record(AnswerComplexity::Simple, 0.9, false),
            record(AnswerComplexity::SingleHop, 0.6, true),
            record(AnswerComplexity::SingleHop, 0.8, false),
        ];
        let report = build_report(&records);
        assert_eq!(report.total_interactions, 3);
        let single_hop = &report.by_complexity["single_hop"];
        assert_eq!(single_hop.count, 2);
        assert!((single_hop.refinement_rate - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_log_produces_empty_report() {
        let report = build_report(&[]);
        assert_eq!(report.total_interactions, 0);
        assert_eq!(report.overall_refinement_rate, 0.0);
    }
}
