//! Vector similarity utilities.

use aicrew_core::retrieval::RetrievedSnippet;
use crate::store::KnowledgeRecord;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank records by cosine similarity to a query embedding.
///
/// Returns at most `limit` snippets sorted by descending score. Records
/// scoring below `min_score` are dropped.
pub fn rank(
    records: &[KnowledgeRecord],
    query_embedding: &[f32],
    limit: usize,
    min_score: Option<f32>,
) -> Vec<RetrievedSnippet> {
    let mut scored: Vec<RetrievedSnippet> = records
        .iter()
        .filter_map(|record| {
            let score = cosine_similarity(&record.embedding, query_embedding);
            if min_score.is_some_and(|min| score < min) {
                return None;
            }
            Some(RetrievedSnippet {
                content: record.content.clone(),
                score,
                source: record.source.clone(),
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, embedding: Vec<f32>) -> KnowledgeRecord {
        KnowledgeRecord {
            content: content.into(),
            source: "test.txt".into(),
            chunk_index: 0,
            embedding,
        }
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn rank_orders_and_truncates() {
        let records = vec![
            record("far", vec![0.0, 1.0]),
            record("near", vec![1.0, 0.1]),
            record("exact", vec![1.0, 0.0]),
        ];
        let hits = rank(&records, &[1.0, 0.0], 2, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "exact");
        assert_eq!(hits[1].content, "near");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn rank_applies_threshold() {
        let records = vec![record("far", vec![0.0, 1.0]), record("exact", vec![1.0, 0.0])];
        let hits = rank(&records, &[1.0, 0.0], 5, Some(0.5));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "exact");
    }
}
