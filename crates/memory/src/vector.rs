//! Vector similarity utilities.
//!
//! Shared by the similarity stores and the embedding tier's centroid
//! comparison, so both rank with exactly the same arithmetic.

use relayclaw_core::store::SimilarityHit;
use relayclaw_core::turn::EmbeddingRecord;

/// Cosine similarity in `[-1, 1]`.
///
/// Mismatched lengths, empty vectors and zero vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // f64 accumulation; tier 2 margins are a few hundredths wide
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f64, 0.0f64, 0.0f64), |(dot, na, nb), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = (norm_a * norm_b).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

/// Rank records by cosine similarity to `query`, best first.
///
/// Records whose dimension differs from the query are never compared.
pub fn rank_by_similarity<'a>(
    records: impl IntoIterator<Item = &'a EmbeddingRecord>,
    query: &[f32],
    limit: usize,
) -> Vec<SimilarityHit> {
    let mut hits: Vec<SimilarityHit> = records
        .into_iter()
        .filter(|r| r.vector.len() == query.len())
        .map(|r| SimilarityHit {
            turn_id: r.turn_id.clone(),
            source_text: r.source_text.clone(),
            score: cosine_similarity(&r.vector, query),
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            turn_id: id.into(),
            vector,
            source_text: format!("text of {id}"),
        }
    }

    #[test]
    fn cosine_bounds() {
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let sim = cosine_similarity(&[0.2, 0.1], &[20.0, 10.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_matches_hand_computed_value() {
        // [1,2,3]·[4,5,6] = 32; |a|=√14, |b|=√77
        let expected = 32.0 / (14.0f64.sqrt() * 77.0f64.sqrt());
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        assert!((sim as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn ranking_orders_and_skips_foreign_dimensions() {
        let records = vec![
            record("far", vec![0.0, 1.0]),
            record("near", vec![1.0, 0.1]),
            record("other-model", vec![1.0, 0.0, 0.0]),
        ];
        let hits = rank_by_similarity(&records, &[1.0, 0.0], 10);
        let ids: Vec<_> = hits.iter().map(|h| h.turn_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[test]
    fn ranking_respects_limit() {
        let records = vec![record("a", vec![1.0]), record("b", vec![1.0]), record("c", vec![1.0])];
        assert_eq!(rank_by_similarity(&records, &[1.0], 2).len(), 2);
    }
}
