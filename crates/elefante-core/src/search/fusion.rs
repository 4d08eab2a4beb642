//! Score normalization and fusion
//!
//! Each retrieval source's raw scores are min-max normalized within its own
//! result set, weighted by the query plan, multiplied by the memory's
//! temporal strength, and merged. Ties break on importance, recency of
//! access, and finally id, so rankings are fully deterministic.

use std::collections::HashMap;

use crate::search::{SearchHit, SubScores};

/// Min-max normalize raw scores into [0, 1] within one result set.
/// A singleton (or any set with a flat score distribution) normalizes to 1.0.
pub fn min_max_normalize(raw: &HashMap<String, f64>) -> HashMap<String, f64> {
    if raw.is_empty() {
        return HashMap::new();
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for score in raw.values() {
        min = min.min(*score);
        max = max.max(*score);
    }
    let span = max - min;
    raw.iter()
        .map(|(id, score)| {
            let normalized = if span > f64::EPSILON {
                (score - min) / span
            } else {
                1.0
            };
            (id.clone(), normalized)
        })
        .collect()
}

/// Fuse normalized per-source scores for one memory:
/// `(w_v·n_vec + w_g·n_graph + w_c·n_conv) · strength`
pub fn fuse(sub: &SubScores, weights: (f64, f64, f64)) -> f64 {
    let (w_vector, w_graph, w_conversation) = weights;
    let weighted = w_vector * sub.vector.unwrap_or(0.0)
        + w_graph * sub.graph.unwrap_or(0.0)
        + w_conversation * sub.conversation.unwrap_or(0.0);
    weighted * sub.strength
}

/// Deterministic ranking order:
/// fused score desc, importance desc, last_accessed desc, id asc.
pub fn sort_ranked(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.importance.cmp(&a.memory.importance))
            .then_with(|| b.memory.last_accessed_at.cmp(&a.memory.last_accessed_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
}

/// Collapse title near-duplicates: among hits sharing a title, only the
/// highest-ranked survives. Assumes `hits` is already sorted.
pub fn dedup_by_title(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen_titles: std::collections::HashSet<String> = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|hit| seen_titles.insert(hit.memory.title.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{content_hash, Kind, Layer, Memory, Status, Sublayer};
    use crate::search::Source;
    use chrono::Utc;

    fn memory(id: &str, title: &str, importance: u8) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.into(),
            content: format!("content {}", id),
            title: title.into(),
            content_hash: content_hash(id),
            layer: Layer::World,
            sublayer: Sublayer::Fact,
            kind: Kind::Note,
            importance,
            confidence: 0.7,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            decay_rate: 0.01,
            reinforcement_factor: 0.1,
            status: Status::Active,
            session_id: None,
            tags: vec![],
            supersedes: None,
            superseded_by: None,
        }
    }

    fn hit(id: &str, title: &str, score: f64, importance: u8) -> SearchHit {
        SearchHit {
            memory: memory(id, title, importance),
            score,
            source: Source::Vector,
            sub_scores: SubScores::default(),
        }
    }

    #[test]
    fn test_min_max_normalize() {
        let raw: HashMap<String, f64> = [
            ("a".to_string(), 10.0),
            ("b".to_string(), 20.0),
            ("c".to_string(), 30.0),
        ]
        .into();
        let normalized = min_max_normalize(&raw);
        assert_eq!(normalized["a"], 0.0);
        assert_eq!(normalized["b"], 0.5);
        assert_eq!(normalized["c"], 1.0);
    }

    #[test]
    fn test_singleton_normalizes_to_one() {
        let raw: HashMap<String, f64> = [("only".to_string(), 0.37)].into();
        let normalized = min_max_normalize(&raw);
        assert_eq!(normalized["only"], 1.0);
    }

    #[test]
    fn test_flat_distribution_normalizes_to_one() {
        let raw: HashMap<String, f64> =
            [("a".to_string(), 5.0), ("b".to_string(), 5.0)].into();
        let normalized = min_max_normalize(&raw);
        assert_eq!(normalized["a"], 1.0);
        assert_eq!(normalized["b"], 1.0);
    }

    #[test]
    fn test_fuse_weighted_sum_times_strength() {
        let sub = SubScores {
            vector: Some(1.0),
            graph: Some(0.5),
            conversation: None,
            strength: 0.8,
        };
        let fused = fuse(&sub, (0.5, 0.4, 0.1));
        // (0.5*1.0 + 0.4*0.5 + 0.1*0) * 0.8
        assert!((fused - 0.56).abs() < 1e-9);
    }

    #[test]
    fn test_sort_is_deterministic_on_ties() {
        let mut hits = vec![
            hit("b", "T-b", 0.5, 5),
            hit("a", "T-a", 0.5, 5),
            hit("c", "T-c", 0.9, 1),
        ];
        // Equalize access times for a true tie between a and b
        let t = Utc::now();
        for h in &mut hits {
            h.memory.last_accessed_at = t;
        }
        sort_ranked(&mut hits);
        assert_eq!(hits[0].memory.id, "c");
        assert_eq!(hits[1].memory.id, "a");
        assert_eq!(hits[2].memory.id, "b");
    }

    #[test]
    fn test_importance_breaks_score_ties() {
        let t = Utc::now();
        let mut hits = vec![hit("a", "T-a", 0.5, 3), hit("b", "T-b", 0.5, 8)];
        for h in &mut hits {
            h.memory.last_accessed_at = t;
        }
        sort_ranked(&mut hits);
        assert_eq!(hits[0].memory.id, "b");
    }

    #[test]
    fn test_dedup_by_title_keeps_best() {
        let mut hits = vec![
            hit("a", "Shared-Title", 0.9, 5),
            hit("b", "Shared-Title", 0.4, 5),
            hit("c", "Other-Title", 0.6, 5),
        ];
        sort_ranked(&mut hits);
        let deduped = dedup_by_title(hits);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].memory.id, "a");
        assert!(deduped.iter().all(|h| h.memory.id != "b"));
    }

    #[test]
    fn test_scores_non_increasing_after_sort() {
        let mut hits = vec![
            hit("a", "T-a", 0.2, 5),
            hit("b", "T-b", 0.9, 5),
            hit("c", "T-c", 0.5, 5),
        ];
        sort_ranked(&mut hits);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
