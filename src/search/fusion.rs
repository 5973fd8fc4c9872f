//! Reciprocal Rank Fusion — blends dense and lexical rankings with
//! configurable weights.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fusion parameters. Weights and the RRF constant live in configuration;
/// the defaults are the documented 0.7 / 0.3 / 60 split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FusionConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

/// One ranked candidate list, best first.
pub type RankedList = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    pub score: f64,
    pub semantic_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

/// Fuse two rankings: `score(c) = Σᵢ wᵢ / (k + rankᵢ(c))` with 1-based
/// ranks. Ties break by semantic rank, then by id.
pub fn fuse(semantic: &RankedList, keyword: &RankedList, config: &FusionConfig) -> Vec<FusedCandidate> {
    let mut candidates: HashMap<&str, FusedCandidate> = HashMap::new();

    for (rank0, id) in semantic.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = config.semantic_weight / (config.rrf_k + rank as f64);
        candidates
            .entry(id.as_str())
            .and_modify(|c| {
                c.score += contribution;
                c.semantic_rank.get_or_insert(rank);
            })
            .or_insert(FusedCandidate {
                id: id.clone(),
                score: contribution,
                semantic_rank: Some(rank),
                keyword_rank: None,
            });
    }

    for (rank0, id) in keyword.iter().enumerate() {
        let rank = rank0 + 1;
        let contribution = config.keyword_weight / (config.rrf_k + rank as f64);
        candidates
            .entry(id.as_str())
            .and_modify(|c| {
                c.score += contribution;
                c.keyword_rank.get_or_insert(rank);
            })
            .or_insert(FusedCandidate {
                id: id.clone(),
                score: contribution,
                semantic_rank: None,
                keyword_rank: Some(rank),
            });
    }

    let mut fused: Vec<FusedCandidate> = candidates.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ra = a.semantic_rank.unwrap_or(usize::MAX);
                let rb = b.semantic_rank.unwrap_or(usize::MAX);
                ra.cmp(&rb)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> RankedList {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keyword_leader_outranks_semantic_leader_with_default_weights() {
        // validate_token_for_user: BM25 rank 1, semantic rank 4
        // AuthService.check:       semantic rank 1, BM25 rank 9
        let semantic = ids(&[
            "AuthService.check",
            "s2",
            "s3",
            "validate_token_for_user",
        ]);
        let keyword = ids(&[
            "validate_token_for_user",
            "k2",
            "k3",
            "k4",
            "k5",
            "k6",
            "k7",
            "k8",
            "AuthService.check",
        ]);

        let fused = fuse(&semantic, &keyword, &FusionConfig::default());
        let validate = fused.iter().find(|c| c.id == "validate_token_for_user").unwrap();
        let check = fused.iter().find(|c| c.id == "AuthService.check").unwrap();
        assert!(
            validate.score > check.score,
            "expected {} > {}",
            validate.score,
            check.score
        );
        assert_eq!(fused[0].id, "validate_token_for_user");
    }

    #[test]
    fn test_candidate_in_both_lists_outranks_single_list() {
        let semantic = ids(&["both", "only_semantic"]);
        let keyword = ids(&["both", "only_keyword"]);
        let fused = fuse(&semantic, &keyword, &FusionConfig::default());
        assert_eq!(fused[0].id, "both");
        assert_eq!(fused[0].semantic_rank, Some(1));
        assert_eq!(fused[0].keyword_rank, Some(1));
    }

    #[test]
    fn test_tie_breaks_by_semantic_rank_then_id() {
        // Two ids with identical scores: same semantic ranks, no keyword.
        let config = FusionConfig {
            semantic_weight: 0.5,
            keyword_weight: 0.5,
            rrf_k: 60.0,
        };
        // a: semantic rank 1; b: keyword rank 1 → identical contributions
        let fused = fuse(&ids(&["a"]), &ids(&["b"]), &config);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - fused[1].score).abs() < 1e-12);
        // semantic-ranked candidate wins the tie
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn test_id_tiebreak_when_all_else_equal() {
        let config = FusionConfig {
            semantic_weight: 0.0,
            keyword_weight: 0.3,
            rrf_k: 60.0,
        };
        // both only in keyword list at symmetric positions is impossible;
        // craft equality via two separate keyword-only candidates at the
        // same rank in two calls is not possible either — so use zero
        // weight to flatten scores.
        let fused = fuse(&ids(&["z", "a"]), &ids(&[]), &config);
        assert_eq!(fused[0].id, "z"); // semantic rank 1 precedes rank 2
        assert_eq!(fused[1].id, "a");
    }

    #[test]
    fn test_empty_inputs() {
        let fused = fuse(&ids(&[]), &ids(&[]), &FusionConfig::default());
        assert!(fused.is_empty());
    }

    #[test]
    fn test_custom_weights_flip_preference() {
        // With keyword weight dominant the keyword-first candidate wins.
        let config = FusionConfig {
            semantic_weight: 0.1,
            keyword_weight: 0.9,
            rrf_k: 60.0,
        };
        let semantic = ids(&["semantic_first", "keyword_first"]);
        let keyword = ids(&["keyword_first", "semantic_first"]);
        let fused = fuse(&semantic, &keyword, &config);
        assert_eq!(fused[0].id, "keyword_first");
    }
}
