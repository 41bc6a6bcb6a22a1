//! Rank fusion over a primary (vector) ranking and an optional keyword ranking.
//!
//! Both methods return candidates in descending fused score. Ties keep the
//! primary ranking's order; candidates only present in the keyword ranking
//! follow in keyword order.
use std::collections::HashMap;
use std::hash::Hash;

use serde_yaml::Value;

use crate::config::{ConfigResolver, Lookup};
use crate::error::{LoreError, Result};

pub const DEFAULT_RANK_CONSTANT: u32 = 60;
pub const DEFAULT_ALPHA: f64 = 0.5;

/// How vector and keyword rankings are combined, from `reranking.*`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMethod {
    /// Reciprocal rank fusion: `Σ 1 / (rank_constant + rank)`, rank 1-based.
    Rrf { rank_constant: u32 },
    /// Min-max normalised scores: `(1 - alpha) * keyword + alpha * vector`.
    Linear { alpha: f64 },
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Rrf {
            rank_constant: DEFAULT_RANK_CONSTANT,
        }
    }
}

impl FusionMethod {
    /// Read `reranking.method` (plus its parameters).
    ///
    /// An absent configuration or key selects RRF. An unknown method is an
    /// error; there is no silent fallback.
    pub fn from_config(config: &ConfigResolver) -> Result<Self> {
        let method = match config.get("reranking.method")? {
            Lookup::NoConfig | Lookup::Missing => return Ok(Self::default()),
            Lookup::Found(Value::String(name)) => name,
            Lookup::Found(other) => {
                return Err(LoreError::UnsupportedFusionMethod(format!("{other:?}")));
            }
        };

        match method.trim().to_ascii_lowercase().as_str() {
            "rrf" => {
                let rank_constant = match config.get("reranking.rank_constant")? {
                    Lookup::Found(v) => v
                        .as_u64()
                        .filter(|k| (1..=u64::from(u32::MAX)).contains(k))
                        .map(|k| k as u32)
                        .ok_or_else(|| LoreError::InvalidConfig {
                            key: "reranking.rank_constant".to_string(),
                            reason: "expected a positive integer".to_string(),
                        })?,
                    _ => DEFAULT_RANK_CONSTANT,
                };
                Ok(FusionMethod::Rrf { rank_constant })
            }
            "linear" => {
                let alpha = match config.get("reranking.alpha")? {
                    Lookup::Found(v) => v
                        .as_f64()
                        .filter(|a| (0.0..=1.0).contains(a))
                        .ok_or_else(|| LoreError::InvalidConfig {
                            key: "reranking.alpha".to_string(),
                            reason: "expected a number in [0, 1]".to_string(),
                        })?,
                    _ => DEFAULT_ALPHA,
                };
                Ok(FusionMethod::Linear { alpha })
            }
            _ => Err(LoreError::UnsupportedFusionMethod(method)),
        }
    }

    /// Fuse rankings. `primary` and `keyword` carry `(key, raw_score)` best
    /// first, where a lower raw score is better in both.
    pub fn fuse<K>(&self, primary: &[(K, f64)], keyword: &[(K, f64)]) -> Vec<(K, f64)>
    where
        K: Copy + Eq + Hash,
    {
        match *self {
            FusionMethod::Rrf { rank_constant } => {
                let primary: Vec<K> = primary.iter().map(|(k, _)| *k).collect();
                let keyword: Vec<K> = keyword.iter().map(|(k, _)| *k).collect();
                reciprocal_rank_fusion(&[primary.as_slice(), keyword.as_slice()], rank_constant)
            }
            FusionMethod::Linear { alpha } => linear_fusion(primary, keyword, alpha),
        }
    }
}

/// Candidates in first-seen order across the rankings, primary first.
fn union_order<K: Copy + Eq + Hash>(rankings: &[&[K]]) -> (Vec<K>, HashMap<K, usize>) {
    let mut order = Vec::new();
    let mut position = HashMap::new();
    for ranking in rankings {
        for key in ranking.iter() {
            if !position.contains_key(key) {
                position.insert(*key, order.len());
                order.push(*key);
            }
        }
    }
    (order, position)
}

fn sort_by_score<K: Copy + Eq + Hash>(
    order: &[K],
    position: &HashMap<K, usize>,
    scores: &HashMap<K, f64>,
) -> Vec<(K, f64)> {
    let mut fused: Vec<(K, f64)> = order
        .iter()
        .map(|k| (*k, scores.get(k).copied().unwrap_or(0.0)))
        .collect();
    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| position[&a.0].cmp(&position[&b.0]))
    });
    fused
}

/// Reciprocal rank fusion. Absence from a ranking contributes nothing.
pub fn reciprocal_rank_fusion<K>(rankings: &[&[K]], rank_constant: u32) -> Vec<(K, f64)>
where
    K: Copy + Eq + Hash,
{
    let (order, position) = union_order(rankings);
    let k = f64::from(rank_constant);

    let mut scores: HashMap<K, f64> = HashMap::with_capacity(order.len());
    for ranking in rankings {
        for (i, key) in ranking.iter().enumerate() {
            *scores.entry(*key).or_insert(0.0) += 1.0 / (k + (i + 1) as f64);
        }
    }

    sort_by_score(&order, &position, &scores)
}

/// Min-max normalise "lower is better" scores to `[0, 1]`, best = 1.
fn normalize_lower_is_better<K: Copy + Eq + Hash>(ranking: &[(K, f64)]) -> HashMap<K, f64> {
    let min = ranking.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = ranking.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    ranking
        .iter()
        .map(|(k, s)| {
            let norm = if range > 0.0 { (max - s) / range } else { 1.0 };
            (*k, norm)
        })
        .collect()
}

/// Weighted sum of normalised scores: `(1 - alpha) * keyword + alpha * vector`.
pub fn linear_fusion<K>(primary: &[(K, f64)], keyword: &[(K, f64)], alpha: f64) -> Vec<(K, f64)>
where
    K: Copy + Eq + Hash,
{
    let primary_keys: Vec<K> = primary.iter().map(|(k, _)| *k).collect();
    let keyword_keys: Vec<K> = keyword.iter().map(|(k, _)| *k).collect();
    let (order, position) = union_order(&[primary_keys.as_slice(), keyword_keys.as_slice()]);

    let vector_norm = normalize_lower_is_better(primary);
    let keyword_norm = normalize_lower_is_better(keyword);

    let scores: HashMap<K, f64> = order
        .iter()
        .map(|k| {
            let v = vector_norm.get(k).copied().unwrap_or(0.0);
            let kw = keyword_norm.get(k).copied().unwrap_or(0.0);
            (*k, (1.0 - alpha) * kw + alpha * v)
        })
        .collect();

    sort_by_score(&order, &position, &scores)
}
