//! Hybrid query engine.
//!
//! A query runs a vector ranking and, when the backend has a keyword index,
//! a BM25 ranking over the same filtered chunk set. The two are combined by
//! the configured [`FusionMethod`]. Without a keyword index the result is the
//! vector ranking unchanged.
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::config::ConfigResolver;
use crate::db::Db;
use crate::db::filter::Filter;
use crate::db::models::Chunk;
use crate::db::search::RankedCandidate;
use crate::error::Result;

pub mod context;
pub mod fusion;

pub use context::build_context;
pub use fusion::FusionMethod;

/// Each ranking fetches `limit * CANDIDATE_MULTIPLIER` candidates (at least
/// `MIN_CANDIDATE_POOL`) so fusion can promote items from below the cut.
pub const CANDIDATE_MULTIPLIER: usize = 4;
pub const MIN_CANDIDATE_POOL: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub chunk: Chunk,
    pub source_type: String,
    pub source_path: String,
    /// Fused score, or `1 - distance / 2` when only the vector ranking ran.
    pub score: f64,
    /// Cosine distance to the query, if the chunk was a vector candidate.
    pub distance: Option<f64>,
    /// 1-based position in the vector ranking.
    pub vector_rank: Option<usize>,
    /// 1-based position in the keyword ranking.
    pub keyword_rank: Option<usize>,
}

fn candidate_pool(limit: usize) -> usize {
    limit.saturating_mul(CANDIDATE_MULTIPLIER).max(MIN_CANDIDATE_POOL)
}

fn positions(ranking: &[RankedCandidate]) -> HashMap<i64, (usize, f64)> {
    ranking
        .iter()
        .enumerate()
        .map(|(i, c)| (c.row_id, (i + 1, c.raw_score)))
        .collect()
}

fn pairs(ranking: &[RankedCandidate]) -> Vec<(i64, f64)> {
    ranking.iter().map(|c| (c.row_id, c.raw_score)).collect()
}

pub struct QueryEngine<'a> {
    db: &'a Db,
    fusion: FusionMethod,
}

impl<'a> QueryEngine<'a> {
    pub fn new(db: &'a Db, fusion: FusionMethod) -> Self {
        Self { db, fusion }
    }

    /// Build an engine with the fusion method from `reranking.method`.
    pub fn from_config(db: &'a Db, config: &ConfigResolver) -> Result<Self> {
        Ok(Self::new(db, FusionMethod::from_config(config)?))
    }

    #[must_use]
    pub fn fusion(&self) -> FusionMethod {
        self.fusion
    }

    /// Return at most `limit` chunks ranked against the query.
    ///
    /// `filter` restricts both rankings before candidates are cut.
    pub fn query(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryHit>> {
        let pool = candidate_pool(limit);
        let vector = self.db.vector_ranking(query_embedding, pool, filter)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keyword = self.db.keyword_ranking(query_text, pool, filter)?;

        let fused = match &keyword {
            Some(keyword) => self.fusion.fuse(&pairs(&vector), &pairs(keyword)),
            None => {
                debug!("Keyword index unavailable, ranking by vector similarity only");
                vector
                    .iter()
                    .map(|c| (c.row_id, 1.0 - c.raw_score / 2.0))
                    .collect()
            }
        };

        let vector_pos = positions(&vector);
        let keyword_pos = keyword.as_deref().map(positions).unwrap_or_default();

        let mut hits = Vec::with_capacity(limit.min(fused.len()));
        for (row_id, score) in fused {
            if hits.len() == limit {
                break;
            }
            let Some(stored) = self.db.load_chunk(row_id)? else {
                continue;
            };
            hits.push(QueryHit {
                chunk: stored.chunk,
                source_type: stored.source_type,
                source_path: stored.source_path,
                score,
                distance: vector_pos.get(&row_id).map(|(_, d)| *d),
                vector_rank: vector_pos.get(&row_id).map(|(r, _)| *r),
                keyword_rank: keyword_pos.get(&row_id).map(|(r, _)| *r),
            });
        }

        debug!(
            "Query returned {} hits ({} vector, {} keyword candidates)",
            hits.len(),
            vector.len(),
            keyword.as_ref().map_or(0, Vec::len)
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use crate::db::filter::FilterField;
    use crate::db::models::Source;
    use crate::error::LoreError;

    fn seeded_db(keyword_search: bool) -> Db {
        let mut db = Db::open_in_memory_with(DbOptions {
            dimensions: 4,
            keyword_search,
        })
        .unwrap();
        db.upsert_source(&Source::new("guide", "file", "docs/guide.md", "h1"))
            .unwrap();
        db.upsert_source(&Source::new("blog", "web", "https://blog.example/post", "h2"))
            .unwrap();
        db.append_chunks(&[
            Chunk::new("guide", 0, "Install the toolchain", vec![1.0, 0.0, 0.0, 0.0]),
            Chunk::new("guide", 1, "Configure the reranking method", vec![0.9, 0.1, 0.0, 0.0]),
            Chunk::new("blog", 0, "Reranking with reciprocal rank fusion", vec![0.7, 0.3, 0.0, 0.0]),
            Chunk::new("blog", 1, "Unrelated gardening notes", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .unwrap();
        db
    }

    fn ids(hits: &[QueryHit]) -> Vec<(String, i64)> {
        hits.iter()
            .map(|h| (h.chunk.source_id.clone(), h.chunk.chunk_id))
            .collect()
    }

    #[test]
    fn test_query_respects_limit() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let hits = engine.query(&[1.0, 0.0, 0.0, 0.0], "toolchain", 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(engine.query(&[1.0, 0.0, 0.0, 0.0], "x", 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_keyword_match_is_promoted() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let hits = engine
            .query(&[1.0, 0.0, 0.0, 0.0], "reciprocal fusion", 4, None)
            .unwrap();

        // blog#0 is third by vector but the only keyword match:
        // 1/63 + 1/61 beats guide#0 at 1/61.
        assert_eq!(ids(&hits)[0], ("blog".to_string(), 0));
        assert_eq!(hits[0].vector_rank, Some(3));
        assert_eq!(hits[0].keyword_rank, Some(1));
        assert_eq!(ids(&hits)[1], ("guide".to_string(), 0));
        assert_eq!(hits[1].keyword_rank, None);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_degrades_to_vector_order_without_keyword_index() {
        let db = seeded_db(false);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let query = [1.0, 0.0, 0.0, 0.0];
        let hits = engine.query(&query, "reciprocal fusion", 4, None).unwrap();

        let ranks: Vec<Option<usize>> = hits.iter().map(|h| h.vector_rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(ids(&hits)[0], ("guide".to_string(), 0));
        assert!(hits.iter().all(|h| h.keyword_rank.is_none()));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_applies_to_both_rankings() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let filter = Filter::new().field_eq(FilterField::SourceType, "file");
        let hits = engine
            .query(&[1.0, 0.0, 0.0, 0.0], "reciprocal reranking", 10, Some(&filter))
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.source_type == "file"));
    }

    #[test]
    fn test_linear_fusion_engine() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::Linear { alpha: 1.0 });
        let hits = engine
            .query(&[0.0, 0.0, 1.0, 0.0], "reciprocal", 4, None)
            .unwrap();
        assert_eq!(ids(&hits)[0], ("blog".to_string(), 1));
    }

    #[test]
    fn test_query_rejects_wrong_width() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let err = engine.query(&[1.0; 3], "x", 5, None).unwrap_err();
        assert!(matches!(err, LoreError::SchemaMismatch { expected: 4, found: 3 }));
    }

    #[test]
    fn test_query_rejects_zero_vector() {
        let db = seeded_db(true);
        let engine = QueryEngine::new(&db, FusionMethod::default());
        let err = engine.query(&[0.0; 4], "reranking", 5, None).unwrap_err();
        assert!(matches!(err, LoreError::InvalidEmbedding(_)));
        // Even a zero limit validates the vector.
        let err = engine.query(&[0.0; 4], "reranking", 0, None).unwrap_err();
        assert!(matches!(err, LoreError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_bad_stored_vector_is_rejected_and_query_keeps_working() {
        let mut db = seeded_db(true);
        assert!(db
            .append_chunks(&[Chunk::new("blog", 2, "blank text", vec![0.0; 4])])
            .is_err());
        assert!(db
            .append_chunks(&[Chunk::new("blog", 2, "nan text", vec![f32::NAN; 4])])
            .is_err());

        let engine = QueryEngine::new(&db, FusionMethod::default());
        let hits = engine.query(&[1.0, 0.0, 0.0, 0.0], "text", 5, None).unwrap();
        assert_eq!(hits.len(), 4);
    }
}
