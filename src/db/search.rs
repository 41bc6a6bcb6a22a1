use super::{
    CHUNKS_FTS_TABLE, Db, chunks::check_embedding, deserialize_vector, filter::Filter,
    models::Chunk, serialize_vector,
};
use crate::error::Result;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params};

/// One entry of a single ranking, best first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    /// Internal chunk row id.
    pub row_id: i64,
    /// Cosine distance for vector rankings (lower is better), BM25 for
    /// keyword rankings (lower is better).
    pub raw_score: f64,
}

/// A chunk loaded for a result, with its owning source's type and path.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub source_type: String,
    pub source_path: String,
}

/// Turn free text into a safe FTS5 expression: every alphanumeric term is
/// quoted and the terms are OR-ed. Returns `None` when there are no terms.
pub fn fts_match_expression(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn run_ranking(db: &Db, sql: &str, params: Vec<Value>) -> Result<Vec<RankedCandidate>> {
    let param_refs: Vec<&dyn rusqlite::ToSql> =
        params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

    let mut stmt = db.conn.prepare(sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(RankedCandidate {
            row_id: row.get(0)?,
            raw_score: row.get(1)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn sql_limit(top_k: usize) -> Value {
    Value::Integer(i64::try_from(top_k).unwrap_or(i64::MAX))
}

fn push_filter(query: &mut String, params: &mut Vec<Value>, filter: Option<&Filter>, leading: &str) {
    let Some(filter) = filter.filter(|f| !f.is_empty()) else {
        return;
    };
    let (clauses, values) = filter.to_sql();
    query.push_str(leading);
    query.push_str(&clauses.join(" AND "));
    params.extend(values);
}

impl Db {
    /// Rank chunks by cosine distance to `query_vector`, nearest first.
    pub fn vector_ranking(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<RankedCandidate>> {
        check_embedding(query_vector, self.dimensions)?;

        let mut query = String::from(
            r#"
            SELECT id, distance FROM (
                SELECT c.id AS id, vec_distance_cosine(v.embedding, ?) AS distance
                FROM vec_chunks v
                JOIN chunks c ON v.rowid = c.id
                JOIN sources s ON s.source_id = c.source_id
            "#,
        );
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(query_vector))];
        push_filter(&mut query, &mut params, filter, " WHERE ");

        // Distance is NULL for stored vectors without a direction
        query.push_str(
            " ) WHERE distance IS NOT NULL ORDER BY distance ASC, id ASC LIMIT ?",
        );
        params.push(sql_limit(top_k));

        run_ranking(self, &query, params)
    }

    /// Rank chunks by BM25 over their normalized text, best first.
    ///
    /// Returns `Ok(None)` when the backend has no keyword index; an empty
    /// ranking means the index exists but nothing matched.
    pub fn keyword_ranking(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Option<Vec<RankedCandidate>>> {
        if !self.capabilities.keyword_search || !self.fts_index {
            return Ok(None);
        }
        let Some(expression) = fts_match_expression(query_text) else {
            return Ok(Some(Vec::new()));
        };

        let mut query = format!(
            r#"
            SELECT c.id, bm25({CHUNKS_FTS_TABLE}) AS score
            FROM {CHUNKS_FTS_TABLE}
            JOIN chunks c ON c.id = {CHUNKS_FTS_TABLE}.rowid
            JOIN sources s ON s.source_id = c.source_id
            WHERE {CHUNKS_FTS_TABLE} MATCH ?
            "#
        );
        let mut params: Vec<Value> = vec![Value::Text(expression)];
        push_filter(&mut query, &mut params, filter, " AND ");

        query.push_str(" ORDER BY score ASC, c.id ASC LIMIT ?");
        params.push(sql_limit(top_k));

        run_ranking(self, &query, params).map(Some)
    }

    /// Load one chunk (with embedding) by internal row id.
    pub fn load_chunk(&self, row_id: i64) -> Result<Option<StoredChunk>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT c.source_id, c.chunk_id, c.text, c.raw_chunk, c.last_updated,
                   v.embedding, s.source_type, s.source_path
            FROM chunks c
            JOIN vec_chunks v ON v.rowid = c.id
            JOIN sources s ON s.source_id = c.source_id
            WHERE c.id = ?
            "#,
        )?;
        let stored = stmt
            .query_row(params![row_id], |row| {
                let embedding: Vec<u8> = row.get(5)?;
                Ok(StoredChunk {
                    chunk: Chunk {
                        source_id: row.get(0)?,
                        chunk_id: row.get(1)?,
                        text: row.get(2)?,
                        raw_chunk: row.get(3)?,
                        last_updated: row.get(4)?,
                        embedding: deserialize_vector(&embedding),
                    },
                    source_type: row.get(6)?,
                    source_path: row.get(7)?,
                })
            })
            .optional()?;
        Ok(stored)
    }
}
