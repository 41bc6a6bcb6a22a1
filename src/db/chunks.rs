use super::{Db, models::*, serialize_vector, sources::source_exists};
use crate::error::{LoreError, Result};
use rusqlite::{Connection, params};
use std::collections::BTreeSet;
use tracing::debug;

/// Reject a vector that cosine distance is undefined for.
pub(crate) fn check_embedding(vector: &[f32], dimensions: usize) -> Result<()> {
    if vector.len() != dimensions {
        return Err(LoreError::SchemaMismatch {
            expected: dimensions,
            found: vector.len(),
        });
    }
    if !vector.iter().all(|x| x.is_finite()) {
        return Err(LoreError::InvalidEmbedding(
            "non-finite component".to_string(),
        ));
    }
    if vector.iter().all(|x| *x == 0.0) {
        return Err(LoreError::InvalidEmbedding("zero vector".to_string()));
    }
    Ok(())
}

/// Reject the batch if any embedding has the wrong width or no direction.
pub(crate) fn check_dimensions(chunks: &[Chunk], dimensions: usize) -> Result<()> {
    for chunk in chunks {
        check_embedding(&chunk.embedding, dimensions).map_err(|err| match err {
            LoreError::InvalidEmbedding(reason) => LoreError::InvalidEmbedding(format!(
                "{}#{}: {reason}",
                chunk.source_id, chunk.chunk_id
            )),
            other => other,
        })?;
    }
    Ok(())
}

/// Insert chunk rows plus their vector (and keyword) index entries.
pub(crate) fn insert_chunks(conn: &Connection, chunks: &[Chunk], fts_index: bool) -> Result<()> {
    let mut insert_chunk = conn.prepare_cached(
        "INSERT INTO chunks (source_id, chunk_id, text, raw_chunk, last_updated) VALUES (?, ?, ?, ?, ?)",
    )?;
    let mut insert_vec =
        conn.prepare_cached("INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)")?;

    for chunk in chunks {
        insert_chunk.execute(params![
            chunk.source_id,
            chunk.chunk_id,
            chunk.text,
            chunk.raw_chunk,
            chunk.last_updated,
        ])?;
        let row_id = conn.last_insert_rowid();

        insert_vec.execute(params![row_id, serialize_vector(&chunk.embedding)])?;

        if fts_index {
            conn.execute(
                "INSERT INTO chunks_fts (rowid, text) VALUES (?, ?)",
                params![row_id, chunk.text],
            )?;
        }
    }
    Ok(())
}

/// Delete every chunk of `source_id` from all three tables. Returns the count.
pub(crate) fn delete_chunks(conn: &Connection, source_id: &str, fts_index: bool) -> Result<usize> {
    // Virtual tables do not take part in cascades
    conn.execute(
        "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE source_id = ?)",
        params![source_id],
    )?;
    if fts_index {
        conn.execute(
            "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE source_id = ?)",
            params![source_id],
        )?;
    }
    let removed = conn.execute("DELETE FROM chunks WHERE source_id = ?", params![source_id])?;
    Ok(removed)
}

impl Db {
    /// Append a batch of chunks.
    ///
    /// Every embedding must match the collection width and every chunk's
    /// source must already be registered; otherwise nothing is written.
    /// `chunk_id` uniqueness within a source is the caller's responsibility:
    /// appending the same batch twice stores it twice.
    pub fn append_chunks(&mut self, new_chunks: &[Chunk]) -> Result<()> {
        if new_chunks.is_empty() {
            return Ok(());
        }
        check_dimensions(new_chunks, self.dimensions)?;

        let tx = self.conn.transaction()?;
        let owners: BTreeSet<&str> = new_chunks.iter().map(|c| c.source_id.as_str()).collect();
        for owner in owners {
            if !source_exists(&tx, owner)? {
                return Err(LoreError::SourceNotFound(owner.to_string()));
            }
        }
        insert_chunks(&tx, new_chunks, self.fts_index)?;
        tx.commit()?;

        debug!("Appended {} chunks", new_chunks.len());
        Ok(())
    }

    /// Remove every chunk owned by `source_id`, keeping the source record.
    pub fn delete_chunks_by_source(&mut self, source_id: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = delete_chunks(&tx, source_id, self.fts_index)?;
        tx.commit()?;

        debug!("Deleted {removed} chunks of source {source_id}");
        Ok(removed)
    }

    /// Chunk and source counts plus the distinct source types.
    pub fn stats(&self) -> Result<StoreStats> {
        let chunk_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        let source_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))?;

        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT source_type FROM sources ORDER BY source_type")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut source_types = Vec::new();
        for row in rows {
            source_types.push(row?);
        }

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            source_count: source_count as usize,
            source_types,
        })
    }
}
