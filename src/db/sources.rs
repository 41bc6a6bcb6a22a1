use super::{Db, chunks, models::*};
use crate::error::{LoreError, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

const SOURCE_COLUMNS: &str =
    "source_id, source_type, source_path, content_hash, last_updated, metadata";

fn map_source_row(row: &Row<'_>) -> rusqlite::Result<(Source, String)> {
    let source_id: String = row.get(0)?;
    let metadata: String = row.get(5)?;
    Ok((
        Source {
            source_id: source_id.clone(),
            source_type: row.get(1)?,
            source_path: row.get(2)?,
            content_hash: row.get(3)?,
            last_updated: row.get(4)?,
            metadata: Metadata::Raw(String::new()),
        },
        metadata,
    ))
}

fn decode_source((mut source, metadata): (Source, String)) -> Source {
    source.metadata = Metadata::decode(&source.source_id, metadata);
    source
}

/// Insert or replace a source record by key.
pub(crate) fn write_source(conn: &Connection, source: &Source) -> Result<()> {
    let metadata = source.metadata.encode()?;
    conn.execute(
        r#"
        INSERT INTO sources (source_id, source_type, source_path, content_hash, last_updated, metadata)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            source_type = excluded.source_type,
            source_path = excluded.source_path,
            content_hash = excluded.content_hash,
            last_updated = excluded.last_updated,
            metadata = excluded.metadata
        "#,
        params![
            source.source_id,
            source.source_type,
            source.source_path,
            source.content_hash,
            source.last_updated,
            metadata,
        ],
    )?;
    Ok(())
}

pub(crate) fn source_exists(conn: &Connection, source_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sources WHERE source_id = ?",
            params![source_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Db {
    /// Insert a source, replacing any record with the same `source_id`.
    ///
    /// Existing chunks are left alone; use [`reingest_source`](Self::reingest_source)
    /// to swap content.
    pub fn upsert_source(&mut self, source: &Source) -> Result<()> {
        write_source(&self.conn, source)?;
        debug!("Upserted source {}", source.source_id);
        Ok(())
    }

    /// Replace a source and all of its chunks in one transaction.
    ///
    /// Every chunk must belong to `source`; a chunk naming another source is
    /// rejected as [`LoreError::SourceNotFound`] before anything is written.
    pub fn reingest_source(&mut self, source: &Source, new_chunks: &[Chunk]) -> Result<()> {
        chunks::check_dimensions(new_chunks, self.dimensions)?;
        if let Some(stray) = new_chunks
            .iter()
            .find(|c| c.source_id != source.source_id)
        {
            return Err(LoreError::SourceNotFound(stray.source_id.clone()));
        }

        let tx = self.conn.transaction()?;
        write_source(&tx, source)?;
        let removed = chunks::delete_chunks(&tx, &source.source_id, self.fts_index)?;
        chunks::insert_chunks(&tx, new_chunks, self.fts_index)?;
        tx.commit()?;

        info!(
            "Re-ingested source {} ({} chunks replaced by {})",
            source.source_id,
            removed,
            new_chunks.len()
        );
        Ok(())
    }

    /// Get a source by id, `None` if it is not registered.
    pub fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE source_id = ?"),
                params![source_id],
                map_source_row,
            )
            .optional()?;
        Ok(row.map(decode_source))
    }

    /// All registered sources, ordered by id.
    pub fn list_sources(&self) -> Result<Vec<Source>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY source_id"))?;
        let rows = stmt.query_map([], map_source_row)?;

        let mut sources = Vec::new();
        for row in rows {
            sources.push(decode_source(row?));
        }
        Ok(sources)
    }

    /// Whether `source_id` is registered with exactly this content hash.
    pub fn source_unchanged(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT content_hash FROM sources WHERE source_id = ?",
                params![source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(content_hash))
    }

    /// Remove a source and every chunk it owns.
    ///
    /// Fails with [`LoreError::SourceNotFound`] if the id is unknown; nothing
    /// is written in that case.
    pub fn remove_source(&mut self, source_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        if !source_exists(&tx, source_id)? {
            return Err(LoreError::SourceNotFound(source_id.to_string()));
        }
        let removed = chunks::delete_chunks(&tx, source_id, self.fts_index)?;
        tx.execute("DELETE FROM sources WHERE source_id = ?", params![source_id])?;
        tx.commit()?;

        info!("Removed source {source_id} ({removed} chunks)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use serde_json::json;

    fn test_db() -> Db {
        Db::open_in_memory_with(DbOptions::with_dimensions(4)).unwrap()
    }

    #[test]
    fn test_sources_crud() {
        let mut db = test_db();
        let source = Source::new("guide", "file", "docs/guide.md", "abc123")
            .with_metadata(json!({"title": "Guide"}));

        db.upsert_source(&source).unwrap();
        assert_eq!(db.get_source("guide").unwrap(), Some(source.clone()));
        assert_eq!(db.list_sources().unwrap().len(), 1);

        db.remove_source("guide").unwrap();
        assert!(db.get_source("guide").unwrap().is_none());
        assert!(db.list_sources().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_not_duplicates() {
        let mut db = test_db();
        let source = Source::new("page", "web", "https://example.com", "h1");
        db.upsert_source(&source).unwrap();
        db.upsert_source(&source).unwrap();
        assert_eq!(db.list_sources().unwrap().len(), 1);

        let mut changed = source.clone();
        changed.content_hash = "h2".to_string();
        changed.source_path = "https://example.com/v2".to_string();
        db.upsert_source(&changed).unwrap();

        let sources = db.list_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].content_hash, "h2");
        assert_eq!(sources[0].source_path, "https://example.com/v2");
    }

    #[test]
    fn test_remove_unknown_source() {
        let mut db = test_db();
        let err = db.remove_source("missing").unwrap_err();
        assert!(matches!(err, LoreError::SourceNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_source_unchanged() {
        let mut db = test_db();
        assert!(!db.source_unchanged("a", "h").unwrap());
        db.upsert_source(&Source::new("a", "text", "inline", "h")).unwrap();
        assert!(db.source_unchanged("a", "h").unwrap());
        assert!(!db.source_unchanged("a", "other").unwrap());
    }

    #[test]
    fn test_corrupt_metadata_surfaces_raw() {
        let mut db = test_db();
        db.upsert_source(&Source::new("a", "file", "a.txt", "h")).unwrap();
        db.conn
            .execute(
                "UPDATE sources SET metadata = 'not json {' WHERE source_id = 'a'",
                [],
            )
            .unwrap();

        let source = db.get_source("a").unwrap().unwrap();
        assert_eq!(source.metadata, Metadata::Raw("not json {".to_string()));
    }

    #[test]
    fn test_reingest_replaces_chunks() {
        let mut db = test_db();
        let source = Source::new("a", "file", "a.txt", "h1");
        db.upsert_source(&source).unwrap();
        db.append_chunks(&[
            Chunk::new("a", 0, "one", vec![1.0, 0.0, 0.0, 0.0]),
            Chunk::new("a", 1, "two", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .unwrap();

        let mut updated = source.clone();
        updated.content_hash = "h2".to_string();
        db.reingest_source(&updated, &[Chunk::new("a", 0, "fresh", vec![0.0, 0.0, 1.0, 0.0])])
            .unwrap();

        assert_eq!(db.stats().unwrap().chunk_count, 1);
        assert!(db.source_unchanged("a", "h2").unwrap());

        // A bad batch leaves the previous content in place.
        let err = db
            .reingest_source(&updated, &[Chunk::new("a", 0, "bad", vec![1.0; 3])])
            .unwrap_err();
        assert!(matches!(err, LoreError::SchemaMismatch { .. }));
        assert_eq!(db.stats().unwrap().chunk_count, 1);
    }
}
