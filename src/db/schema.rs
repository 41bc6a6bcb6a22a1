/// Collection descriptors and idempotent provisioning.
///
/// Field layouts are declared once as [`CollectionSchema`] values and
/// validated before any table is created. Existing tables are never altered.
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{CHUNKS_FTS_TABLE, Db, VEC_TABLE};
use crate::error::{LoreError, Result};

pub const SOURCES: &str = "sources";
pub const CHUNKS: &str = "chunks";

const META_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS lore_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

const DIMENSIONS_KEY: &str = "embedding_dimensions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// Fixed-width float32 vector.
    Vector(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
        }
    }

    const fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Integer,
        }
    }
}

/// A named collection with an ordered field layout.
///
/// The first field is the key column for collections that have one
/// (`sources.source_id`); chunks get an implicit integer row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: &'static str,
    pub fields: Vec<Field>,
    keyed: bool,
}

impl CollectionSchema {
    #[must_use]
    pub fn sources() -> Self {
        Self {
            name: SOURCES,
            fields: vec![
                Field::text("source_id"),
                Field::text("source_type"),
                Field::text("source_path"),
                Field::text("content_hash"),
                Field::text("last_updated"),
                Field::text("metadata"),
            ],
            keyed: true,
        }
    }

    #[must_use]
    pub fn chunks(dimensions: usize) -> Self {
        Self {
            name: CHUNKS,
            fields: vec![
                Field::text("source_id"),
                Field::integer("chunk_id"),
                Field::text("text"),
                Field::text("raw_chunk"),
                Field::text("last_updated"),
                Field {
                    name: "embedding",
                    kind: FieldKind::Vector(dimensions),
                },
            ],
            keyed: false,
        }
    }

    /// Width of the vector field, if the collection has one.
    #[must_use]
    pub fn vector_dimensions(&self) -> Option<usize> {
        self.fields.iter().find_map(|f| match f.kind {
            FieldKind::Vector(dims) => Some(dims),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| LoreError::InvalidSchema {
            collection: self.name.to_string(),
            reason,
        };

        if self.fields.is_empty() {
            return Err(fail("no fields".to_string()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if !is_identifier(field.name) {
                return Err(fail(format!("invalid field name `{}`", field.name)));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(fail(format!("duplicate field `{}`", field.name)));
            }
            if field.kind == FieldKind::Vector(0) {
                return Err(fail(format!("vector field `{}` has zero width", field.name)));
            }
        }
        let vectors = self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Vector(_)))
            .count();
        if vectors > 1 {
            return Err(fail("more than one vector field".to_string()));
        }
        if self.keyed && matches!(self.fields[0].kind, FieldKind::Vector(_)) {
            return Err(fail("key field cannot be a vector".to_string()));
        }
        Ok(())
    }

    /// `CREATE TABLE` for the scalar fields.
    fn table_sql(&self) -> String {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        if !self.keyed {
            columns.push("id INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        }
        for (i, field) in self.fields.iter().enumerate() {
            let ty = match field.kind {
                FieldKind::Text => "TEXT",
                FieldKind::Integer => "INTEGER",
                FieldKind::Vector(_) => continue,
            };
            if self.keyed && i == 0 {
                columns.push(format!("{} {ty} PRIMARY KEY NOT NULL", field.name));
            } else {
                columns.push(format!("{} {ty} NOT NULL", field.name));
            }
        }
        format!("CREATE TABLE {} (\n    {}\n)", self.name, columns.join(",\n    "))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl Db {
    /// Create any missing collection. Safe to call on every start.
    ///
    /// The embedding width is pinned the first time the chunk collection is
    /// created; opening it later with another width fails with
    /// [`LoreError::SchemaMismatch`].
    pub fn ensure_collections(&mut self) -> Result<()> {
        let sources = CollectionSchema::sources();
        let chunks = CollectionSchema::chunks(self.dimensions);
        sources.validate()?;
        chunks.validate()?;

        let want_fts = self.capabilities.keyword_search;
        let tx = self.conn.transaction()?;
        tx.execute_batch(META_SQL)?;

        for schema in [&sources, &chunks] {
            if !table_exists(&tx, schema.name)? {
                tx.execute_batch(&schema.table_sql())?;
                info!("Created collection: {}", schema.name);
            }
        }
        tx.execute_batch("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);")?;

        let pinned: Option<String> = tx
            .query_row(
                "SELECT value FROM lore_meta WHERE key = ?",
                params![DIMENSIONS_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match pinned {
            Some(value) => {
                let stored = value.parse::<usize>().map_err(|_| LoreError::InvalidSchema {
                    collection: CHUNKS.to_string(),
                    reason: format!("unreadable pinned dimension `{value}`"),
                })?;
                if stored != self.dimensions {
                    return Err(LoreError::SchemaMismatch {
                        expected: stored,
                        found: self.dimensions,
                    });
                }
            }
            None => {
                tx.execute(
                    "INSERT INTO lore_meta (key, value) VALUES (?, ?)",
                    params![DIMENSIONS_KEY, self.dimensions.to_string()],
                )?;
            }
        }

        if let Some(dims) = chunks.vector_dimensions() {
            if !table_exists(&tx, VEC_TABLE)? {
                tx.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE {VEC_TABLE} USING vec0(embedding float[{dims}])"
                ))?;
                info!("Created vector index: {VEC_TABLE} (float[{dims}])");
            }
        }

        // FTS5 CREATE is not idempotent natively, so check first
        if want_fts && !table_exists(&tx, CHUNKS_FTS_TABLE)? {
            tx.execute_batch(&format!(
                "CREATE VIRTUAL TABLE {CHUNKS_FTS_TABLE} USING fts5(text);
                 INSERT INTO {CHUNKS_FTS_TABLE} (rowid, text) SELECT id, text FROM chunks;"
            ))?;
            info!("Created keyword index: {CHUNKS_FTS_TABLE}");
        }

        self.fts_index = self.fts_compiled && table_exists(&tx, CHUNKS_FTS_TABLE)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;

    #[test]
    fn test_builtin_schemas_validate() {
        CollectionSchema::sources().validate().unwrap();
        CollectionSchema::chunks(1536).validate().unwrap();
        assert_eq!(CollectionSchema::chunks(384).vector_dimensions(), Some(384));
        assert_eq!(CollectionSchema::sources().vector_dimensions(), None);
    }

    #[test]
    fn test_invalid_schemas_rejected() {
        assert!(CollectionSchema::chunks(0).validate().is_err());

        let mut dup = CollectionSchema::sources();
        dup.fields.push(Field::text("source_id"));
        assert!(dup.validate().is_err());

        let mut two_vectors = CollectionSchema::chunks(4);
        two_vectors.fields.push(Field {
            name: "other",
            kind: FieldKind::Vector(4),
        });
        assert!(two_vectors.validate().is_err());

        let mut bad_name = CollectionSchema::sources();
        bad_name.fields.push(Field::text("x; DROP TABLE sources"));
        assert!(bad_name.validate().is_err());
    }

    #[test]
    fn test_table_sql() {
        let sql = CollectionSchema::sources().table_sql();
        assert!(sql.starts_with("CREATE TABLE sources"));
        assert!(sql.contains("source_id TEXT PRIMARY KEY NOT NULL"));

        let sql = CollectionSchema::chunks(8).table_sql();
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("chunk_id INTEGER NOT NULL"));
        assert!(!sql.contains("embedding"));
    }

    #[test]
    fn test_ensure_collections_idempotent() {
        let mut db = Db::open_in_memory_with(DbOptions::with_dimensions(4)).unwrap();
        db.ensure_collections().unwrap();
        db.ensure_collections().unwrap();

        let tables: usize = db
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('sources', 'chunks', 'vec_chunks', 'chunks_fts', 'lore_meta')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_dimension_change_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.db");
        Db::open(&path, DbOptions::with_dimensions(4)).unwrap();

        let err = Db::open(&path, DbOptions::with_dimensions(8)).err().unwrap();
        assert!(matches!(
            err,
            LoreError::SchemaMismatch {
                expected: 4,
                found: 8
            }
        ));

        // Same width opens fine.
        Db::open(&path, DbOptions::with_dimensions(4)).unwrap();
    }

    #[test]
    fn test_keyword_index_backfilled_on_reopen() {
        use crate::db::models::{Chunk, Source};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.db");
        let vector_only = DbOptions {
            dimensions: 4,
            keyword_search: false,
        };

        let mut db = Db::open(&path, vector_only).unwrap();
        db.upsert_source(&Source::new("zoo", "text", "inline", "h")).unwrap();
        db.append_chunks(&[
            Chunk::new("zoo", 0, "The zebra grazes", vec![1.0, 0.0, 0.0, 0.0]),
            Chunk::new("zoo", 1, "A lion sleeps", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .unwrap();
        assert!(!table_exists(&db.conn, CHUNKS_FTS_TABLE).unwrap());
        drop(db);

        let db = Db::open(&path, DbOptions::with_dimensions(4)).unwrap();
        let ranking = db.keyword_ranking("zebra", 10, None).unwrap().unwrap();
        assert_eq!(ranking.len(), 1);
        let hit = db.load_chunk(ranking[0].row_id).unwrap().unwrap();
        assert_eq!(hit.chunk.chunk_id, 0);
        assert_eq!(hit.chunk.raw_chunk, "The zebra grazes");
    }
}
