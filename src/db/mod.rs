//! Context store using SQLite and sqlite-vec
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use tracing::info;

use crate::error::Result;

pub mod chunks;
pub mod filter;
pub mod models;
pub mod schema;
pub mod search;
pub mod sources;

pub(crate) const VEC_TABLE: &str = "vec_chunks";
pub(crate) const CHUNKS_FTS_TABLE: &str = "chunks_fts";

/// Default storage location, relative to the project root.
pub const DEFAULT_DB_PATH: &str = ".lore/db/lore.db";

/// Default embedding width (text-embedding-3-small).
pub const DEFAULT_DIMENSIONS: usize = 1536;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// How a [`Db`] handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    /// Embedding width of the chunk collection.
    pub dimensions: usize,
    /// Use the FTS5 keyword index for hybrid queries when the engine has it.
    pub keyword_search: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            keyword_search: true,
        }
    }
}

impl DbOptions {
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }
}

/// What the storage backend can do, probed once when the handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Keyword (BM25) ranking over chunk text is available.
    pub keyword_search: bool,
}

/// Handle to the context store. Every component borrows this; mutations take
/// `&mut self` and each runs inside one transaction.
pub struct Db {
    pub(crate) conn: Connection,
    pub(crate) dimensions: usize,
    pub(crate) capabilities: Capabilities,
    pub(crate) fts_compiled: bool,
    /// The keyword index table exists and must be kept in sync on writes.
    pub(crate) fts_index: bool,
}

impl Db {
    /// Open the store at `path`, creating parent directories and any missing
    /// collections.
    pub fn open<P: AsRef<Path>>(path: P, options: DbOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing context store: {}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Register sqlite-vec extension globally
        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::init(conn, options)
    }

    /// Open an in-memory store with default options.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(DbOptions::default())
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory_with(options: DbOptions) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, options)
    }

    fn init(conn: Connection, options: DbOptions) -> Result<Self> {
        // Verify sqlite-vec is loaded
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        let fts_compiled: bool = conn.query_row(
            "SELECT sqlite_compileoption_used('ENABLE_FTS5')",
            [],
            |row| row.get(0),
        )?;

        let mut db = Self {
            conn,
            dimensions: options.dimensions,
            capabilities: Capabilities {
                keyword_search: fts_compiled && options.keyword_search,
            },
            fts_compiled,
            fts_index: false,
        };
        db.ensure_collections()?;

        info!(
            "Context store ready (dimensions: {}, keyword search: {})",
            db.dimensions, db.capabilities.keyword_search
        );
        Ok(db)
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Embedding width pinned for the chunk collection.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Serialize a float32 vector into little-endian bytes for the vec0 table.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice(vec).to_vec()
    } else {
        vec.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Inverse of [`serialize_vector`]. Trailing partial floats are ignored.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
