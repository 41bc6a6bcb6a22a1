//! # dotlore — local context store
//!
//! Tracks sources (files, web pages, text blobs), stores their chunks with
//! embeddings, and answers hybrid similarity queries over them.
//!
//! ## Architecture
//!
//! - **[`config`]** — YAML configuration with dotted keys and `${ENV}` placeholders
//! - **[`db`]** — SQLite + sqlite-vec store: schema, sources, chunks, raw rankings
//! - **[`search`]** — Hybrid query engine with reciprocal rank fusion
//! - **[`error`]** — Shared error type
//!
//! Reading files, crawling, and computing embeddings happen outside this
//! crate; callers hand in text and vectors.

pub mod config;
pub mod db;
pub mod error;
pub mod search;

pub use config::{ConfigResolver, Lookup, RetrievalSettings};
pub use db::filter::{Filter, FilterField, FilterOp, FilterValue};
pub use db::models::{Chunk, Metadata, Source, StoreStats};
pub use db::{Db, DbOptions};
pub use error::{LoreError, Result};
pub use search::{FusionMethod, QueryEngine, QueryHit};
