use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

/// Current time as an RFC 3339 string, the format used for `last_updated`.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Free-form source metadata, stored as a JSON string.
///
/// Values that no longer parse as JSON are surfaced as [`Metadata::Raw`]
/// instead of failing the read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metadata {
    Structured(serde_json::Value),
    Raw(String),
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::Structured(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl Metadata {
    pub(crate) fn encode(&self) -> serde_json::Result<String> {
        match self {
            Metadata::Structured(value) => serde_json::to_string(value),
            Metadata::Raw(raw) => Ok(raw.clone()),
        }
    }

    pub(crate) fn decode(source_id: &str, raw: String) -> Self {
        match serde_json::from_str(&raw) {
            Ok(value) => Metadata::Structured(value),
            Err(e) => {
                warn!("Undecodable metadata for source {source_id}: {e}");
                Metadata::Raw(raw)
            }
        }
    }
}

/// One tracked origin: a file, a web page, or a text blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub source_id: String,
    /// `web`, `file`, `text`, ...
    pub source_type: String,
    /// URL or filesystem path.
    pub source_path: String,
    pub content_hash: String,
    pub last_updated: String,
    pub metadata: Metadata,
}

impl Source {
    pub fn new(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        source_path: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: source_type.into(),
            source_path: source_path.into(),
            content_hash: content_hash.into(),
            last_updated: now_timestamp(),
            metadata: Metadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Metadata::Structured(metadata);
        self
    }
}

/// One text fragment of a source with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub source_id: String,
    /// Position within the source. Unique per source by caller contract.
    pub chunk_id: i64,
    /// Normalized text, indexed for keyword search.
    pub text: String,
    /// Original text, kept for display and citation.
    pub raw_chunk: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub last_updated: String,
}

impl Chunk {
    pub fn new(
        source_id: impl Into<String>,
        chunk_id: i64,
        raw_chunk: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let raw_chunk = raw_chunk.into();
        Self {
            source_id: source_id.into(),
            chunk_id,
            text: normalize_text(&raw_chunk),
            raw_chunk,
            embedding,
            last_updated: now_timestamp(),
        }
    }
}

/// Collapse runs of whitespace so keyword indexing sees clean tokens.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counts across both collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub source_count: usize,
    /// Distinct source types, sorted.
    pub source_types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_roundtrip() {
        let meta = Metadata::Structured(json!({"title": "Guide", "tags": ["a", "b"]}));
        let encoded = meta.encode().unwrap();
        assert_eq!(Metadata::decode("s", encoded), meta);
    }

    #[test]
    fn test_metadata_decode_failure_keeps_raw() {
        let decoded = Metadata::decode("s", "{not json".to_string());
        assert_eq!(decoded, Metadata::Raw("{not json".to_string()));
        assert_eq!(decoded.encode().unwrap(), "{not json");
    }

    #[test]
    fn test_chunk_text_normalized() {
        let chunk = Chunk::new("s", 0, "  Hello\n\n   world\t!", vec![0.0; 4]);
        assert_eq!(chunk.text, "Hello world !");
        assert_eq!(chunk.raw_chunk, "  Hello\n\n   world\t!");
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let ts = now_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "{ts}");
    }
}
