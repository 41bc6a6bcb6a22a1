/// Configuration module for dotlore.
///
/// The configuration is a nested YAML document addressed by dotted keys
/// (`embedding.model`, `retrieval.chunk_size`). Reads never fail on a missing
/// key; a missing *document* is reported separately so callers can prompt for
/// `lore init`.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::db::DEFAULT_DIMENSIONS;
use crate::error::{LoreError, Result};

// ── Defaults ─────────────────────────────────────────────────────────

const DEFAULT_CONFIG_PATH: &str = ".lore/config.yaml";

const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;
const DEFAULT_MAX_CONTEXT_LENGTH: usize = 4000;

fn default_config_yaml() -> String {
    let retrieval = RetrievalSettings::default();
    format!(
        r#"
embedding:
  provider: openai
  model: text-embedding-3-small
  dimensions: {DEFAULT_DIMENSIONS}
reranking:
  method: rrf
retrieval:
  max_context_length: {max_context_length}
  chunk_size: {chunk_size}
  chunk_overlap: {chunk_overlap}
api_keys:
  openai: ${{OPENAI_API_KEY}}
  anthropic: ${{ANTHROPIC_API_KEY}}
"#,
        max_context_length = retrieval.max_context_length,
        chunk_size = retrieval.chunk_size,
        chunk_overlap = retrieval.chunk_overlap,
    )
}

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// The default configuration document written by `lore init`.
pub fn default_document() -> Result<Mapping> {
    match serde_yaml::from_str(&default_config_yaml())? {
        Value::Mapping(doc) => Ok(doc),
        _ => Err(LoreError::InvalidConfig {
            key: String::new(),
            reason: "default document is not a mapping".to_string(),
        }),
    }
}

// ── Lookup result ────────────────────────────────────────────────────

/// Result of reading one dotted key.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// No configuration document exists.
    NoConfig,
    /// The document exists but the key (or one of its parents) does not.
    Missing,
    Found(Value),
}

impl Lookup {
    #[must_use]
    pub fn found(self) -> Option<Value> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

// ── Resolver ─────────────────────────────────────────────────────────

/// Reads and writes the persisted configuration document.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    path: PathBuf,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl ConfigResolver {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write the default document. Returns `false` if a document already
    /// exists and `force` is not set.
    pub fn init(&self, force: bool) -> Result<bool> {
        if self.exists() && !force {
            return Ok(false);
        }
        self.write(&default_document()?)?;
        info!("Wrote default configuration: {}", self.path.display());
        Ok(true)
    }

    /// Load the whole document, or `None` if there is none.
    pub fn all(&self) -> Result<Option<Mapping>> {
        if !self.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        match serde_yaml::from_str(&data)? {
            Value::Null => Ok(None),
            Value::Mapping(doc) => Ok(Some(doc)),
            _ => Err(LoreError::InvalidConfig {
                key: String::new(),
                reason: format!("{} is not a mapping", self.path.display()),
            }),
        }
    }

    /// Like [`all`](Self::all), but a missing document is an error.
    pub fn require_all(&self) -> Result<Mapping> {
        self.all()?
            .ok_or_else(|| LoreError::ConfigAbsent(self.path.clone()))
    }

    /// Read a dotted key such as `reranking.method`.
    pub fn get(&self, key: &str) -> Result<Lookup> {
        let Some(doc) = self.all()? else {
            return Ok(Lookup::NoConfig);
        };
        Ok(match lookup(&doc, key) {
            Some(v) => Lookup::Found(v.clone()),
            None => Lookup::Missing,
        })
    }

    /// Like [`get`](Self::get) but with `${VAR}` placeholders expanded.
    pub fn get_resolved(&self, key: &str) -> Result<Lookup> {
        Ok(match self.get(key)? {
            Lookup::Found(v) => Lookup::Found(resolve_placeholders(v)),
            other => other,
        })
    }

    /// Set a dotted key, creating intermediate levels, and rewrite the file.
    ///
    /// Starts from the default document when none exists yet.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let parts = split_key(key)?;
        let mut doc = match self.all()? {
            Some(doc) => doc,
            None => default_document()?,
        };

        let Some((last, parents)) = parts.split_last() else {
            return Err(invalid_key(key, "empty key"));
        };

        let mut current = &mut doc;
        for part in parents {
            let k = Value::String((*part).to_string());
            if !current.contains_key(&k) {
                current.insert(k.clone(), Value::Mapping(Mapping::new()));
            }
            current = current
                .get_mut(&k)
                .and_then(Value::as_mapping_mut)
                .ok_or_else(|| invalid_key(key, &format!("`{part}` is not a mapping")))?;
        }
        current.insert(Value::String((*last).to_string()), value);

        self.write(&doc)?;
        debug!("Config set: {key}");
        Ok(())
    }

    /// Embedding width from `embedding.dimensions`.
    pub fn embedding_dimensions(&self) -> Result<usize> {
        let dims = read_usize(self, "embedding.dimensions", DEFAULT_DIMENSIONS)?;
        if dims == 0 {
            return Err(invalid_key("embedding.dimensions", "must be positive"));
        }
        Ok(dims)
    }

    fn write(&self, doc: &Mapping) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = serde_yaml::to_string(doc)?;
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ── Retrieval settings ───────────────────────────────────────────────

/// Chunking and context bounds read from `retrieval.*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_context_length: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_context_length: DEFAULT_MAX_CONTEXT_LENGTH,
        }
    }
}

impl RetrievalSettings {
    /// Read from configuration, falling back to defaults for absent keys.
    pub fn from_config(config: &ConfigResolver) -> Result<Self> {
        let settings = Self {
            chunk_size: read_usize(config, "retrieval.chunk_size", DEFAULT_CHUNK_SIZE)?,
            chunk_overlap: read_usize(config, "retrieval.chunk_overlap", DEFAULT_CHUNK_OVERLAP)?,
            max_context_length: read_usize(
                config,
                "retrieval.max_context_length",
                DEFAULT_MAX_CONTEXT_LENGTH,
            )?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid_key("retrieval.chunk_size", "must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(invalid_key(
                "retrieval.chunk_overlap",
                "must be smaller than retrieval.chunk_size",
            ));
        }
        if self.max_context_length == 0 {
            return Err(invalid_key("retrieval.max_context_length", "must be positive"));
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Parse CLI text into a YAML scalar: `1000` becomes an integer, `true` a bool.
/// Anything that is not a scalar is kept as the literal string.
#[must_use]
pub fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// Expand `${VAR}` placeholders in every string inside `value`.
/// Unset variables are left as written.
#[must_use]
pub fn resolve_placeholders(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env(&s)),
        Value::Sequence(items) => {
            Value::Sequence(items.into_iter().map(resolve_placeholders).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, resolve_placeholders(v)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_env(s: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(s, |caps: &Captures<'_>| match std::env::var(&caps[1]) {
            Ok(v) => v,
            Err(_) => {
                warn!("Environment variable {} is not set", &caps[1]);
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn lookup<'a>(doc: &'a Mapping, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_mapping()?.get(part)?;
    }
    Some(current)
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(invalid_key(key, "empty key segment"));
    }
    Ok(parts)
}

fn read_usize(config: &ConfigResolver, key: &str, default: usize) -> Result<usize> {
    match config.get(key)? {
        Lookup::Found(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| invalid_key(key, "expected a non-negative integer")),
        Lookup::NoConfig | Lookup::Missing => Ok(default),
    }
}

fn invalid_key(key: &str, reason: &str) -> LoreError {
    LoreError::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
