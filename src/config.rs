//! TOML configuration.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration equal to [`Config::minimal`].
//!
//! ```toml
//! [ledger]
//! path = "./data/indexed_files.json"
//!
//! [chunking]
//! chunk_size = 500
//! chunk_overlap = 100
//!
//! [store]
//! provider = "sqlite"
//! path = "./data/docsync.sqlite"
//!
//! [scan]
//! root = "./data/store"
//! exclude_globs = ["**/.git/**"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::SUPPORTED_EXTENSIONS;
use crate::models::IndexMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

impl Config {
    /// The built-in defaults.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.chunking.max_chunk_chars == 0 {
            bail!("chunking.max_chunk_chars must be > 0");
        }
        if self.chunking.fallback_chunk_chars == 0
            || self.chunking.fallback_chunk_chars > self.chunking.max_chunk_chars
        {
            bail!("chunking.fallback_chunk_chars must be in 1..=chunking.max_chunk_chars");
        }

        // Validate store
        match self.store.provider.as_str() {
            "sqlite" | "chroma" | "memory" => {}
            other => bail!(
                "Unknown store provider: '{}'. Must be sqlite, chroma, or memory.",
                other
            ),
        }
        if self.store.timeout_secs == 0 {
            bail!("store.timeout_secs must be > 0");
        }
        if self.store.page_size == 0 {
            bail!("store.page_size must be > 0");
        }
        if self.store.max_pages == 0 {
            bail!("store.max_pages must be > 0");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "none" => {}
            "ollama" => {
                if self.embedding.model.is_none() {
                    bail!("embedding.model must be specified when provider is 'ollama'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be none or ollama.",
                other
            ),
        }

        if self.scan.extensions.is_empty() {
            bail!("scan.extensions must not be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("./data/indexed_files.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Hard cap on characters per stored chunk.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Cap used when retrying a chunk the store rejected.
    #[serde(default = "default_fallback_chunk_chars")]
    pub fallback_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunk_chars: default_max_chunk_chars(),
            fallback_chunk_chars: default_fallback_chunk_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_max_chunk_chars() -> usize {
    1500
}
fn default_fallback_chunk_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite`, `chroma`, or `memory`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Chroma server URL.
    #[serde(default = "default_store_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Budget for every individual store call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ids per page when listing the store.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            path: default_store_path(),
            endpoint: default_store_endpoint(),
            collection: default_collection(),
            tenant: default_tenant(),
            database: default_database(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_store_provider() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/docsync.sqlite")
}
fn default_store_endpoint() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_tenant() -> String {
    "default_tenant".to_string()
}
fn default_database() -> String {
    "default_database".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    1000
}
fn default_max_pages() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `none` or `ollama`. Only the Chroma store uses embeddings.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            host: default_ollama_host(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "none"
    }
}

fn default_embedding_provider() -> String {
    "none".to_string()
}
fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Directory scanned for documents; also where `delete --delete-file`
    /// removes files from.
    #[serde(default = "default_scan_root")]
    pub root: PathBuf,
    /// Lowercase extensions without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Consecutive store failures after which a scan stops. 0 disables.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: default_scan_root(),
            extensions: default_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

fn default_scan_root() -> PathBuf {
    PathBuf::from("./data/store")
}
fn default_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
fn default_max_consecutive_failures() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexingConfig {
    /// `full` only adds work when the engine has an entity extractor.
    #[serde(default)]
    pub mode: IndexMode,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
