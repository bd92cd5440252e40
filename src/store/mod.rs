//! Content store abstraction.
//!
//! The [`ContentStore`] trait is the only view the engine has of the vector
//! store. It is the authoritative record of what is searchable; the ledger
//! is reconciled against it.
//!
//! # Backends
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`InMemoryStore`] | [`memory`] | tests and embedding |
//! | [`SqliteStore`] | [`sqlite`] | local single-node deployments |
//! | [`ChromaStore`] | [`chroma`] | a Chroma server over HTTP |
//!
//! Implementations return `anyhow::Result`. The engine wraps every call in
//! [`bounded`], which turns failures into
//! [`IndexError::Store`](crate::error::IndexError::Store) and hung calls
//! into [`IndexError::Timeout`](crate::error::IndexError::Timeout).

pub mod chroma;
pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::Config;
use crate::error::IndexError;
use crate::models::{ChunkMetadata, ChunkRecord, StoredChunk};

pub use chroma::{ChromaStore, OllamaEmbedder};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// One page of a full store listing.
///
/// `ids` and `metadatas` are parallel; a `None` metadata means the store
/// returned the id without (parseable) metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorePage {
    pub ids: Vec<String>,
    pub metadatas: Vec<Option<ChunkMetadata>>,
}

impl StorePage {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Abstract content (vector) store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`query_by_source`](ContentStore::query_by_source) | chunks whose `source` metadata equals a filename |
/// | [`get_by_id`](ContentStore::get_by_id) | one chunk by id |
/// | [`insert_batch`](ContentStore::insert_batch) | insert records; all or nothing |
/// | [`delete_by_ids`](ContentStore::delete_by_ids) | delete records; unknown ids are ignored |
/// | [`list_page`](ContentStore::list_page) | page through every id in a stable order |
/// | [`count`](ContentStore::count) | number of stored chunks |
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn query_by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredChunk>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>>;

    /// Insert every record or none. Fails when an id already exists.
    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()>;

    /// Ids `offset..offset + limit` in the backend's stable order.
    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage>;

    async fn count(&self) -> Result<usize>;
}

/// Run a store call with a time budget.
pub async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> Result<T, IndexError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(IndexError::Store(e)),
        Err(_) => Err(IndexError::Timeout {
            op,
            secs: timeout.as_secs(),
        }),
    }
}

/// Build the store named by `config.store.provider`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn ContentStore>> {
    match config.store.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => Ok(Arc::new(SqliteStore::connect(&config.store.path).await?)),
        "chroma" => {
            let embedder = if config.embedding.is_enabled() {
                Some(OllamaEmbedder::new(&config.embedding)?)
            } else {
                None
            };
            Ok(Arc::new(ChromaStore::connect(&config.store, embedder).await?))
        }
        other => bail!("Unknown store provider: '{}'", other),
    }
}
