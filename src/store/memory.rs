//! In-memory [`ContentStore`] for tests and embedding.
//!
//! Chunks live in a `BTreeMap` keyed by id behind `std::sync::RwLock`, so
//! listing order is the id order.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{ChunkMetadata, ChunkRecord, StoredChunk};

use super::{ContentStore, StorePage};

#[derive(Clone)]
struct Entry {
    text: String,
    metadata: ChunkMetadata,
}

pub struct InMemoryStore {
    chunks: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Every stored id, in order.
    pub fn ids(&self) -> Vec<String> {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn to_stored(id: &str, entry: &Entry) -> StoredChunk {
    StoredChunk {
        id: id.to_string(),
        text: Some(entry.text.clone()),
        metadata: Some(entry.metadata.clone()),
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query_by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks
            .iter()
            .filter(|(_, e)| e.metadata.source == source)
            .take(limit)
            .map(|(id, e)| to_stored(id, e))
            .collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks.get(id).map(|e| to_stored(id, e)))
    }

    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if chunks.contains_key(&record.id) || !seen.insert(record.id.as_str()) {
                bail!("duplicate chunk id: {}", record.id);
            }
        }
        for record in records {
            chunks.insert(
                record.id.clone(),
                Entry {
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            chunks.remove(id);
        }
        Ok(())
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut page = StorePage::default();
        for (id, entry) in chunks.iter().skip(offset).take(limit) {
            page.ids.push(id.clone());
            page.metadatas.push(Some(entry.metadata.clone()));
        }
        Ok(page)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}
