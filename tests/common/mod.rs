//! Shared fixtures for the integration tests: store wrappers that fail on
//! demand, counting extractors, and a ledger backend that can refuse writes.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use docsync::config::{ChunkingConfig, Config, ScanConfig};
use docsync::engine::{EntityExtractor, IndexingEngine};
use docsync::error::LedgerError;
use docsync::extract::{FileFormatExtractor, TextExtractor};
use docsync::ledger::{LedgerMap, LedgerPersistence};
use docsync::models::{ChunkRecord, ExtractionSummary, StoredChunk};
use docsync::store::{ContentStore, InMemoryStore, StorePage};

// ─── Stores ─────────────────────────────────────────────────────────

/// Wraps an [`InMemoryStore`] and injects failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Reject batches with more records than this.
    pub max_batch: Option<usize>,
    /// Reject any batch holding a record longer than this many chars.
    pub max_text_chars: Option<usize>,
    /// Reject any batch holding one of these ids.
    pub poisoned_ids: HashSet<String>,
    /// Every call fails while set.
    pub down: AtomicBool,
    /// Sleep before every insert.
    pub insert_delay: Option<Duration>,
    pub insert_calls: AtomicUsize,
    pub successful_inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn successful_inserts(&self) -> usize {
        self.successful_inserts.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn query_by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        self.check_up()?;
        self.inner.query_by_source(source, limit).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        self.check_up()?;
        self.inner.get_by_id(id).await
    }

    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_up()?;
        if let Some(max) = self.max_batch {
            if records.len() > max {
                bail!("batch of {} exceeds {}", records.len(), max);
            }
        }
        if let Some(max) = self.max_text_chars {
            if records.iter().any(|r| r.text.chars().count() > max) {
                bail!("record text exceeds {} chars", max);
            }
        }
        if records.iter().any(|r| self.poisoned_ids.contains(&r.id)) {
            bail!("poisoned record");
        }
        self.inner.insert_batch(records).await?;
        self.successful_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        self.check_up()?;
        self.inner.delete_by_ids(ids).await
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage> {
        self.check_up()?;
        self.inner.list_page(limit, offset).await
    }

    async fn count(&self) -> Result<usize> {
        self.check_up()?;
        self.inner.count().await
    }
}

/// A store whose metadata filter never matches and whose listing carries
/// no metadata.
#[derive(Default)]
pub struct MetadataBlindStore {
    pub inner: InMemoryStore,
}

#[async_trait]
impl ContentStore for MetadataBlindStore {
    fn name(&self) -> &str {
        "blind"
    }

    async fn query_by_source(&self, _source: &str, _limit: usize) -> Result<Vec<StoredChunk>> {
        Ok(Vec::new())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        self.inner.get_by_id(id).await
    }

    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        self.inner.insert_batch(records).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        self.inner.delete_by_ids(ids).await
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage> {
        let mut page = self.inner.list_page(limit, offset).await?;
        page.metadatas = vec![None; page.ids.len()];
        Ok(page)
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

// ─── Extractors ─────────────────────────────────────────────────────

/// Entity extractor that counts its calls.
#[derive(Default)]
pub struct CountingEntityExtractor {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingEntityExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityExtractor for CountingEntityExtractor {
    async fn extract(&self, _filename: &str, text: &str) -> Result<ExtractionSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("extraction backend unavailable");
        }
        Ok(ExtractionSummary {
            entities: text.split_whitespace().count(),
            relationships: 1,
            validation_errors: Vec::new(),
        })
    }
}

/// Text extractor that records which files it was asked to read.
#[derive(Default)]
pub struct CountingTextExtractor {
    pub seen: Mutex<Vec<String>>,
}

impl CountingTextExtractor {
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl TextExtractor for CountingTextExtractor {
    fn extract_text(&self, bytes: &[u8], filename: &str) -> String {
        self.seen.lock().unwrap().push(filename.to_string());
        FileFormatExtractor.extract_text(bytes, filename)
    }
}

// ─── Ledger ─────────────────────────────────────────────────────────

/// Memory-backed ledger persistence whose saves fail while `fail` is set.
#[derive(Default)]
pub struct SwitchablePersistence {
    pub fail: Arc<AtomicBool>,
    pub snapshot: Mutex<LedgerMap>,
}

impl LedgerPersistence for SwitchablePersistence {
    fn load(&self) -> Result<LedgerMap, LedgerError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn save(&self, entries: &LedgerMap) -> Result<(), LedgerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Persistence("disk full".to_string()));
        }
        *self.snapshot.lock().unwrap() = entries.clone();
        Ok(())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 500,
        chunk_overlap: 100,
        max_chunk_chars: 1500,
        fallback_chunk_chars: 1000,
    }
}

pub fn engine_over(store: Arc<dyn ContentStore>) -> IndexingEngine {
    IndexingEngine::new(store, chunking(), Duration::from_secs(5))
}

/// A memory-store configuration scanning `root`.
pub fn config_for(root: &Path) -> Config {
    let mut config = Config::minimal();
    config.scan = ScanConfig {
        root: root.to_path_buf(),
        ..ScanConfig::default()
    };
    config.store.provider = "memory".to_string();
    config.store.timeout_secs = 5;
    config
}

/// Push the modification time of `path` forward by `secs`.
pub fn touch_forward(path: &Path, secs: u64) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    let mtime = file.metadata().unwrap().modified().unwrap() + Duration::from_secs(secs);
    file.set_modified(mtime).unwrap();
}
