//! Indexing engine: decide, chunk, and write one document.
//!
//! [`IndexingEngine::process`] is the single path by which text enters the
//! content store. For each document it:
//!
//! 1. skips empty text without touching the store;
//! 2. asks the [`ProbeChain`] whether the filename is already stored, and
//!    skips it unless `force_reindex` is set;
//! 3. when forced, deletes the document's existing chunks;
//! 4. chunks the text, fingerprints it, and caps every chunk at
//!    `max_chunk_chars`;
//! 5. inserts the chunks as one batch, degrading to per-chunk inserts (with
//!    one shorter retry each) when the batch is rejected;
//! 6. runs the optional [`EntityExtractor`] in [`IndexMode::Full`].
//!
//! The engine never writes the ledger. Callers mark the ledger after an
//! `Indexed` outcome while still holding the [`DocumentGuard`] they passed in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chunk::{split_text, truncate_chunk};
use crate::config::{ChunkingConfig, Config};
use crate::error::{IndexError, Result};
use crate::hash::fingerprint;
use crate::locks::{DocumentGuard, DocumentLocks};
use crate::models::{
    chunk_id, ChunkMetadata, ChunkRecord, DocumentRecord, ExtractionSummary, IndexMode,
    IndexReport, ProcessOptions, ProcessOutcome, SkipReason,
};
use crate::probe::ProbeChain;
use crate::store::{bounded, ContentStore};

/// Ids requested per round when enumerating a document's chunks for deletion.
const DELETE_PAGE: usize = 500;

/// Downstream enrichment run on the full document text.
///
/// Failures are recorded on the report and never fail the indexing run.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, filename: &str, text: &str) -> anyhow::Result<ExtractionSummary>;
}

pub struct IndexingEngine {
    store: Arc<dyn ContentStore>,
    chunking: ChunkingConfig,
    timeout: Duration,
    probes: ProbeChain,
    locks: DocumentLocks,
    extractor: Option<Arc<dyn EntityExtractor>>,
}

impl IndexingEngine {
    pub fn new(store: Arc<dyn ContentStore>, chunking: ChunkingConfig, timeout: Duration) -> Self {
        Self {
            store,
            chunking,
            timeout,
            probes: ProbeChain::default(),
            locks: DocumentLocks::new(),
            extractor: None,
        }
    }

    pub fn from_config(store: Arc<dyn ContentStore>, config: &Config) -> Self {
        Self::new(store, config.chunking.clone(), config.store.timeout())
    }

    pub fn with_probes(mut self, probes: ProbeChain) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_entity_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exclusive access to `filename` for the check-then-insert sequence.
    pub async fn lock(&self, filename: &str) -> DocumentGuard {
        self.locks.acquire(filename).await
    }

    /// Whether the store holds any chunk for `filename`.
    pub async fn contains(&self, filename: &str) -> Result<bool> {
        self.probes
            .exists(self.store.as_ref(), filename, self.timeout)
            .await
    }

    /// Fingerprint recorded on the stored first chunk of `filename`, if any.
    pub async fn stored_fingerprint(&self, filename: &str) -> Result<Option<String>> {
        let id = chunk_id(filename, 0);
        let chunk = bounded(self.timeout, "get_by_id", self.store.get_by_id(&id)).await?;
        Ok(chunk
            .and_then(|c| c.metadata)
            .map(|m| m.content_hash)
            .filter(|hash| !hash.is_empty()))
    }

    /// Index `doc`. `guard` must be the lock for `doc.filename`.
    pub async fn process(
        &self,
        guard: &DocumentGuard,
        doc: &DocumentRecord,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome> {
        if guard.identity() != doc.filename {
            return Err(IndexError::LockMismatch {
                held: guard.identity().to_string(),
                requested: doc.filename.clone(),
            });
        }

        if doc.raw_text.trim().is_empty() {
            debug!(filename = %doc.filename, "no text extracted");
            return Ok(ProcessOutcome::Skipped(SkipReason::NoTextExtracted));
        }

        let exists = self.contains(&doc.filename).await?;
        if exists && !options.force_reindex {
            info!(filename = %doc.filename, "already in store, skipping");
            return Ok(ProcessOutcome::Skipped(SkipReason::AlreadyInStore));
        }

        let chunks_deleted = if options.force_reindex {
            self.delete_chunks(&doc.filename).await?
        } else {
            0
        };

        let content_hash = fingerprint(&doc.raw_text);
        let pieces = split_text(
            &doc.raw_text,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        let total_chunks = pieces.len();
        let indexed_at = Utc::now().to_rfc3339();

        let mut truncated_chunks = 0;
        let records: Vec<ChunkRecord> = pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| {
                let (text, cut) = truncate_chunk(piece, self.chunking.max_chunk_chars);
                if cut {
                    truncated_chunks += 1;
                }
                ChunkRecord {
                    id: chunk_id(&doc.filename, index),
                    text,
                    metadata: ChunkMetadata {
                        source: doc.filename.clone(),
                        source_path: doc.source_path.clone(),
                        chunk_index: index,
                        total_chunks,
                        content_hash: content_hash.to_string(),
                        indexed_at: indexed_at.clone(),
                    },
                }
            })
            .collect();

        let (chunks_created, dropped_chunk_ids) = self.insert_with_fallback(&records).await;
        if chunks_created == 0 {
            return Err(IndexError::Store(anyhow::anyhow!(
                "no chunk of {} reached the store ({} dropped)",
                doc.filename,
                dropped_chunk_ids.len()
            )));
        }

        let extraction = match (options.mode, &self.extractor) {
            (IndexMode::Full, Some(extractor)) => {
                Some(self.run_extractor(extractor.as_ref(), doc).await)
            }
            _ => None,
        };

        let report = IndexReport {
            filename: doc.filename.clone(),
            fingerprint: content_hash,
            total_chunks,
            chunks_created,
            dropped_chunk_ids,
            truncated_chunks,
            chunks_deleted,
            extraction,
        };

        if report.is_partial() {
            warn!(
                filename = %report.filename,
                created = report.chunks_created,
                dropped = report.dropped_chunk_ids.len(),
                "document partially indexed"
            );
        } else {
            info!(
                filename = %report.filename,
                chunks = report.chunks_created,
                "document indexed"
            );
        }
        Ok(ProcessOutcome::Indexed(report))
    }

    /// Delete every chunk of the document `guard` locks. Returns the
    /// number deleted.
    pub async fn delete_document(&self, guard: &DocumentGuard) -> Result<usize> {
        let filename = guard.identity();
        let deleted = self.delete_chunks(filename).await?;
        info!(filename, deleted, "document deleted from store");
        Ok(deleted)
    }

    async fn delete_chunks(&self, filename: &str) -> Result<usize> {
        let store = self.store.as_ref();
        let mut deleted: HashSet<String> = HashSet::new();

        loop {
            let hits = bounded(
                self.timeout,
                "query_by_source",
                store.query_by_source(filename, DELETE_PAGE),
            )
            .await?;
            if hits.is_empty() {
                break;
            }
            let ids: Vec<String> = hits.into_iter().map(|c| c.id).collect();
            if ids.iter().any(|id| deleted.contains(id)) {
                return Err(IndexError::Store(anyhow::anyhow!(
                    "store still lists deleted chunks of {}",
                    filename
                )));
            }
            let page_len = ids.len();
            bounded(self.timeout, "delete_by_ids", store.delete_by_ids(&ids)).await?;
            deleted.extend(ids);
            if page_len < DELETE_PAGE {
                break;
            }
        }

        // Sweep deterministic ids the metadata filter did not return.
        let mut index = 0;
        loop {
            let id = chunk_id(filename, index);
            if deleted.contains(&id) {
                index += 1;
                continue;
            }
            if bounded(self.timeout, "get_by_id", store.get_by_id(&id))
                .await?
                .is_none()
            {
                break;
            }
            bounded(
                self.timeout,
                "delete_by_ids",
                store.delete_by_ids(std::slice::from_ref(&id)),
            )
            .await?;
            deleted.insert(id);
            index += 1;
        }

        debug!(filename, count = deleted.len(), "chunks deleted");
        Ok(deleted.len())
    }

    /// Insert `records`, degrading to per-chunk inserts on batch failure.
    ///
    /// Returns the number of chunks stored and the ids that were dropped.
    async fn insert_with_fallback(&self, records: &[ChunkRecord]) -> (usize, Vec<String>) {
        let store = self.store.as_ref();
        match bounded(self.timeout, "insert_batch", store.insert_batch(records)).await {
            Ok(()) => return (records.len(), Vec::new()),
            Err(e) => warn!(
                error = %e,
                count = records.len(),
                "batch insert failed, inserting chunks one by one"
            ),
        }

        let mut created = 0;
        let mut dropped = Vec::new();
        for record in records {
            let first = bounded(
                self.timeout,
                "insert_batch",
                store.insert_batch(std::slice::from_ref(record)),
            )
            .await;
            let Err(first_err) = first else {
                created += 1;
                continue;
            };

            let (text, _) = truncate_chunk(&record.text, self.chunking.fallback_chunk_chars);
            let retry = ChunkRecord {
                text,
                ..record.clone()
            };
            match bounded(
                self.timeout,
                "insert_batch",
                store.insert_batch(std::slice::from_ref(&retry)),
            )
            .await
            {
                Ok(()) => {
                    debug!(id = %record.id, error = %first_err, "chunk stored after shortening");
                    created += 1;
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "chunk dropped");
                    dropped.push(record.id.clone());
                }
            }
        }
        (created, dropped)
    }

    async fn run_extractor(
        &self,
        extractor: &dyn EntityExtractor,
        doc: &DocumentRecord,
    ) -> ExtractionSummary {
        match extractor.extract(&doc.filename, &doc.raw_text).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(filename = %doc.filename, error = %e, "entity extraction failed");
                ExtractionSummary {
                    validation_errors: vec![format!("{:#}", e)],
                    ..ExtractionSummary::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn engine() -> IndexingEngine {
        IndexingEngine::new(
            Arc::new(InMemoryStore::new()),
            ChunkingConfig::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn guard_for_other_document_is_refused() {
        let engine = engine();
        let guard = engine.lock("a.txt").await;
        let doc = DocumentRecord::new("b.txt", "/data/b.txt", "text");

        let err = engine
            .process(&guard, &doc, ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::LockMismatch { .. }));
        assert_eq!(engine.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn whitespace_only_text_is_skipped() {
        let engine = engine();
        let guard = engine.lock("blank.txt").await;
        let doc = DocumentRecord::new("blank.txt", "/data/blank.txt", "  \n\t ");

        let outcome = engine
            .process(&guard, &doc, ProcessOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ProcessOutcome::Skipped(SkipReason::NoTextExtracted)
        ));
    }

    #[tokio::test]
    async fn delete_document_removes_every_chunk() {
        let engine = engine();
        let doc = DocumentRecord::new("long.txt", "/data/long.txt", "x".repeat(2000));
        {
            let guard = engine.lock("long.txt").await;
            engine
                .process(&guard, &doc, ProcessOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(engine.store().count().await.unwrap(), 5);

        let guard = engine.lock("long.txt").await;
        assert_eq!(engine.delete_document(&guard).await.unwrap(), 5);
        assert!(!engine.contains("long.txt").await.unwrap());
    }
}
