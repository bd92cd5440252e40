//! Core data models used throughout docsync.
//!
//! These types represent the documents, chunks, and outcomes that flow
//! through the indexing pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash::Fingerprint;

/// One indexing attempt for a document. Lives only for the duration of
/// a `process` call.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Basename; the document's identity in the content store.
    pub filename: String,
    /// Full path the text came from (provenance only).
    pub source_path: String,
    pub raw_text: String,
}

impl DocumentRecord {
    pub fn new(
        filename: impl Into<String>,
        source_path: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            source_path: source_path.into(),
            raw_text: raw_text.into(),
        }
    }

    /// Build a record for a file on disk, using its basename as filename.
    pub fn from_path(path: &Path, raw_text: String) -> Self {
        Self {
            filename: file_name_of(path),
            source_path: path.to_string_lossy().to_string(),
            raw_text,
        }
    }
}

/// Basename of `path` as a string (empty when the path has none).
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Deterministic chunk id: `<filename>_<index>`.
pub fn chunk_id(filename: &str, index: usize) -> String {
    format!("{}_{}", filename, index)
}

/// Metadata persisted alongside every chunk in the content store.
///
/// Field names are the store's metadata keys; `source` is the key the
/// existence check filters on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Filename of the document this chunk was cut from.
    pub source: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub total_chunks: usize,
    /// Fingerprint of the whole document.
    #[serde(default)]
    pub content_hash: String,
    /// RFC 3339 timestamp of the indexing run.
    #[serde(default)]
    pub indexed_at: String,
}

/// A chunk ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk as returned by a content store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub text: Option<String>,
    /// `None` when the store holds no (or unparseable) metadata for the id.
    pub metadata: Option<ChunkMetadata>,
}

/// Whether downstream enrichment (entity extraction) runs during indexing.
///
/// Threaded explicitly through [`ProcessOptions`] instead of living in a
/// process-wide toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Vector chunks only.
    #[default]
    Fast,
    /// Vector chunks plus entity extraction, when an extractor is attached.
    Full,
}

/// Per-call options for [`IndexingEngine::process`](crate::engine::IndexingEngine::process).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Delete the document's existing chunks and index it again.
    pub force_reindex: bool,
    pub mode: IndexMode,
}

/// Why a document was not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The content store already holds chunks for this filename.
    AlreadyInStore,
    /// The extracted text was empty after trimming.
    NoTextExtracted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyInStore => "already_in_store",
            SkipReason::NoTextExtracted => "no_text_extracted",
        }
    }
}

/// Summary returned by an [`EntityExtractor`](crate::engine::EntityExtractor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub entities: usize,
    pub relationships: usize,
    pub validation_errors: Vec<String>,
}

/// Result of indexing one document.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub filename: String,
    pub fingerprint: Fingerprint,
    /// Number of chunks the document was cut into.
    pub total_chunks: usize,
    /// Number of chunks that reached the store.
    pub chunks_created: usize,
    /// Ids that failed both the batch and the per-chunk retry.
    pub dropped_chunk_ids: Vec<String>,
    /// Chunks cut at the character cap.
    pub truncated_chunks: usize,
    /// Chunks removed first because of `force_reindex`.
    pub chunks_deleted: usize,
    /// Present when entity extraction ran.
    pub extraction: Option<ExtractionSummary>,
}

impl IndexReport {
    /// True when some chunks were dropped.
    pub fn is_partial(&self) -> bool {
        !self.dropped_chunk_ids.is_empty()
    }
}

/// Outcome of [`IndexingEngine::process`](crate::engine::IndexingEngine::process).
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Indexed(IndexReport),
    Skipped(SkipReason),
}

impl ProcessOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped(_))
    }

    pub fn report(&self) -> Option<&IndexReport> {
        match self {
            ProcessOutcome::Indexed(report) => Some(report),
            ProcessOutcome::Skipped(_) => None,
        }
    }
}
