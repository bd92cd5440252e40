//! Persistent ledger of indexed file paths.
//!
//! The ledger maps a file path to the modification time the file had when
//! it was last indexed, when that happened, and per-file statistics. It is
//! a cache that lets scans skip files cheaply; the content store stays
//! authoritative for what is actually searchable.
//!
//! The whole mapping is held in memory and every mutation rewrites the
//! backing store before the in-memory view changes. A failed flush leaves
//! the ledger exactly as it was, so the process can never claim a file is
//! indexed without that claim being durable.
//!
//! # On-disk format
//!
//! A single pretty-printed JSON object keyed by path:
//!
//! ```json
//! {
//!   "/data/store/report.pdf": {
//!     "mtime_ns": 1718035200123456789,
//!     "indexed_at": "2024-06-10T16:00:00.456Z",
//!     "stats": { "chunks_created": 9, "content_hash": "e3b0c442..." }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::models::IndexReport;

/// Statistics recorded with a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_created: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities_extracted: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships_extracted: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Synthetic entry created by reconciliation (no real file was seen).
    #[serde(default, skip_serializing_if = "is_false")]
    pub synced: bool,
    /// Real file whose chunks were already in the store when it was scanned.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synced_from_store: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl LedgerStats {
    /// Stats for a file found in the store but missing from the ledger.
    pub fn synced_from_store() -> Self {
        Self {
            synced_from_store: true,
            ..Self::default()
        }
    }

    /// Stats for a synthetic entry created by reconciliation.
    pub fn synced() -> Self {
        Self {
            synced: true,
            ..Self::default()
        }
    }
}

impl From<&IndexReport> for LedgerStats {
    fn from(report: &IndexReport) -> Self {
        Self {
            chunks_created: Some(report.chunks_created),
            total_chunks: Some(report.total_chunks),
            dropped_chunks: Some(report.dropped_chunk_ids.len()),
            entities_extracted: report.extraction.as_ref().map(|e| e.entities),
            relationships_extracted: report.extraction.as_ref().map(|e| e.relationships),
            content_hash: Some(report.fingerprint.to_string()),
            synced: false,
            synced_from_store: false,
        }
    }
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// File modification time (ns since the Unix epoch) when indexed.
    /// Synthetic entries use 0.
    pub mtime_ns: i64,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: LedgerStats,
}

/// The full ledger contents, ordered by path.
pub type LedgerMap = BTreeMap<String, LedgerEntry>;

/// Durable storage for the ledger snapshot.
///
/// `save` must either persist the complete map or fail; partial writes are
/// not allowed.
pub trait LedgerPersistence: Send + Sync {
    fn load(&self) -> Result<LedgerMap, LedgerError>;
    fn save(&self, entries: &LedgerMap) -> Result<(), LedgerError>;
}

/// Ledger persisted as one JSON file, replaced atomically on every save.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerPersistence for JsonFilePersistence {
    fn load(&self) -> Result<LedgerMap, LedgerError> {
        if !self.path.exists() {
            return Ok(LedgerMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        if content.trim().is_empty() {
            return Ok(LedgerMap::new());
        }
        serde_json::from_str(&content).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &LedgerMap) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| LedgerError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.tmp_path();
        let mut file = std::fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&bytes).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Ledger snapshot kept in memory; for tests and embedded use.
#[derive(Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<LedgerMap>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerPersistence for MemoryPersistence {
    fn load(&self) -> Result<LedgerMap, LedgerError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, entries: &LedgerMap) -> Result<(), LedgerError> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = entries.clone();
        Ok(())
    }
}

/// Ledger key for a path.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Modification time of `path` in nanoseconds since the Unix epoch.
pub fn modified_ns(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    DateTime::<Utc>::from(modified)
        .timestamp_nanos_opt()
        .ok_or_else(|| std::io::Error::other("modification time out of range"))
}

/// Thread-safe, write-through ledger.
pub struct Ledger {
    persistence: Box<dyn LedgerPersistence>,
    entries: RwLock<LedgerMap>,
}

impl Ledger {
    /// Load the ledger from `persistence`.
    pub fn open(persistence: Box<dyn LedgerPersistence>) -> Result<Self, LedgerError> {
        let entries = persistence.load()?;
        debug!(entries = entries.len(), "ledger loaded");
        Ok(Self {
            persistence,
            entries: RwLock::new(entries),
        })
    }

    /// Open (or create on first write) a JSON ledger file.
    pub fn open_json(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        Self::open(Box::new(JsonFilePersistence::new(path)))
    }

    /// An empty ledger backed by memory.
    pub fn in_memory() -> Self {
        Self {
            persistence: Box::new(MemoryPersistence::new()),
            entries: RwLock::new(LedgerMap::new()),
        }
    }

    /// Whether `path` is indexed and unchanged since.
    ///
    /// False when there is no entry, when the file's modification time
    /// cannot be read, or when the file was modified after it was indexed.
    pub fn is_indexed(&self, path: &Path) -> bool {
        let stored = {
            let entries = self.read();
            match entries.get(&path_key(path)) {
                Some(entry) => entry.mtime_ns,
                None => return false,
            }
        };
        match modified_ns(path) {
            Ok(current) => current <= stored,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat ledger entry");
                false
            }
        }
    }

    /// Record `path` as indexed with its current modification time.
    ///
    /// Fails if the modification time cannot be read (for example the
    /// file vanished mid-scan) or if the ledger cannot be flushed.
    pub fn mark_indexed(&self, path: &Path, stats: LedgerStats) -> Result<(), LedgerError> {
        let mtime_ns = modified_ns(path).map_err(|source| LedgerError::ModTime {
            path: path.to_path_buf(),
            source,
        })?;
        let key = path_key(path);
        let entry = LedgerEntry {
            mtime_ns,
            indexed_at: Utc::now(),
            stats,
        };
        self.mutate(|entries| {
            entries.insert(key, entry);
            ((), true)
        })
    }

    /// Insert a synthetic entry for `key` unless one exists.
    ///
    /// Synthetic entries carry `mtime_ns = 0`, so a real file at that path
    /// always looks modified and gets re-examined.
    pub fn record_synced(&self, key: &str) -> Result<bool, LedgerError> {
        self.record_synced_many(std::iter::once(key.to_string()))
            .map(|n| n > 0)
    }

    /// Insert synthetic entries for every key that has none. Flushes once.
    pub fn record_synced_many(
        &self,
        keys: impl IntoIterator<Item = String>,
    ) -> Result<usize, LedgerError> {
        let now = Utc::now();
        self.mutate(|entries| {
            let mut added = 0;
            for key in keys {
                if entries.contains_key(&key) {
                    continue;
                }
                entries.insert(
                    key,
                    LedgerEntry {
                        mtime_ns: 0,
                        indexed_at: now,
                        stats: LedgerStats::synced(),
                    },
                );
                added += 1;
            }
            (added, added > 0)
        })
    }

    /// Remove the entry for `path`. Returns whether one existed.
    pub fn remove(&self, path: &str) -> Result<bool, LedgerError> {
        self.mutate(|entries| {
            let removed = entries.remove(path).is_some();
            (removed, removed)
        })
    }

    /// Remove every entry whose basename is `filename`.
    pub fn remove_filename(&self, filename: &str) -> Result<usize, LedgerError> {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|key, _| basename(key) != filename);
            let removed = before - entries.len();
            (removed, removed > 0)
        })
    }

    /// Forget every entry.
    pub fn clear(&self) -> Result<(), LedgerError> {
        self.mutate(|entries| {
            let changed = !entries.is_empty();
            entries.clear();
            ((), changed)
        })?;
        info!("ledger cleared");
        Ok(())
    }

    /// All tracked keys.
    pub fn list_all(&self) -> BTreeSet<String> {
        self.read().keys().cloned().collect()
    }

    /// Basenames of all tracked keys.
    pub fn filenames(&self) -> BTreeSet<String> {
        self.read().keys().map(|k| basename(k).to_string()).collect()
    }

    pub fn get(&self, key: &str) -> Option<LedgerEntry> {
        self.read().get(key).cloned()
    }

    /// A copy of the full mapping.
    pub fn entries(&self) -> LedgerMap {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerMap> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a copy, persist the copy, then publish it.
    ///
    /// `f` returns its result plus whether anything changed; unchanged
    /// maps are not rewritten.
    fn mutate<T>(&self, f: impl FnOnce(&mut LedgerMap) -> (T, bool)) -> Result<T, LedgerError> {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let (out, changed) = f(&mut next);
        if changed {
            self.persistence.save(&next)?;
            *guard = next;
        }
        Ok(out)
    }
}

fn basename(key: &str) -> &str {
    Path::new(key)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(key)
}
