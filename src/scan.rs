//! Directory scan: offer every supported file under the root to the engine.
//!
//! Each file is classified with its filename lock held:
//!
//! | Condition | Action | Counted as |
//! |-----------|--------|------------|
//! | ledger entry current | nothing | `skipped_ledger` |
//! | in the store listing, no real ledger entry | mark ledger | `skipped_store` |
//! | in the store listing, file changed, same text | mark ledger | `skipped_store` |
//! | in the store listing, file changed, new text | force re-index, mark | `drifted` |
//! | otherwise | extract, index, mark | `new` (or `no_text`, `skipped_store`) |
//!
//! Per-file store failures count as `failed` and the scan moves on, unless
//! `max_consecutive_failures` of them happen in a row with no other outcome
//! in between. Ledger write
//! failures abort the scan.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::engine::IndexingEngine;
use crate::error::{IndexError, Result};
use crate::extract::{extension_of, TextExtractor};
use crate::hash::fingerprint;
use crate::ledger::{path_key, Ledger, LedgerStats};
use crate::models::{
    file_name_of, DocumentRecord, IndexMode, ProcessOptions, ProcessOutcome, SkipReason,
};
use crate::progress::{ScanProgressEvent, ScanProgressReporter};

/// Excluded in every scan, in addition to `scan.exclude_globs`.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Shared cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aggregate result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Supported files found under the root.
    pub discovered: usize,
    pub new: usize,
    /// Changed files whose text differed from the stored fingerprint.
    pub drifted: usize,
    pub skipped_ledger: usize,
    pub skipped_store: usize,
    pub no_text: usize,
    pub failed: usize,
    /// Files ignored for their extension or an exclude glob.
    pub unsupported: usize,
    /// Files whose basename was already seen at another path in this scan.
    pub collisions: usize,
    /// Chunks dropped across all indexed files.
    pub dropped_chunks: usize,
    pub cancelled: bool,
    /// Stopped by the consecutive-failure limit.
    pub aborted: bool,
}

impl ScanReport {
    pub fn skipped(&self) -> usize {
        self.skipped_ledger + self.skipped_store
    }
}

/// Files found by a walk.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub root: PathBuf,
    /// Supported files, sorted.
    pub files: Vec<PathBuf>,
    pub unsupported: usize,
}

enum FileOutcome {
    SkippedLedger,
    SkippedStore,
    NoText,
    New { dropped: usize },
    Drifted { dropped: usize },
}

impl FileOutcome {
    fn label(&self) -> &'static str {
        match self {
            FileOutcome::SkippedLedger => "skipped_ledger",
            FileOutcome::SkippedStore => "skipped_store",
            FileOutcome::NoText => "no_text",
            FileOutcome::New { .. } => "new",
            FileOutcome::Drifted { .. } => "drifted",
        }
    }
}

pub struct ScanCoordinator {
    engine: Arc<IndexingEngine>,
    ledger: Arc<Ledger>,
    extractor: Arc<dyn TextExtractor>,
    settings: ScanConfig,
    mode: IndexMode,
}

impl ScanCoordinator {
    pub fn new(
        engine: Arc<IndexingEngine>,
        ledger: Arc<Ledger>,
        extractor: Arc<dyn TextExtractor>,
        settings: ScanConfig,
    ) -> Self {
        Self {
            engine,
            ledger,
            extractor,
            settings,
            mode: IndexMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: IndexMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Walk the root on a blocking worker.
    pub async fn discover(&self) -> Result<Discovery> {
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || walk(&settings)).await?
    }

    /// Scan every supported file. `store_sources` is the store listing taken
    /// once before the scan.
    pub async fn scan(
        &self,
        store_sources: &BTreeSet<String>,
        cancel: &CancelFlag,
        progress: &dyn ScanProgressReporter,
    ) -> Result<ScanReport> {
        progress.report(ScanProgressEvent::Discovering {
            root: self.settings.root.display().to_string(),
        });
        let discovery = self.discover().await?;

        let mut report = ScanReport {
            discovered: discovery.files.len(),
            unsupported: discovery.unsupported,
            ..ScanReport::default()
        };
        let total = discovery.files.len() as u64;
        let limit = self.settings.max_consecutive_failures;
        let mut consecutive_failures = 0usize;
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for (i, path) in discovery.files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(processed = i, total, "scan cancelled");
                report.cancelled = true;
                break;
            }

            let filename = file_name_of(path);
            match seen.get(&filename) {
                Some(first) if first != path => {
                    warn!(
                        filename = %filename,
                        first = %first.display(),
                        second = %path.display(),
                        "two files share a filename; only one can be stored"
                    );
                    report.collisions += 1;
                }
                Some(_) => {}
                None => {
                    seen.insert(filename.clone(), path.clone());
                }
            }

            let label = match self.scan_file(path, &filename, store_sources).await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    let label = outcome.label();
                    match outcome {
                        FileOutcome::SkippedLedger => report.skipped_ledger += 1,
                        FileOutcome::SkippedStore => report.skipped_store += 1,
                        FileOutcome::NoText => report.no_text += 1,
                        FileOutcome::New { dropped } => {
                            report.new += 1;
                            report.dropped_chunks += dropped;
                        }
                        FileOutcome::Drifted { dropped } => {
                            report.drifted += 1;
                            report.dropped_chunks += dropped;
                        }
                    }
                    label
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to index file");
                    report.failed += 1;
                    if e.is_store_failure() {
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }
                    "failed"
                }
            };

            progress.report(ScanProgressEvent::File {
                n: i as u64 + 1,
                total,
                filename,
                outcome: label,
            });

            if limit > 0 && consecutive_failures >= limit {
                warn!(
                    consecutive_failures,
                    "content store keeps failing, stopping scan"
                );
                report.aborted = true;
                break;
            }
        }

        progress.report(ScanProgressEvent::Finished {
            new: (report.new + report.drifted) as u64,
            skipped: report.skipped() as u64,
            failed: report.failed as u64,
        });
        info!(
            discovered = report.discovered,
            new = report.new,
            drifted = report.drifted,
            skipped = report.skipped(),
            failed = report.failed,
            "scan finished"
        );
        Ok(report)
    }

    async fn scan_file(
        &self,
        path: &Path,
        filename: &str,
        store_sources: &BTreeSet<String>,
    ) -> Result<FileOutcome> {
        let guard = self.engine.lock(filename).await;

        if self.ledger.is_indexed(path) {
            return Ok(FileOutcome::SkippedLedger);
        }

        let previous = self
            .ledger
            .get(&path_key(path))
            .filter(|entry| !entry.stats.synced);
        let in_store = store_sources.contains(filename);

        if in_store && previous.is_none() {
            debug!(path = %path.display(), "in store but not in ledger");
            self.ledger
                .mark_indexed(path, LedgerStats::synced_from_store())?;
            return Ok(FileOutcome::SkippedStore);
        }

        let text = self.read_and_extract(path, filename).await?;
        let doc = DocumentRecord::from_path(path, text);
        let mut options = ProcessOptions {
            force_reindex: false,
            mode: self.mode,
        };

        if let (true, Some(previous)) = (in_store, previous) {
            let current = fingerprint(&doc.raw_text);
            let stored = self.engine.stored_fingerprint(filename).await?;
            if stored.as_deref() == Some(current.as_str()) {
                debug!(path = %path.display(), "modified but text unchanged");
                self.ledger.mark_indexed(path, previous.stats)?;
                return Ok(FileOutcome::SkippedStore);
            }
            options.force_reindex = true;
        }

        match self.engine.process(&guard, &doc, options).await? {
            ProcessOutcome::Skipped(SkipReason::NoTextExtracted) => Ok(FileOutcome::NoText),
            ProcessOutcome::Skipped(SkipReason::AlreadyInStore) => {
                self.ledger
                    .mark_indexed(path, LedgerStats::synced_from_store())?;
                Ok(FileOutcome::SkippedStore)
            }
            ProcessOutcome::Indexed(report) => {
                self.ledger.mark_indexed(path, LedgerStats::from(&report))?;
                let dropped = report.dropped_chunk_ids.len();
                if options.force_reindex {
                    Ok(FileOutcome::Drifted { dropped })
                } else {
                    Ok(FileOutcome::New { dropped })
                }
            }
        }
    }

    async fn read_and_extract(&self, path: &Path, filename: &str) -> Result<String> {
        read_and_extract(Arc::clone(&self.extractor), path, filename).await
    }
}

/// Read `path` and extract its text on a blocking worker.
pub async fn read_and_extract(
    extractor: Arc<dyn TextExtractor>,
    path: &Path,
    filename: &str,
) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let filename = filename.to_string();
    let text =
        tokio::task::spawn_blocking(move || extractor.extract_text(&bytes, &filename)).await?;
    Ok(text)
}

fn walk(settings: &ScanConfig) -> Result<Discovery> {
    let root = std::fs::canonicalize(&settings.root).map_err(|source| IndexError::Io {
        path: settings.root.clone(),
        source,
    })?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(settings.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;
    let extensions: BTreeSet<String> = settings
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let mut discovery = Discovery {
        root: root.clone(),
        ..Discovery::default()
    };

    let walker = WalkDir::new(&root).follow_links(settings.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        // Apply exclude patterns
        if exclude_set.is_match(rel_str.as_ref()) {
            discovery.unsupported += 1;
            continue;
        }

        let ext = extension_of(&file_name_of(path));
        if !extensions.contains(&ext) {
            discovery.unsupported += 1;
            continue;
        }

        discovery.files.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    discovery.files.sort();
    Ok(discovery)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::Other(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Other(format!("invalid exclude globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(root: &Path) -> ScanConfig {
        ScanConfig {
            root: root.to_path_buf(),
            ..ScanConfig::default()
        }
    }

    #[test]
    fn walk_filters_extensions_and_excludes() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("a.txt"), "a").unwrap();
        std::fs::write(root.join("sub/B.PDF"), "b").unwrap();
        std::fs::write(root.join("image.png"), "x").unwrap();
        std::fs::write(root.join("drafts/c.md"), "c").unwrap();
        std::fs::write(root.join(".git/config.txt"), "x").unwrap();

        let mut cfg = settings(root);
        cfg.exclude_globs = vec!["drafts/**".to_string()];
        let discovery = walk(&cfg).unwrap();

        let names: Vec<String> = discovery.files.iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, vec!["a.txt".to_string(), "B.PDF".to_string()]);
        assert_eq!(discovery.unsupported, 3);
        assert!(discovery.files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = walk(&settings(&tmp.path().join("nope"))).unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = settings(tmp.path());
        cfg.exclude_globs = vec!["a[".to_string()];
        assert!(matches!(walk(&cfg), Err(IndexError::Other(_))));
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
