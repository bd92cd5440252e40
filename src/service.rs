//! Application entry points.
//!
//! [`IndexService`] wires the engine, ledger, reconciler, scanner, and text
//! extractor together and exposes the operations the CLI runs: startup
//! scan, full re-index, single-file upload, delete, status queries, and
//! store reset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::IndexingEngine;
use crate::error::{IndexError, Result};
use crate::extract::{FileFormatExtractor, TextExtractor};
use crate::ledger::{Ledger, LedgerMap, LedgerStats};
use crate::models::{
    file_name_of, DocumentRecord, IndexMode, ProcessOptions, ProcessOutcome,
};
use crate::progress::ScanProgressReporter;
use crate::reconcile::{ReconcileReport, SyncReconciler};
use crate::scan::{read_and_extract, CancelFlag, ScanCoordinator, ScanReport};
use crate::store::{bounded, open_store, ContentStore};

/// Result of [`IndexService::startup_scan`].
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub reconcile: ReconcileReport,
    pub scan: ScanReport,
}

/// Result of [`IndexService::index_path`].
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub path: PathBuf,
    pub filename: String,
    pub outcome: ProcessOutcome,
}

/// Result of [`IndexService::delete_document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub chunks_deleted: usize,
    pub ledger_entries_removed: usize,
    pub file_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedStatus {
    pub filename: String,
    pub in_store: bool,
    pub in_ledger: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Distinct filenames, sorted.
    pub documents: Vec<String>,
    pub total_chunks: usize,
    pub truncated: bool,
}

/// Result of [`IndexService::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub chunks_deleted: usize,
    pub ledger_entries_cleared: usize,
}

pub struct IndexService {
    engine: Arc<IndexingEngine>,
    ledger: Arc<Ledger>,
    extractor: Arc<dyn TextExtractor>,
    reconciler: SyncReconciler,
    scanner: ScanCoordinator,
    mode: IndexMode,
    root: PathBuf,
    page_size: usize,
    max_pages: usize,
}

impl IndexService {
    pub fn new(
        engine: Arc<IndexingEngine>,
        ledger: Arc<Ledger>,
        extractor: Arc<dyn TextExtractor>,
        config: &Config,
    ) -> Self {
        let scanner = ScanCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&ledger),
            Arc::clone(&extractor),
            config.scan.clone(),
        )
        .with_mode(config.indexing.mode);

        Self {
            engine,
            ledger,
            extractor,
            reconciler: SyncReconciler::from_config(&config.store),
            scanner,
            mode: config.indexing.mode,
            root: config.scan.root.clone(),
            page_size: config.store.page_size.max(1),
            max_pages: config.store.max_pages.max(1),
        }
    }

    /// Open the configured store and ledger with the default extractor.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let store = open_store(config).await?;
        let ledger = Ledger::open_json(&config.ledger.path).with_context(|| {
            format!("Failed to open ledger: {}", config.ledger.path.display())
        })?;
        let engine = IndexingEngine::from_config(store, config);
        Ok(Self::new(
            Arc::new(engine),
            Arc::new(ledger),
            Arc::new(FileFormatExtractor),
            config,
        ))
    }

    pub fn engine(&self) -> &IndexingEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn store(&self) -> &dyn ContentStore {
        self.engine.store().as_ref()
    }

    /// List the store once, reconcile the ledger from it, then scan.
    pub async fn startup_scan(
        &self,
        cancel: &CancelFlag,
        progress: &dyn ScanProgressReporter,
    ) -> Result<StartupReport> {
        let listing = self.reconciler.list_sources(self.store()).await?;
        let reconcile = self.reconciler.reconcile_listing(&self.ledger, &listing)?;
        let scan = self.scanner.scan(&listing.sources, cancel, progress).await?;
        Ok(StartupReport { reconcile, scan })
    }

    /// Forget the ledger and run a startup scan.
    pub async fn reindex_all(
        &self,
        cancel: &CancelFlag,
        progress: &dyn ScanProgressReporter,
    ) -> Result<StartupReport> {
        self.ledger.clear()?;
        self.startup_scan(cancel, progress).await
    }

    /// List the store and repair the ledger without scanning.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.reconcile(&self.ledger, self.store()).await
    }

    /// Index one file (the upload path).
    pub async fn index_path(&self, path: &Path, force: bool) -> Result<UploadOutcome> {
        let path = std::fs::canonicalize(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = file_name_of(&path);
        let text = read_and_extract(Arc::clone(&self.extractor), &path, &filename).await?;
        let doc = DocumentRecord::from_path(&path, text);
        let options = ProcessOptions {
            force_reindex: force,
            mode: self.mode,
        };

        let guard = self.engine.lock(&filename).await;
        let outcome = self.engine.process(&guard, &doc, options).await?;
        match &outcome {
            ProcessOutcome::Indexed(report) => {
                self.ledger.mark_indexed(&path, LedgerStats::from(report))?;
            }
            // Skips never touch the ledger.
            ProcessOutcome::Skipped(_) => {}
        }
        drop(guard);

        Ok(UploadOutcome {
            path,
            filename,
            outcome,
        })
    }

    /// Remove `filename` from the store and the ledger, and optionally
    /// delete `<scan root>/<filename>`.
    pub async fn delete_document(&self, filename: &str, delete_file: bool) -> Result<DeleteReport> {
        if Path::new(filename).file_name().and_then(|n| n.to_str()) != Some(filename) {
            return Err(IndexError::Other(format!(
                "not a plain filename: '{}'",
                filename
            )));
        }

        let guard = self.engine.lock(filename).await;
        let chunks_deleted = self.engine.delete_document(&guard).await?;
        let ledger_entries_removed = self.ledger.remove_filename(filename)?;

        let mut file_deleted = false;
        if delete_file {
            let path = self.root.join(filename);
            match std::fs::remove_file(&path) {
                Ok(()) => file_deleted = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "file to delete does not exist");
                }
                Err(source) => return Err(IndexError::Io { path, source }),
            }
        }
        drop(guard);

        Ok(DeleteReport {
            chunks_deleted,
            ledger_entries_removed,
            file_deleted,
        })
    }

    pub async fn check_indexed(&self, filename: &str) -> Result<IndexedStatus> {
        let in_store = self.engine.contains(filename).await?;
        let in_ledger = self.ledger.is_indexed(&self.root.join(filename));
        Ok(IndexedStatus {
            filename: filename.to_string(),
            in_store,
            in_ledger,
        })
    }

    pub async fn store_status(&self) -> Result<StoreStatus> {
        let listing = self.reconciler.list_sources(self.store()).await?;
        let total_chunks = bounded(self.engine.timeout(), "count", self.store().count()).await?;
        Ok(StoreStatus {
            documents: listing.sources.into_iter().collect(),
            total_chunks,
            truncated: listing.truncated,
        })
    }

    pub fn ledger_entries(&self) -> LedgerMap {
        self.ledger.entries()
    }

    /// Delete every chunk in the store and clear the ledger.
    pub async fn reset(&self) -> Result<ResetReport> {
        let timeout = self.engine.timeout();
        let mut chunks_deleted = 0;
        for _ in 0..self.max_pages {
            let page = bounded(timeout, "list_page", self.store().list_page(self.page_size, 0)).await?;
            if page.is_empty() {
                break;
            }
            bounded(timeout, "delete_by_ids", self.store().delete_by_ids(&page.ids)).await?;
            chunks_deleted += page.len();
        }

        let ledger_entries_cleared = self.ledger.len();
        self.ledger.clear()?;
        info!(chunks_deleted, ledger_entries_cleared, "store reset");
        Ok(ResetReport {
            chunks_deleted,
            ledger_entries_cleared,
        })
    }
}
