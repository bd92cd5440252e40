//! Ledger / store reconciliation.
//!
//! The content store is authoritative for what is searchable. Before every
//! scan the reconciler lists the store's document filenames and adds a
//! synthetic ledger entry (keyed by the bare filename, `mtime_ns = 0`,
//! `synced = true`) for every filename the ledger has never seen. That
//! rebuilds a lost or stale ledger without re-extracting anything: the scan
//! then finds the real path in the store set and marks it directly.
//!
//! The reverse direction is only reported. Ledger entries whose filename no
//! store chunk mentions come back as `orphaned` and are logged; the next
//! edit of such a file re-indexes it.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::store::{bounded, ContentStore, StorePage};

/// Every document filename found in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceListing {
    pub sources: BTreeSet<String>,
    pub chunks_seen: usize,
    pub pages: usize,
    /// The page cap was reached before the listing ended.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Synthetic ledger entries added.
    pub repaired: usize,
    /// Distinct filenames in the store.
    pub store_sources: usize,
    /// Ledger keys whose filename the store does not hold.
    pub orphaned: Vec<String>,
    pub truncated: bool,
}

pub struct SyncReconciler {
    page_size: usize,
    max_pages: usize,
    timeout: Duration,
}

impl SyncReconciler {
    pub fn new(page_size: usize, max_pages: usize, timeout: Duration) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.page_size, config.max_pages, config.timeout())
    }

    /// Page through the whole store and collect chunk sources.
    ///
    /// Stops at the first page shorter than `page_size`, or after
    /// `max_pages` pages (then `truncated` is set).
    pub async fn list_sources(&self, store: &dyn ContentStore) -> Result<SourceListing> {
        let mut listing = SourceListing::default();
        let mut offset = 0;
        loop {
            if listing.pages == self.max_pages {
                warn!(
                    pages = listing.pages,
                    chunks = listing.chunks_seen,
                    "store listing hit the page cap"
                );
                listing.truncated = true;
                break;
            }
            let page = bounded(
                self.timeout,
                "list_page",
                store.list_page(self.page_size, offset),
            )
            .await?;
            listing.pages += 1;
            listing.chunks_seen += page.len();
            offset += page.len();
            collect_sources(&page, &mut listing.sources);
            if page.len() < self.page_size {
                break;
            }
        }
        debug!(
            sources = listing.sources.len(),
            chunks = listing.chunks_seen,
            pages = listing.pages,
            "store listed"
        );
        Ok(listing)
    }

    /// List the store, then repair the ledger from the listing.
    pub async fn reconcile(
        &self,
        ledger: &Ledger,
        store: &dyn ContentStore,
    ) -> Result<ReconcileReport> {
        let listing = self.list_sources(store).await?;
        self.reconcile_listing(ledger, &listing)
    }

    /// Repair the ledger from an existing listing.
    pub fn reconcile_listing(
        &self,
        ledger: &Ledger,
        listing: &SourceListing,
    ) -> Result<ReconcileReport> {
        let known = ledger.filenames();
        let missing: Vec<String> = listing.sources.difference(&known).cloned().collect();
        let repaired = ledger.record_synced_many(missing)?;
        if repaired > 0 {
            info!(repaired, "ledger entries added from store");
        }

        let orphaned: Vec<String> = if listing.truncated {
            Vec::new()
        } else {
            ledger
                .list_all()
                .into_iter()
                .filter(|key| !listing.sources.contains(basename(key)))
                .collect()
        };
        if !orphaned.is_empty() {
            warn!(
                count = orphaned.len(),
                "ledger entries have no chunks in the store; they will be re-indexed when modified"
            );
        }

        Ok(ReconcileReport {
            repaired,
            store_sources: listing.sources.len(),
            orphaned,
            truncated: listing.truncated,
        })
    }
}

/// Add each chunk's source to `out`. A chunk without metadata contributes
/// the filename encoded in its `<filename>_<index>` id.
fn collect_sources(page: &StorePage, out: &mut BTreeSet<String>) {
    for (i, id) in page.ids.iter().enumerate() {
        match page.metadatas.get(i).and_then(Option::as_ref) {
            Some(meta) if !meta.source.is_empty() => {
                out.insert(meta.source.clone());
            }
            _ => {
                if let Some(source) = source_from_id(id) {
                    out.insert(source.to_string());
                }
            }
        }
    }
}

fn source_from_id(id: &str) -> Option<&str> {
    let (source, index) = id.rsplit_once('_')?;
    if source.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(source)
}

fn basename(key: &str) -> &str {
    Path::new(key)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn meta(source: &str) -> Option<ChunkMetadata> {
        Some(ChunkMetadata {
            source: source.to_string(),
            source_path: String::new(),
            chunk_index: 0,
            total_chunks: 1,
            content_hash: String::new(),
            indexed_at: String::new(),
        })
    }

    #[test]
    fn sources_from_metadata_or_id() {
        let page = StorePage {
            ids: vec![
                "a.pdf_0".to_string(),
                "my_notes.txt_12".to_string(),
                "weird-id".to_string(),
            ],
            metadatas: vec![meta("a.pdf"), None, None],
        };
        let mut out = BTreeSet::new();
        collect_sources(&page, &mut out);
        let out: Vec<_> = out.into_iter().collect();
        assert_eq!(out, vec!["a.pdf".to_string(), "my_notes.txt".to_string()]);
    }

    #[test]
    fn id_parsing() {
        assert_eq!(source_from_id("report.pdf_8"), Some("report.pdf"));
        assert_eq!(source_from_id("a_b_c.md_0"), Some("a_b_c.md"));
        assert_eq!(source_from_id("report.pdf_x"), None);
        assert_eq!(source_from_id("_3"), None);
    }

    #[test]
    fn listing_repairs_missing_and_reports_orphans() {
        let ledger = Ledger::in_memory();
        ledger
            .record_synced_many(vec!["/data/kept.md".to_string(), "/data/gone.md".to_string()])
            .unwrap();
        let listing = SourceListing {
            sources: ["kept.md", "new.pdf"].iter().map(|s| s.to_string()).collect(),
            chunks_seen: 2,
            pages: 1,
            truncated: false,
        };

        let reconciler = SyncReconciler::new(100, 10, Duration::from_secs(1));
        let report = reconciler.reconcile_listing(&ledger, &listing).unwrap();
        assert_eq!(report.repaired, 1);
        assert_eq!(report.orphaned, vec!["/data/gone.md".to_string()]);
        let synced = ledger.get("new.pdf").unwrap();
        assert_eq!(synced.mtime_ns, 0);
        assert!(synced.stats.synced);

        let again = reconciler.reconcile_listing(&ledger, &listing).unwrap();
        assert_eq!(again.repaired, 0);
    }

    #[test]
    fn truncated_listing_reports_no_orphans() {
        let ledger = Ledger::in_memory();
        ledger.record_synced("/data/maybe.md").unwrap();
        let listing = SourceListing {
            truncated: true,
            ..SourceListing::default()
        };
        let report = SyncReconciler::new(10, 1, Duration::from_secs(1))
            .reconcile_listing(&ledger, &listing)
            .unwrap();
        assert!(report.orphaned.is_empty());
        assert!(report.truncated);
    }
}
