//! Existence probes: "does the content store already hold this document?"
//!
//! Stores differ in how reliably they answer metadata filters, so the check
//! is an ordered [`ProbeChain`] of strategies. The first probe that finds
//! the document wins.
//!
//! | Probe | Query |
//! |-------|-------|
//! | [`MetadataFilterProbe`] | `source == filename`, limit 1 |
//! | [`FirstChunkIdProbe`] | get by id `"<filename>_0"` |
//!
//! A probe error never reads as "absent": when no probe matched and at
//! least one errored, the chain returns the first error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::models::chunk_id;
use crate::store::{bounded, ContentStore};

/// One strategy for detecting a document in the store.
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn exists(&self, store: &dyn ContentStore, filename: &str, timeout: Duration)
        -> Result<bool>;
}

/// Filter on the `source` metadata key.
pub struct MetadataFilterProbe;

#[async_trait]
impl ExistenceProbe for MetadataFilterProbe {
    fn name(&self) -> &'static str {
        "metadata_filter"
    }

    async fn exists(
        &self,
        store: &dyn ContentStore,
        filename: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let hits = bounded(timeout, "query_by_source", store.query_by_source(filename, 1)).await?;
        Ok(!hits.is_empty())
    }
}

/// Look up the deterministic id of the document's first chunk.
pub struct FirstChunkIdProbe;

#[async_trait]
impl ExistenceProbe for FirstChunkIdProbe {
    fn name(&self) -> &'static str {
        "first_chunk_id"
    }

    async fn exists(
        &self,
        store: &dyn ContentStore,
        filename: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let id = chunk_id(filename, 0);
        let hit = bounded(timeout, "get_by_id", store.get_by_id(&id)).await?;
        Ok(hit.is_some())
    }
}

/// Ordered list of probes; first match wins.
#[derive(Clone)]
pub struct ProbeChain {
    probes: Vec<Arc<dyn ExistenceProbe>>,
}

impl Default for ProbeChain {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(MetadataFilterProbe),
            Arc::new(FirstChunkIdProbe),
        ])
    }
}

impl ProbeChain {
    pub fn new(probes: Vec<Arc<dyn ExistenceProbe>>) -> Self {
        Self { probes }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    pub async fn exists(
        &self,
        store: &dyn ContentStore,
        filename: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let mut first_error = None;
        for probe in &self.probes {
            match probe.exists(store, filename, timeout).await {
                Ok(true) => {
                    debug!(filename, probe = probe.name(), "document found in store");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(filename, probe = probe.name(), error = %e, "probe failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }
}
