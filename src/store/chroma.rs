//! Chroma [`ContentStore`] over the HTTP v2 API.
//!
//! The collection is created with `get_or_create` on connect. Chunk
//! metadata is stored as Chroma metadata, so `query_by_source` is a
//! `where: {"source": ...}` get.
//!
//! Embeddings come from an optional [`OllamaEmbedder`]. Without one the
//! chunks are stored with a one-dimensional placeholder vector, which keeps
//! the collection usable as a document store without an embedding model.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EmbeddingConfig, StoreConfig};
use crate::models::{ChunkMetadata, ChunkRecord, StoredChunk};

use super::{ContentStore, StorePage};

/// Computes embeddings with a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: Client,
    host: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.host))
            .json(&body)
            .send()
            .await
            .with_context(|| {
                format!("Ollama connection error (is Ollama running at {}?)", self.host)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("Invalid Ollama response")?;
        if parsed.embeddings.len() != texts.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        Ok(parsed.embeddings)
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct AddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
}

#[derive(Serialize, Default)]
struct GetRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#where: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    include: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<serde_json::Value>>>,
}

impl GetResponse {
    /// Zip ids with their documents and metadata. Metadata that does not
    /// parse as [`ChunkMetadata`] becomes `None`.
    fn into_chunks(self) -> Vec<StoredChunk> {
        let mut documents = self.documents.unwrap_or_default().into_iter();
        let mut metadatas = self.metadatas.unwrap_or_default().into_iter();
        self.ids
            .into_iter()
            .map(|id| {
                let text = documents.next().flatten();
                let metadata = metadatas
                    .next()
                    .flatten()
                    .and_then(|m| serde_json::from_value(m).ok());
                StoredChunk { id, text, metadata }
            })
            .collect()
    }
}

pub struct ChromaStore {
    client: Client,
    collection_url: String,
    embedder: Option<OllamaEmbedder>,
}

impl ChromaStore {
    /// Connect and get-or-create the configured collection.
    pub async fn connect(config: &StoreConfig, embedder: Option<OllamaEmbedder>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = config.endpoint.trim_end_matches('/');
        let collections_url = format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            endpoint, config.tenant, config.database
        );

        let response = client
            .post(&collections_url)
            .json(&CreateCollectionRequest {
                name: &config.collection,
                get_or_create: true,
            })
            .send()
            .await
            .with_context(|| format!("Failed to connect to Chroma at {}", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to create collection: {} - {}", status, body);
        }

        let collection: CollectionResponse = response
            .json()
            .await
            .context("Failed to parse collection response")?;
        debug!(collection = %config.collection, id = %collection.id, "chroma collection ready");

        Ok(Self {
            client,
            collection_url: format!("{}/{}", collections_url, collection.id),
            embedder,
        })
    }

    fn op_url(&self, op: &str) -> String {
        format!("{}/{}", self.collection_url, op)
    }

    async fn post<T: Serialize + ?Sized>(&self, op: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.op_url(op))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Chroma {} request failed", op))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Chroma {} failed: {} - {}", op, status, body);
        }
        Ok(response)
    }

    async fn get(&self, request: &GetRequest) -> Result<GetResponse> {
        self.post("get", request)
            .await?
            .json()
            .await
            .context("Failed to parse Chroma get response")
    }
}

#[async_trait]
impl ContentStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn query_by_source(&self, source: &str, limit: usize) -> Result<Vec<StoredChunk>> {
        let request = GetRequest {
            r#where: Some(serde_json::json!({ "source": source })),
            limit: Some(limit),
            include: vec!["metadatas"],
            ..GetRequest::default()
        };
        Ok(self.get(&request).await?.into_chunks())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChunk>> {
        let request = GetRequest {
            ids: Some(vec![id.to_string()]),
            include: vec!["documents", "metadatas"],
            ..GetRequest::default()
        };
        Ok(self.get(&request).await?.into_chunks().into_iter().next())
    }

    async fn insert_batch(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // `add` silently ignores existing ids, so duplicates are rejected here.
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let existing = self
            .get(&GetRequest {
                ids: Some(ids.clone()),
                include: Vec::new(),
                ..GetRequest::default()
            })
            .await?;
        if let Some(id) = existing.ids.first() {
            bail!("duplicate chunk id: {}", id);
        }

        let documents: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = match &self.embedder {
            Some(embedder) => embedder.embed(&documents).await?,
            None => vec![vec![0.0]; records.len()],
        };

        let request = AddRequest {
            ids,
            embeddings,
            documents,
            metadatas: records.iter().map(|r| r.metadata.clone()).collect(),
        };
        self.post("add", &request).await?;
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post("delete", &serde_json::json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn list_page(&self, limit: usize, offset: usize) -> Result<StorePage> {
        let request = GetRequest {
            limit: Some(limit),
            offset: Some(offset),
            include: vec!["metadatas"],
            ..GetRequest::default()
        };
        let chunks = self.get(&request).await?.into_chunks();

        let mut page = StorePage::default();
        for chunk in chunks {
            page.ids.push(chunk.id);
            page.metadatas.push(chunk.metadata);
        }
        Ok(page)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .get(self.op_url("count"))
            .send()
            .await
            .context("Chroma count request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Chroma count failed: {} - {}", status, body);
        }
        response
            .json::<usize>()
            .await
            .context("Failed to parse Chroma count")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_response_tolerates_missing_and_foreign_metadata() {
        let response: GetResponse = serde_json::from_value(serde_json::json!({
            "ids": ["a.pdf_0", "b.pdf_0", "c.pdf_0"],
            "metadatas": [
                {"source": "a.pdf", "chunk_index": 0},
                null,
                {"unrelated": 1}
            ]
        }))
        .unwrap();

        let chunks = response.into_chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.as_ref().unwrap().source, "a.pdf");
        assert!(chunks[0].text.is_none());
        assert!(chunks[1].metadata.is_none());
        assert!(chunks[2].metadata.is_none());
    }

    #[test]
    fn get_request_omits_unset_fields() {
        let request = GetRequest {
            r#where: Some(serde_json::json!({"source": "a.pdf"})),
            limit: Some(1),
            include: vec!["metadatas"],
            ..GetRequest::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "where": {"source": "a.pdf"},
                "limit": 1,
                "include": ["metadatas"]
            })
        );
    }
}
