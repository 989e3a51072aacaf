//! Vector brain: an HTTP client for a Chroma-compatible vector database.
//!
//! Grounded on `nlp.py`'s `VectorBrain`, which stores chunks in a
//! `nancy_documents` Chroma collection and queries it by text (Chroma
//! embeds server-side via its configured embedding function, so this
//! client never computes embeddings itself). Request plumbing follows
//! `brain_infra::http::HttpClient`'s builder style, reqwest `Client` with a
//! fixed timeout and a small `build_url` helper.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use nancy_core::contracts::{BrainHealth, BrainResult, VectorStore};
use nancy_types::error::{NancyError, Result};
use nancy_types::packet::VectorData;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

const COLLECTION_NAME: &str = "nancy_documents";

pub struct ChromaVectorStore {
    client: Client,
    base_url: String,
    collection_id: RwLock<Option<String>>,
}

impl ChromaVectorStore {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NancyError::Other(format!("failed to build vector brain http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            collection_id: RwLock::new(None),
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn collection_id(&self) -> Result<String> {
        if let Some(id) = self.collection_id.read().expect("lock poisoned").clone() {
            return Ok(id);
        }

        #[derive(Deserialize)]
        struct CollectionResponse {
            id: String,
        }

        let response = self
            .client
            .post(self.build_url("/api/v1/collections"))
            .json(&json!({ "name": COLLECTION_NAME, "get_or_create": true }))
            .send()
            .await
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?
            .error_for_status()
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?;

        let parsed: CollectionResponse = response
            .json()
            .await
            .map_err(|e| NancyError::Other(format!("vector brain: malformed collection response: {e}")))?;

        *self.collection_id.write().expect("lock poisoned") = Some(parsed.id.clone());
        Ok(parsed.id)
    }
}

#[derive(Serialize)]
struct AddRequest<'a> {
    ids: Vec<&'a str>,
    documents: Vec<&'a str>,
    metadatas: Vec<HashMap<String, String>>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_texts: Vec<&'a str>,
    n_results: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    documents: Vec<Vec<String>>,
    distances: Vec<Vec<f64>>,
    metadatas: Vec<Vec<Option<HashMap<String, String>>>>,
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn upsert(&self, document_id: &str, data: &VectorData) -> Result<()> {
        if data.chunks.is_empty() {
            return Ok(());
        }
        self.delete_document(document_id).await?;
        let collection_id = self.collection_id().await?;

        let ids: Vec<&str> = data.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let documents: Vec<&str> = data.chunks.iter().map(|c| c.text.as_str()).collect();
        let metadatas = data
            .chunks
            .iter()
            .map(|c| {
                let mut meta = c.chunk_metadata.clone();
                meta.insert("source".to_string(), document_id.to_string());
                meta
            })
            .collect();

        self.client
            .post(self.build_url(&format!("/api/v1/collections/{collection_id}/add")))
            .json(&AddRequest {
                ids,
                documents,
                metadatas,
            })
            .send()
            .await
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?
            .error_for_status()
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?;

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let collection_id = self.collection_id().await?;
        self.client
            .post(self.build_url(&format!("/api/v1/collections/{collection_id}/delete")))
            .json(&json!({ "where": { "source": document_id } }))
            .send()
            .await
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?;
        Ok(())
    }

    async fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<BrainResult>> {
        let collection_id = self.collection_id().await?;

        let response = self
            .client
            .post(self.build_url(&format!("/api/v1/collections/{collection_id}/query")))
            .json(&QueryRequest {
                query_texts: vec![query_text],
                n_results: top_k,
            })
            .send()
            .await
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?
            .error_for_status()
            .map_err(|e| NancyError::BackendUnavailable {
                brain: format!("vector ({e})"),
            })?;

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| NancyError::Other(format!("vector brain: malformed query response: {e}")))?;

        let mut results = Vec::new();
        let (Some(ids), Some(docs), Some(dists)) = (
            parsed.ids.into_iter().next(),
            parsed.documents.into_iter().next(),
            parsed.distances.into_iter().next(),
        ) else {
            return Ok(results);
        };
        let metadatas = parsed.metadatas.into_iter().next().unwrap_or_default();

        for (i, chunk_id) in ids.into_iter().enumerate() {
            let content = docs.get(i).cloned().unwrap_or_default();
            let distance = dists.get(i).copied().unwrap_or(f64::MAX);
            let metadata = metadatas.get(i).cloned().flatten().unwrap_or_default();
            let document_id = metadata.get("source").cloned().unwrap_or_default();
            results.push(BrainResult {
                source_brain: "vector",
                document_id,
                chunk_id: Some(chunk_id),
                content,
                distance,
                metadata,
            });
        }

        Ok(results)
    }

    async fn health(&self) -> Result<BrainHealth> {
        match self
            .client
            .get(self.build_url("/api/v1/heartbeat"))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                Ok(BrainHealth::ok("chroma heartbeat succeeded"))
            }
            Ok(response) => Ok(BrainHealth::unhealthy(format!(
                "chroma heartbeat returned {}",
                response.status()
            ))),
            Err(e) => Ok(BrainHealth::unhealthy(format!("{e}"))),
        }
    }
}
