//! Embedding-based ranking. Vectors come from an external model through [`Embedder`]
//! ([`HttpEmbedder`] for an Ollama-style service); the index stores them and ranks by cosine
//! similarity.

use crate::corpus::IdRepr;
use crate::error::{FuseError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::{DocumentId, RankedList};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Text (or rendered-page) embedding capability. Constructed once by the process entry point
/// and passed to every source that needs it.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Deserialize)]
struct StoredVector {
    id: IdRepr,
    vector: Vec<f32>,
}

/// Vectors of one fixed dimension, set by the first insert.
#[derive(Debug, Default, Clone)]
pub struct DenseIndex {
    ids: Vec<DocumentId>,
    vectors: Vec<Vec<f32>>,
    dim: Option<usize>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() { return 0.0; }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 { return 0.0; }
    dot / (na.sqrt() * nb.sqrt())
}

impl DenseIndex {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, id: impl Into<DocumentId>, vector: Vec<f32>) -> Result<()> {
        let id = id.into();
        match self.dim {
            Some(dim) if dim != vector.len() => {
                return Err(FuseError::Config(format!("vector for {id} has dimension {}, index has {dim}", vector.len())));
            }
            Some(_) => {}
            None => self.dim = Some(vector.len()),
        }
        self.ids.push(id);
        self.vectors.push(vector);
        Ok(())
    }

    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn dimension(&self) -> Option<usize> { self.dim }

    /// Load `[{"id": ..., "vector": [...]}]`. All vectors must share one dimension.
    pub fn load(path: &Path) -> Result<Self> {
        let stored: Vec<StoredVector> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let mut index = Self::new();
        for s in stored {
            index
                .insert(s.id, s.vector)
                .map_err(|e| FuseError::Config(format!("{}: {e}", path.display())))?;
        }
        tracing::info!(path = %path.display(), num_docs = index.len(), dim = ?index.dim, "loaded dense vectors");
        Ok(index)
    }

    /// Documents by descending cosine similarity; ties keep insertion order. A query whose
    /// dimension differs from the index is a [`FuseError::Config`] error.
    pub fn rank(&self, query: &[f32], top_n: usize) -> Result<RankedList> {
        if let Some(dim) = self.dim {
            if query.len() != dim {
                return Err(FuseError::Config(format!("query vector has dimension {}, index has {dim}", query.len())));
            }
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored.into_iter().take(top_n).map(|(i, _)| self.ids[i].clone()).collect())
    }
}

pub const DEFAULT_EMBED_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Ollama-style `/api/embeddings` client. Each call goes through the retry policy.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            policy: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoint(&self) -> String { format!("{}/api/embeddings", self.base_url) }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(self.endpoint())
            .json(&EmbeddingRequest { model: &self.model, prompt: text })
            .send()
            .await
            .map_err(|e| FuseError::external("embedding", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FuseError::external("embedding", format!("{status}: {body}")));
        }
        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| FuseError::external("embedding", e))?;
        if parsed.embedding.is_empty() {
            return Err(FuseError::external("embedding", format!("model {} returned an empty vector", self.model)));
        }
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str { &self.model }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry("embedding", &self.policy, || self.request(text)).await
    }
}
