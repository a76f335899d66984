// src/embedding.rs
//! Embedding capability plus the vector helpers shared by the index, the
//! local hybrid backend and the SQLite store.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn model_name(&self) -> &str;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("dostobot/0.1")
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building embedding http client")
}

// ---------------- Ollama ----------------

/// Local Ollama server, `POST {host}/api/embeddings`.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(host: &str, model: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(Duration::from_secs(60))?,
            host: host.trim_end_matches('/').to_string(),
            model: if model.is_empty() {
                "nomic-embed-text".to_string()
            } else {
                model.to_string()
            },
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            prompt: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            embedding: Vec<f64>,
        }

        let url = format!("{}/api/embeddings", self.host);
        let resp = self
            .http
            .post(&url)
            .json(&Req {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .with_context(|| format!("sending ollama embedding request to {url}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("ollama error (status {status}): {body}");
        }

        let parsed: Resp = resp.json().await.context("decoding ollama response")?;
        if parsed.embedding.is_empty() {
            bail!("empty embedding returned");
        }
        Ok(parsed.embedding.into_iter().map(|v| v as f32).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------- OpenAI ----------------

/// OpenAI embeddings API (`POST /v1/embeddings`).
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        if api_key.is_empty() {
            bail!("OPENAI_API_KEY not set");
        }
        Ok(Self {
            http: http_client(Duration::from_secs(30))?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://api.openai.com".to_string(),
        })
    }

    /// Point at a compatible endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let resp = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("sending openai embedding request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("openai embeddings error {status}: {body}");
        }
        let json: serde_json::Value = resp.json().await.context("decoding openai response")?;
        parse_openai_embedding(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_openai_embedding(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("invalid openai response: missing data[0].embedding"))?;
    if embedding.is_empty() {
        bail!("empty embedding returned");
    }
    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ---------------- vector helpers ----------------

/// Cosine similarity in `[-1, 1]`, accumulated in f64.
///
/// Mismatched lengths, empty input or a zero-norm vector give `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Scales to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|&x| (f64::from(x) / norm) as f32).collect()
}

/// Little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
