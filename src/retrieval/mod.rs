// src/retrieval/mod.rs
//! Hybrid (vector + lexical) candidate retrieval.
//!
//! [`HybridSearchBackend`] is the seam to whatever engine does the fused
//! search; [`HybridRetriever`] embeds the query once and maps the backend's
//! opaque payloads back to quotes in the primary store.

pub mod local;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::models::Candidate;
use crate::store::Store;

pub use local::LocalHybridBackend;

/// Default weights for the two rankings.
pub const DEFAULT_VECTOR_WEIGHT: f32 = 1.0;
pub const DEFAULT_TEXT_WEIGHT: f32 = 0.3;

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Raw vector similarity of this hit to the query.
    pub similarity: f32,
    /// Fused rank score; only meaningful for ordering.
    pub score: f32,
    /// Carries `{"quote_id": <primary store id>}`.
    pub payload: serde_json::Value,
}

impl SearchHit {
    pub fn quote_id(&self) -> Option<i64> {
        self.payload.get("quote_id").and_then(|v| v.as_i64())
    }
}

#[async_trait]
pub trait HybridSearchBackend: Send + Sync {
    async fn hybrid_search(
        &self,
        query_vec: &[f32],
        query_text: &str,
        k: usize,
        vector_weight: f32,
        text_weight: f32,
    ) -> Result<Vec<SearchHit>>;

    /// Loads whatever the backend needs; returns the number of searchable items.
    async fn warm(&self) -> Result<usize> {
        Ok(0)
    }
}

pub struct HybridRetriever {
    backend: Arc<dyn HybridSearchBackend>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
}

impl HybridRetriever {
    pub fn new(
        backend: Arc<dyn HybridSearchBackend>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            backend,
            embedder,
            store,
        }
    }

    pub async fn warm(&self) -> Result<usize> {
        self.backend.warm().await
    }

    /// Candidates in backend order. Hits whose quote is gone from the store
    /// are logged and dropped.
    pub async fn hybrid_search(
        &self,
        text: &str,
        k: usize,
        vector_weight: f32,
        text_weight: f32,
    ) -> Result<Vec<Candidate>> {
        let query_vec = self
            .embedder
            .embed(text)
            .await
            .context("embedding query text")?;

        let hits = self
            .backend
            .hybrid_search(&query_vec, text, k, vector_weight, text_weight)
            .await
            .context("hybrid search")?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(id) = hit.quote_id() else {
                tracing::warn!(payload = %hit.payload, "search hit without quote_id");
                continue;
            };
            match self.store.get_quote(id).await {
                Ok(Some(quote)) => out.push(Candidate {
                    quote,
                    similarity: hit.similarity,
                }),
                Ok(None) => tracing::warn!(quote_id = id, "search hit refers to missing quote"),
                Err(e) => tracing::warn!(error = ?e, quote_id = id, "failed to load quote for hit"),
            }
        }
        Ok(out)
    }
}
