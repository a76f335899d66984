// src/matching.rs
//! Matching engine: trend → candidates → one selector call → accepted match.
//!
//! `Ok(None)` means "no good quote for this trend" and is a normal outcome.
//! Retrieval and completion failures are errors; nothing is retried here.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::RwLock;

use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::{Candidate, MatchResult, Quote, Trend};
use crate::retrieval::{HybridRetriever, HybridSearchBackend, DEFAULT_TEXT_WEIGHT, DEFAULT_VECTOR_WEIGHT};
use crate::selector::Selector;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    /// Low on purpose: embedding cosines run small, relevance is the real gate.
    pub min_similarity: f32,
    pub min_relevance: f64,
    pub candidate_count: usize,
    pub vector_weight: f32,
    pub text_weight: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.01,
            min_relevance: 0.6,
            candidate_count: 10,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            text_weight: DEFAULT_TEXT_WEIGHT,
        }
    }
}

enum Retrieval {
    Hybrid(HybridRetriever),
    InMemory(RwLock<Option<Arc<VectorIndex>>>),
}

pub struct Matcher {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    selector: Selector,
    retrieval: Retrieval,
    cfg: MatcherConfig,
}

impl Matcher {
    /// Candidates come from a fused vector + lexical backend.
    pub fn hybrid(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn HybridSearchBackend>,
        selector: Selector,
        cfg: MatcherConfig,
    ) -> Self {
        let retriever = HybridRetriever::new(backend, embedder.clone(), store.clone());
        Self {
            store,
            embedder,
            selector,
            retrieval: Retrieval::Hybrid(retriever),
            cfg,
        }
    }

    /// Candidates come from a brute-force index loaded from the store on
    /// first use (and again while it is still empty).
    pub fn in_memory(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        selector: Selector,
        cfg: MatcherConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            selector,
            retrieval: Retrieval::InMemory(RwLock::new(None)),
            cfg,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.cfg
    }

    /// Loads the retrieval index if needed; returns how many quotes it holds.
    pub async fn ensure_ready(&self) -> Result<usize> {
        match &self.retrieval {
            Retrieval::Hybrid(r) => r.warm().await,
            Retrieval::InMemory(slot) => Ok(self.index(slot).await?.len()),
        }
    }

    async fn index(&self, slot: &RwLock<Option<Arc<VectorIndex>>>) -> Result<Arc<VectorIndex>> {
        if let Some(index) = slot.read().await.as_ref().filter(|i| !i.is_empty()) {
            return Ok(index.clone());
        }
        let quotes = self
            .store
            .list_quotes_with_embeddings()
            .await
            .context("loading quote embeddings")?;
        let index = Arc::new(VectorIndex::new(quotes));
        tracing::info!(quotes = index.len(), "vector index loaded");
        *slot.write().await = Some(index.clone());
        Ok(index)
    }

    /// Candidates at or above `min_similarity`, best first. An empty
    /// catalogue is an error so callers leave the trend open.
    async fn retrieve(&self, text: &str) -> Result<Vec<Candidate>> {
        if self.ensure_ready().await.context("loading retrieval index")? == 0 {
            bail!("no quotes in index");
        }
        match &self.retrieval {
            Retrieval::Hybrid(r) => {
                let hits = r
                    .hybrid_search(text, self.cfg.candidate_count, self.cfg.vector_weight, self.cfg.text_weight)
                    .await?;
                Ok(hits
                    .into_iter()
                    .filter(|c| c.similarity >= self.cfg.min_similarity)
                    .collect())
            }
            Retrieval::InMemory(slot) => {
                let index = self.index(slot).await?;
                let q = self.embedder.embed(text).await.context("embedding trend")?;
                Ok(index.search_with_threshold(
                    &q,
                    self.cfg.min_similarity,
                    self.cfg.candidate_count as i64,
                ))
            }
        }
    }

    pub async fn match_trend(&self, trend: &Trend) -> Result<Option<MatchResult>> {
        let candidates = self.retrieve(&trend.query_text()).await?;
        if candidates.is_empty() {
            tracing::debug!(
                trend = %trend.title,
                threshold = self.cfg.min_similarity,
                "no candidates above similarity threshold"
            );
            return Ok(None);
        }
        tracing::debug!(
            count = candidates.len(),
            best_similarity = candidates[0].similarity,
            "found candidates"
        );

        let quotes: Vec<Quote> = candidates.iter().map(|c| c.quote.clone()).collect();
        let judgment = self
            .selector
            .evaluate_batch(trend, &quotes)
            .await
            .context("evaluating candidates")?;

        let Some(best) = judgment.best_match_index else {
            tracing::debug!(
                trend = %trend.title,
                recommendation = %judgment.recommendation,
                "selector found no suitable match"
            );
            return Ok(None);
        };

        let (relevance, reasoning) = match judgment.best_evaluation() {
            Some(e) if !e.reasoning.is_empty() => (e.score, e.reasoning.clone()),
            Some(e) => (e.score, judgment.recommendation.clone()),
            None => (0.0, judgment.recommendation.clone()),
        };

        if relevance < self.cfg.min_relevance {
            tracing::debug!(
                trend = %trend.title,
                relevance,
                threshold = self.cfg.min_relevance,
                "best match below relevance threshold"
            );
            return Ok(None);
        }

        let chosen = &candidates[best];
        Ok(Some(MatchResult {
            quote: chosen.quote.clone(),
            trend: trend.clone(),
            vector_similarity: chosen.similarity,
            relevance_score: relevance,
            reasoning,
        }))
    }

    /// Best candidate for ad-hoc text by similarity alone; no selector call.
    pub async fn match_text(&self, text: &str) -> Result<Option<Candidate>> {
        match &self.retrieval {
            Retrieval::Hybrid(r) => Ok(r
                .hybrid_search(text, self.cfg.candidate_count, self.cfg.vector_weight, self.cfg.text_weight)
                .await?
                .into_iter()
                .next()),
            Retrieval::InMemory(slot) => {
                let index = self.index(slot).await?;
                let q = self.embedder.embed(text).await.context("embedding text")?;
                Ok(index.search(&q, 1).into_iter().next())
            }
        }
    }
}
