// src/retrieval/local.rs
//! In-process hybrid backend over the store's embedded quotes.
//!
//! Two rankings, fused with weighted reciprocal-rank fusion:
//! - vector: cosine similarity against every quote
//! - lexical: query-term frequency over text, themes, book and character

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;

use super::{HybridSearchBackend, SearchHit};
use crate::embedding::{cosine_similarity, normalize};
use crate::models::Quote;
use crate::store::Store;

/// RRF damping constant.
pub const RRF_K: f32 = 60.0;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));

/// Lowercased words of at least 3 chars.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() >= 3)
        .collect()
}

struct Entry {
    quote_id: i64,
    vector: Vec<f32>, // unit length
    terms: HashMap<String, u32>,
}

impl Entry {
    fn from_quote(q: Quote) -> Option<Self> {
        let vector = normalize(q.embedding.as_deref()?);
        let mut terms = HashMap::new();
        let themes = q.themes.join(" ");
        let fields = [
            q.text.as_str(),
            themes.as_str(),
            q.source_book.as_str(),
            q.character.as_deref().unwrap_or_default(),
        ]
        .join(" ");
        for t in tokenize(&fields) {
            *terms.entry(t).or_insert(0) += 1;
        }
        Some(Self {
            quote_id: q.id,
            vector,
            terms,
        })
    }
}

pub struct LocalHybridBackend {
    store: Arc<dyn Store>,
    entries: RwLock<Option<Vec<Entry>>>,
}

impl LocalHybridBackend {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: RwLock::new(None),
        }
    }

    /// Reloads from the store, replacing whatever was cached.
    pub async fn refresh(&self) -> Result<usize> {
        let quotes = self
            .store
            .list_quotes_with_embeddings()
            .await
            .context("loading embedded quotes")?;
        let entries: Vec<Entry> = quotes.into_iter().filter_map(Entry::from_quote).collect();
        let n = entries.len();
        *self.entries.write().await = Some(entries);
        tracing::info!(quotes = n, "hybrid index loaded");
        Ok(n)
    }

    /// Loads on first use; an empty cache is reloaded so quotes embedded
    /// after startup are picked up.
    async fn ensure_loaded(&self) -> Result<usize> {
        if let Some(entries) = self.entries.read().await.as_ref().filter(|e| !e.is_empty()) {
            return Ok(entries.len());
        }
        self.refresh().await
    }
}

#[async_trait]
impl HybridSearchBackend for LocalHybridBackend {
    async fn hybrid_search(
        &self,
        query_vec: &[f32],
        query_text: &str,
        k: usize,
        vector_weight: f32,
        text_weight: f32,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_loaded().await?;
        let guard = self.entries.read().await;
        let entries = match guard.as_ref() {
            Some(e) if !e.is_empty() && k > 0 => e,
            _ => return Ok(Vec::new()),
        };

        let q = normalize(query_vec);
        let sims: Vec<f32> = entries.iter().map(|e| cosine_similarity(&q, &e.vector)).collect();

        let mut by_vector: Vec<usize> = (0..entries.len()).collect();
        by_vector.sort_by(|&a, &b| {
            sims[b]
                .partial_cmp(&sims[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let query_terms = tokenize(query_text);
        let mut by_text: Vec<(usize, u32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let tf: u32 = query_terms.iter().filter_map(|t| e.terms.get(t)).sum();
                (i, tf)
            })
            .filter(|&(_, tf)| tf > 0)
            .collect();
        by_text.sort_by(|a, b| b.1.cmp(&a.1));

        let mut fused = vec![0.0f32; entries.len()];
        for (rank, &i) in by_vector.iter().enumerate() {
            fused[i] += vector_weight / (RRF_K + rank as f32 + 1.0);
        }
        for (rank, &(i, _)) in by_text.iter().enumerate() {
            fused[i] += text_weight / (RRF_K + rank as f32 + 1.0);
        }

        // start from vector order so fused ties fall back to similarity
        let mut order = by_vector;
        order.sort_by(|&a, &b| {
            fused[b]
                .partial_cmp(&fused[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(k);

        Ok(order
            .into_iter()
            .map(|i| SearchHit {
                similarity: sims[i],
                score: fused[i],
                payload: serde_json::json!({ "quote_id": entries[i].quote_id }),
            })
            .collect())
    }

    async fn warm(&self) -> Result<usize> {
        self.ensure_loaded().await
    }
}
