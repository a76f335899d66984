// src/index.rs
//! Brute-force in-memory cosine index over embedded quotes.
//!
//! O(n·d) per query. Fine for a catalogue of a few thousand quotes; anything
//! larger should sit behind [`crate::retrieval::HybridSearchBackend`] instead.

use crate::embedding::{cosine_similarity, normalize};
use crate::models::{Candidate, Quote};

#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    quotes: Vec<Quote>,
    vectors: Vec<Vec<f32>>, // unit length, parallel to `quotes`
}

impl VectorIndex {
    /// Quotes without an embedding are ignored.
    pub fn new(quotes: Vec<Quote>) -> Self {
        let mut index = Self::default();
        for mut q in quotes {
            if let Some(v) = q.embedding.take() {
                index.vectors.push(normalize(&v));
                index.quotes.push(q);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Top `k` by similarity. Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let mut scored = self.score_all(query);
        scored.truncate(k);
        self.into_candidates(scored)
    }

    /// Everything scoring `>= threshold`, best first, at most `max_results`
    /// entries when `max_results > 0`.
    pub fn search_with_threshold(
        &self,
        query: &[f32],
        threshold: f32,
        max_results: i64,
    ) -> Vec<Candidate> {
        let mut scored: Vec<_> = self
            .score_all(query)
            .into_iter()
            .filter(|&(_, sim)| sim >= threshold)
            .collect();
        if max_results > 0 {
            scored.truncate(max_results as usize);
        }
        self.into_candidates(scored)
    }

    fn score_all(&self, query: &[f32]) -> Vec<(usize, f32)> {
        if self.is_empty() {
            return Vec::new();
        }
        let q = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&q, v)))
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn into_candidates(&self, scored: Vec<(usize, f32)>) -> Vec<Candidate> {
        scored
            .into_iter()
            .map(|(i, similarity)| Candidate {
                quote: self.quotes[i].clone(),
                similarity,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(id: i64, embedding: Option<Vec<f32>>) -> Quote {
        Quote {
            id,
            text: format!("quote {id}"),
            text_hash: format!("h{id}"),
            source_book: "Demons".into(),
            chapter: None,
            character: None,
            themes: vec![],
            embedding,
            times_posted: 0,
            last_posted_at: None,
        }
    }

    fn ids(c: &[Candidate]) -> Vec<i64> {
        c.iter().map(|c| c.quote.id).collect()
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = VectorIndex::new(vec![]);
        assert!(idx.search(&[1.0, 0.0], 5).is_empty());
        assert!(idx.search_with_threshold(&[1.0, 0.0], 0.0, 0).is_empty());
    }

    #[test]
    fn unembedded_quotes_are_skipped() {
        let idx = VectorIndex::new(vec![quote(1, None), quote(2, Some(vec![1.0, 0.0]))]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn search_orders_by_similarity_and_truncates() {
        let idx = VectorIndex::new(vec![
            quote(1, Some(vec![0.0, 1.0])),
            quote(2, Some(vec![1.0, 0.0])),
            quote(3, Some(vec![1.0, 1.0])),
        ]);
        let hits = idx.search(&[2.0, 0.0], 2);
        assert_eq!(ids(&hits), vec![2, 3]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(idx.search(&[1.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let idx = VectorIndex::new(vec![
            quote(7, Some(vec![1.0, 0.0])),
            quote(3, Some(vec![2.0, 0.0])),
            quote(5, Some(vec![0.5, 0.0])),
        ]);
        assert_eq!(ids(&idx.search(&[1.0, 0.0], 3)), vec![7, 3, 5]);
    }

    #[test]
    fn threshold_and_max_results() {
        let idx = VectorIndex::new(vec![
            quote(1, Some(vec![1.0, 0.0])),
            quote(2, Some(vec![1.0, 1.0])),
            quote(3, Some(vec![0.0, 1.0])),
        ]);
        let hits = idx.search_with_threshold(&[1.0, 0.0], 0.5, 0);
        assert_eq!(ids(&hits), vec![1, 2]);
        assert!(hits.iter().all(|c| c.similarity >= 0.5));

        let capped = idx.search_with_threshold(&[1.0, 0.0], -1.0, 1);
        assert_eq!(ids(&capped), vec![1]);

        let unbounded = idx.search_with_threshold(&[1.0, 0.0], -1.0, -3);
        assert_eq!(unbounded.len(), 3);
    }
}
