// src/store/mod.rs
//! Primary store for quotes, trends and posts.
//!
//! Two backends share the same semantics: [`SqliteStore`] for the daemon
//! and [`MemoryStore`] for tests and throwaway runs.
//!
//! Uniqueness rules:
//! - quotes by `text_hash` (insert returns the existing id)
//! - trends by `(source, external_id)`; an empty external id never conflicts
//! - posts by `(trend_hash, platform)`

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::{NewPost, NewQuote, NewTrend, Post, Quote, StoreStats, Trend};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the id of the new row, or of the existing row with the same text.
    async fn insert_quote(&self, quote: &NewQuote) -> Result<i64>;
    async fn get_quote(&self, id: i64) -> Result<Option<Quote>>;
    /// Quotes that carry an embedding, in id order.
    async fn list_quotes_with_embeddings(&self) -> Result<Vec<Quote>>;
    async fn set_quote_embedding(&self, id: i64, embedding: &[f32]) -> Result<()>;
    /// Bumps `times_posted` and sets `last_posted_at`.
    async fn mark_quote_posted(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn find_trend(&self, source: &str, external_id: &str) -> Result<Option<Trend>>;
    /// `Ok(None)` when a trend with the same `(source, external_id)` already exists.
    async fn insert_trend(&self, trend: &NewTrend) -> Result<Option<Trend>>;
    /// Neither matched nor skipped, newest first.
    async fn list_unmatched_trends(&self, limit: usize) -> Result<Vec<Trend>>;
    async fn mark_trend_matched(&self, id: i64) -> Result<()>;
    async fn mark_trend_skipped(&self, id: i64, reason: &str) -> Result<()>;

    /// Fails if a post for the same `(trend_hash, platform)` exists.
    async fn create_post(&self, post: &NewPost) -> Result<Post>;
    async fn count_posts_since(&self, platform: &str, since: DateTime<Utc>) -> Result<i64>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Content-address for quote dedup: hex SHA-256 of the trimmed text.
pub fn quote_text_hash(text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    to_hex(&digest)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
