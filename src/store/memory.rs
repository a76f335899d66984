// src/store/memory.rs
//! Process-local [`Store`]. Everything lives behind one `RwLock`.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{quote_text_hash, Store};
use crate::models::{NewPost, NewQuote, NewTrend, Post, Quote, StoreStats, Trend};

#[derive(Default)]
struct Inner {
    quotes: Vec<Quote>,
    trends: Vec<Trend>,
    posts: Vec<Post>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_quote(&self, quote: &NewQuote) -> Result<i64> {
        let hash = quote_text_hash(&quote.text);
        let mut inner = self.write()?;
        if let Some(existing) = inner.quotes.iter().find(|q| q.text_hash == hash) {
            return Ok(existing.id);
        }
        let id = inner.quotes.len() as i64 + 1;
        inner.quotes.push(Quote {
            id,
            text: quote.text.trim().to_string(),
            text_hash: hash,
            source_book: quote.source_book.clone(),
            chapter: quote.chapter.clone(),
            character: quote.character.clone(),
            themes: quote.themes.clone(),
            embedding: quote.embedding.clone(),
            times_posted: 0,
            last_posted_at: None,
        });
        Ok(id)
    }

    async fn get_quote(&self, id: i64) -> Result<Option<Quote>> {
        Ok(self.read()?.quotes.iter().find(|q| q.id == id).cloned())
    }

    async fn list_quotes_with_embeddings(&self) -> Result<Vec<Quote>> {
        Ok(self
            .read()?
            .quotes
            .iter()
            .filter(|q| q.embedding.is_some())
            .cloned()
            .collect())
    }

    async fn set_quote_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let mut inner = self.write()?;
        let q = inner
            .quotes
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| anyhow!("quote {id} not found"))?;
        q.embedding = Some(embedding.to_vec());
        Ok(())
    }

    async fn mark_quote_posted(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.write()?;
        let q = inner
            .quotes
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| anyhow!("quote {id} not found"))?;
        q.times_posted += 1;
        q.last_posted_at = Some(at);
        Ok(())
    }

    async fn find_trend(&self, source: &str, external_id: &str) -> Result<Option<Trend>> {
        if external_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .read()?
            .trends
            .iter()
            .find(|t| t.source == source && t.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn insert_trend(&self, trend: &NewTrend) -> Result<Option<Trend>> {
        let mut inner = self.write()?;
        if !trend.external_id.is_empty()
            && inner.trends.iter().any(|t| {
                t.source == trend.source && t.external_id.as_deref() == Some(&trend.external_id)
            })
        {
            return Ok(None);
        }
        let row = Trend {
            id: inner.trends.len() as i64 + 1,
            source: trend.source.clone(),
            external_id: non_empty(&trend.external_id),
            title: trend.title.clone(),
            url: non_empty(&trend.url),
            description: non_empty(&trend.description),
            score: trend.score,
            matched: false,
            skipped: false,
            skip_reason: None,
            detected_at: Utc::now(),
        };
        inner.trends.push(row.clone());
        Ok(Some(row))
    }

    async fn list_unmatched_trends(&self, limit: usize) -> Result<Vec<Trend>> {
        let inner = self.read()?;
        let mut out: Vec<Trend> = inner
            .trends
            .iter()
            .filter(|t| !t.matched && !t.skipped)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_trend_matched(&self, id: i64) -> Result<()> {
        let mut inner = self.write()?;
        let t = inner
            .trends
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("trend {id} not found"))?;
        t.matched = true;
        Ok(())
    }

    async fn mark_trend_skipped(&self, id: i64, reason: &str) -> Result<()> {
        let mut inner = self.write()?;
        let t = inner
            .trends
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("trend {id} not found"))?;
        t.skipped = true;
        t.skip_reason = Some(reason.to_string());
        Ok(())
    }

    async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let mut inner = self.write()?;
        if inner
            .posts
            .iter()
            .any(|p| p.trend_hash == post.trend_hash && p.platform == post.platform)
        {
            bail!(
                "post for trend {} on {} already exists",
                post.trend_hash,
                post.platform
            );
        }
        let row = Post {
            id: inner.posts.len() as i64 + 1,
            quote_id: post.quote_id,
            trend_id: post.trend_id,
            platform: post.platform.clone(),
            platform_post_id: post.platform_post_id.clone(),
            post_url: post.post_url.clone(),
            trend_title: post.trend_title.clone(),
            trend_source: post.trend_source.clone(),
            trend_hash: post.trend_hash.clone(),
            relevance_score: post.relevance_score,
            relevance_reasoning: post.relevance_reasoning.clone(),
            vector_similarity: post.vector_similarity,
            likes: 0,
            reposts: 0,
            replies: 0,
            posted_at: Utc::now(),
        };
        inner.posts.push(row.clone());
        Ok(row)
    }

    async fn count_posts_since(&self, platform: &str, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .read()?
            .posts
            .iter()
            .filter(|p| p.platform == platform && p.posted_at >= since)
            .count() as i64)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        Ok(StoreStats {
            quotes: inner.quotes.len() as i64,
            quotes_with_embeddings: inner.quotes.iter().filter(|q| q.embedding.is_some()).count()
                as i64,
            trends: inner.trends.len() as i64,
            unmatched_trends: inner.trends.iter().filter(|t| !t.matched && !t.skipped).count()
                as i64,
            posts: inner.posts.len() as i64,
        })
    }
}
