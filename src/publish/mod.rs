// src/publish/mod.rs
//! Publishing capability. The scheduler only talks to [`Publisher`].

pub mod bluesky;

use anyhow::Result;
use async_trait::async_trait;

pub use bluesky::BlueskyPublisher;

/// What to publish. `text` is the fully rendered post; the remaining fields
/// let a publisher re-render when `text` is empty or too long.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostContent {
    pub text: String,
    pub quote_text: String,
    pub source_book: String,
    pub character: String,
    pub trend_title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostReceipt {
    pub post_id: String,
    pub post_url: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> &str;
    /// Maximum post length in chars.
    fn max_length(&self) -> usize;
    /// Safe to call repeatedly; no side effects once authenticated.
    async fn validate_credentials(&self) -> Result<()>;
    async fn post(&self, content: &PostContent) -> Result<PostReceipt>;
}
