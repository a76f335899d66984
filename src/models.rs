// src/models.rs
//! Domain records shared by the store, the matcher and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Character sentinel that means "no attribution".
pub const NARRATOR: &str = "Narrator";

/// A trend as produced by a monitor, before it is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTrend {
    pub source: String,      // e.g. "hackernews", "reddit"
    pub external_id: String, // source-scoped id, may be empty
    pub title: String,
    pub url: String,
    pub description: String,
    pub score: i64,
}

impl NewTrend {
    /// Text used for retrieval: title, then a blank line and the description.
    pub fn query_text(&self) -> String {
        query_text(&self.title, &self.description)
    }
}

/// A persisted trend row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trend {
    pub id: i64,
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub score: i64,
    pub matched: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl Trend {
    pub fn query_text(&self) -> String {
        query_text(&self.title, self.description.as_deref().unwrap_or_default())
    }
}

fn query_text(title: &str, description: &str) -> String {
    if description.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n\n{description}")
    }
}

/// A curated quote. Owned by the extraction pipeline; read-only here apart
/// from posting counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub id: i64,
    pub text: String,
    pub text_hash: String,
    pub source_book: String,
    pub chapter: Option<String>,
    pub character: Option<String>,
    pub themes: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub times_posted: i64,
    pub last_posted_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Character name usable in an attribution line, if any.
    pub fn attribution_character(&self) -> Option<&str> {
        self.character
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != NARRATOR)
    }
}

/// Fields needed to insert a quote.
#[derive(Debug, Clone, Default)]
pub struct NewQuote {
    pub text: String,
    pub source_book: String,
    pub chapter: Option<String>,
    pub character: Option<String>,
    pub themes: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

/// A quote paired with its retrieval-time similarity. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub quote: Quote,
    pub similarity: f32,
}

/// The accepted pairing of one trend with one quote.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub quote: Quote,
    pub trend: Trend,
    pub vector_similarity: f32,
    pub relevance_score: f64,
    pub reasoning: String,
}

/// Permanent record of a publication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: i64,
    pub quote_id: i64,
    pub trend_id: Option<i64>,
    pub platform: String,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    pub trend_title: String,
    pub trend_source: String,
    pub trend_hash: String,
    pub relevance_score: f64,
    pub relevance_reasoning: Option<String>,
    pub vector_similarity: f64,
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    pub posted_at: DateTime<Utc>,
}

/// Fields needed to record a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub quote_id: i64,
    pub trend_id: Option<i64>,
    pub platform: String,
    pub platform_post_id: Option<String>,
    pub post_url: Option<String>,
    pub trend_title: String,
    pub trend_source: String,
    pub trend_hash: String,
    pub relevance_score: f64,
    pub relevance_reasoning: Option<String>,
    pub vector_similarity: f64,
}

/// Row counts for operational visibility.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub quotes: i64,
    pub quotes_with_embeddings: i64,
    pub trends: i64,
    pub unmatched_trends: i64,
    pub posts: i64,
}
