// src/monitor/reddit.rs
//! Reddit hot posts from a handful of subreddits, app-only OAuth.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{truncate_chars, Monitor};
use crate::models::NewTrend;

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_URL: &str = "https://oauth.reddit.com";
pub const DEFAULT_SUBREDDITS: &[&str] =
    &["philosophy", "books", "literature", "AskPhilosophy", "TrueReddit"];
pub const DEFAULT_MAX_POSTS: usize = 25;
const PER_SUBREDDIT: usize = 10;
const SELFTEXT_MAX: usize = 500;

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub subreddits: Vec<String>,
    pub max_posts: usize,
    pub auth_url: String,
    pub api_url: String,
}

impl RedditConfig {
    pub fn new(client_id: &str, client_secret: &str, user_agent: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            user_agent: user_agent.to_string(),
            subreddits: DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
            max_posts: DEFAULT_MAX_POSTS,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

struct Token {
    value: String,
    expires: Instant,
}

pub struct RedditMonitor {
    http: reqwest::Client,
    cfg: RedditConfig,
    token: Mutex<Option<Token>>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: RedditPost,
}

#[derive(Deserialize)]
struct RedditPost {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    score: i64,
}

#[derive(Deserialize)]
struct TokenResp {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl RedditMonitor {
    pub fn new(mut cfg: RedditConfig) -> Result<Self> {
        if cfg.subreddits.is_empty() {
            cfg.subreddits = DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect();
        }
        if cfg.max_posts == 0 {
            cfg.max_posts = DEFAULT_MAX_POSTS;
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building reddit http client")?;
        Ok(Self {
            http,
            cfg,
            token: Mutex::new(None),
        })
    }

    /// Cached token, refreshed 60 s before Reddit says it expires.
    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(t) = guard.as_ref().filter(|t| Instant::now() < t.expires) {
            return Ok(t.value.clone());
        }

        let resp = self
            .http
            .post(&self.cfg.auth_url)
            .basic_auth(&self.cfg.client_id, Some(&self.cfg.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("reddit auth failed (status {status}): {body}");
        }
        let tr: TokenResp = resp.json().await.context("decoding reddit token")?;
        tracing::debug!(expires_in = tr.expires_in, "obtained reddit access token");

        let value = tr.access_token.clone();
        *guard = Some(Token {
            value: tr.access_token,
            expires: Instant::now() + Duration::from_secs(tr.expires_in.saturating_sub(60)),
        });
        Ok(value)
    }

    async fn subreddit_hot(&self, token: &str, subreddit: &str) -> Result<Vec<NewTrend>> {
        let url = format!(
            "{}/r/{subreddit}/hot?limit={PER_SUBREDDIT}",
            self.cfg.api_url.trim_end_matches('/')
        );
        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("reddit api error (status {status}): {body}");
        }
        let listing: Listing = resp.json().await.context("decoding reddit listing")?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|c| post_to_trend(c.data))
            .collect())
    }
}

fn post_to_trend(post: RedditPost) -> NewTrend {
    let url = if post.permalink.starts_with('/') {
        format!("https://www.reddit.com{}", post.permalink)
    } else {
        post.url
    };
    NewTrend {
        source: "reddit".to_string(),
        external_id: post.id,
        title: post.title,
        url,
        description: truncate_chars(&post.selftext, SELFTEXT_MAX),
        score: post.score,
    }
}

/// Highest score first, capped.
fn merge_ranked(mut trends: Vec<NewTrend>, max: usize) -> Vec<NewTrend> {
    trends.sort_by(|a, b| b.score.cmp(&a.score));
    trends.truncate(max);
    trends
}

#[async_trait]
impl Monitor for RedditMonitor {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn fetch_trends(&self) -> Result<Vec<NewTrend>> {
        let token = self.access_token().await.context("get access token")?;

        let mut all = Vec::new();
        for sub in &self.cfg.subreddits {
            match self.subreddit_hot(&token, sub).await {
                Ok(mut t) => all.append(&mut t),
                Err(e) => tracing::warn!(error = ?e, subreddit = %sub, "failed to fetch subreddit"),
            }
        }

        let trends = merge_ranked(all, self.cfg.max_posts);
        tracing::debug!(count = trends.len(), "fetched reddit trends");
        Ok(trends)
    }
}
