// src/monitor/hackernews.rs
//! Hacker News top stories via the public Firebase API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::{normalize_text, Monitor};
use crate::models::NewTrend;

pub const DEFAULT_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0";
pub const DEFAULT_MAX_STORIES: usize = 30;

#[derive(Debug, Clone, Deserialize)]
struct HnItem {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

pub struct HackerNewsMonitor {
    http: reqwest::Client,
    base_url: String,
    max_stories: usize,
}

impl HackerNewsMonitor {
    /// `max_stories == 0` falls back to the default.
    pub fn new(max_stories: usize) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, max_stories)
    }

    pub fn with_base_url(base_url: &str, max_stories: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("dostobot/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building hackernews http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_stories: if max_stories == 0 {
                DEFAULT_MAX_STORIES
            } else {
                max_stories
            },
        })
    }

    async fn top_story_ids(&self) -> Result<Vec<i64>> {
        let url = format!("{}/topstories.json", self.base_url);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            bail!("HN API returned status {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

async fn fetch_item(http: &reqwest::Client, base_url: &str, id: i64) -> Result<Option<HnItem>> {
    let resp = http.get(format!("{base_url}/item/{id}.json")).send().await?;
    if !resp.status().is_success() {
        bail!("HN API returned status {} for item {id}", resp.status());
    }
    // deleted items come back as `null`
    Ok(resp.json().await?)
}

fn to_trend(item: HnItem) -> Option<NewTrend> {
    if item.kind != "story" {
        return None;
    }
    let text = normalize_text(&item.text);
    let description = if text.is_empty() && !item.url.is_empty() {
        format!("Link: {}", item.url)
    } else {
        text
    };
    Some(NewTrend {
        source: "hackernews".to_string(),
        external_id: item.id.to_string(),
        title: item.title,
        url: item.url,
        description,
        score: item.score,
    })
}

#[async_trait]
impl Monitor for HackerNewsMonitor {
    fn name(&self) -> &str {
        "hackernews"
    }

    async fn fetch_trends(&self) -> Result<Vec<NewTrend>> {
        let mut ids = self.top_story_ids().await.context("fetch top stories")?;
        ids.truncate(self.max_stories);

        // one slot per position keeps rank order regardless of completion order
        let slots: Arc<Mutex<Vec<Option<HnItem>>>> = Arc::new(Mutex::new(vec![None; ids.len()]));
        let errors = Arc::new(Mutex::new(0usize));

        let mut tasks = JoinSet::new();
        for (idx, id) in ids.into_iter().enumerate() {
            let http = self.http.clone();
            let base_url = self.base_url.clone();
            let slots = slots.clone();
            let errors = errors.clone();
            tasks.spawn(async move {
                match fetch_item(&http, &base_url, id).await {
                    Ok(item) => slots.lock().await[idx] = item,
                    Err(e) => {
                        tracing::debug!(error = ?e, id, "HN item fetch failed");
                        *errors.lock().await += 1;
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = ?e, "HN fetch task panicked");
                *errors.lock().await += 1;
            }
        }

        let failed = *errors.lock().await;
        if failed > 0 {
            tracing::warn!(errors = failed, "some HN stories failed to fetch");
        }

        let items = std::mem::take(&mut *slots.lock().await);
        let trends: Vec<NewTrend> = items.into_iter().flatten().filter_map(to_trend).collect();
        tracing::debug!(count = trends.len(), "fetched HN trends");
        Ok(trends)
    }
}
