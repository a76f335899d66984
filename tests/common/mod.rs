// tests/common/mod.rs
// Shared fakes for the capability traits.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dostobot::completion::Completion;
use dostobot::embedding::Embedder;
use dostobot::models::{NewQuote, NewTrend};
use dostobot::monitor::Monitor;
use dostobot::publish::{PostContent, PostReceipt, Publisher};
use dostobot::store::Store;

/// Looks texts up in a table; anything unknown gets `fallback`.
pub struct TableEmbedder {
    pub table: HashMap<String, Vec<f32>>,
    pub fallback: Vec<f32>,
}

impl TableEmbedder {
    pub fn constant(v: Vec<f32>) -> Self {
        Self {
            table: HashMap::new(),
            fallback: v,
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.table.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

/// Replies with a fixed string and remembers every user prompt.
pub struct ScriptedCompletion {
    reply: Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            reply: Err(msg.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        self.reply.clone().map_err(|e| anyhow!(e))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct StaticMonitor {
    pub name: &'static str,
    pub trends: Vec<NewTrend>,
}

#[async_trait]
impl Monitor for StaticMonitor {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_trends(&self) -> Result<Vec<NewTrend>> {
        Ok(self.trends.clone())
    }
}

pub struct FailingMonitor;

#[async_trait]
impl Monitor for FailingMonitor {
    fn name(&self) -> &str {
        "broken"
    }

    async fn fetch_trends(&self) -> Result<Vec<NewTrend>> {
        Err(anyhow!("upstream unavailable"))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub fail: bool,
    pub posted: Mutex<Vec<PostContent>>,
    pub validations: AtomicUsize,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn platform(&self) -> &str {
        "bluesky"
    }

    fn max_length(&self) -> usize {
        300
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("invalid app password"));
        }
        Ok(())
    }

    async fn post(&self, content: &PostContent) -> Result<PostReceipt> {
        if self.fail {
            return Err(anyhow!("bluesky returned 500"));
        }
        let mut posted = self.posted.lock().unwrap();
        posted.push(content.clone());
        let n = posted.len();
        Ok(PostReceipt {
            post_id: format!("at://did:plc:test/app.bsky.feed.post/{n}"),
            post_url: format!("https://bsky.app/profile/test/post/{n}"),
        })
    }
}

pub fn trend(source: &str, id: &str, title: &str) -> NewTrend {
    NewTrend {
        source: source.to_string(),
        external_id: id.to_string(),
        title: title.to_string(),
        score: 100,
        ..Default::default()
    }
}

pub fn quote(text: &str, book: &str, embedding: Vec<f32>) -> NewQuote {
    NewQuote {
        text: text.to_string(),
        source_book: book.to_string(),
        themes: vec!["suffering".to_string()],
        embedding: Some(embedding),
        ..Default::default()
    }
}

/// 2-d unit vector whose cosine with `[1, 0]` is `sim`.
pub fn at_similarity(sim: f32) -> Vec<f32> {
    vec![sim, (1.0 - sim * sim).sqrt()]
}

pub async fn seed_quotes(store: &Arc<dyn Store>, quotes: Vec<NewQuote>) -> Vec<i64> {
    let mut ids = Vec::new();
    for q in quotes {
        ids.push(store.insert_quote(&q).await.unwrap());
    }
    ids
}

pub fn judgment(best: i64, score: f64) -> String {
    format!(
        r#"{{"best_match_index": {best}, "evaluations": [{{"index": {best}, "score": {score}, "reasoning": "apt"}}], "recommendation": "ok"}}"#
    )
}

/// Serves `router` on an ephemeral local port; returns `http://127.0.0.1:port`.
pub async fn spawn_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
