// src/app.rs
//! Process-lifetime context: builds every component from [`Config`].

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::aggregator::Aggregator;
use crate::completion::{AnthropicClient, Completion, OpenAiClient};
use crate::config::{terms, Config, RetrievalMode};
use crate::embedding::{Embedder, OllamaEmbedder, OpenAiEmbedder};
use crate::health::Health;
use crate::matching::{Matcher, MatcherConfig};
use crate::monitor::hackernews::HackerNewsMonitor;
use crate::monitor::reddit::{RedditConfig, RedditMonitor};
use crate::monitor::Monitor;
use crate::publish::{BlueskyPublisher, Publisher};
use crate::retrieval::local::LocalHybridBackend;
use crate::safety::SafetyFilter;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::selector::Selector;
use crate::store::{SqliteStore, Store};

pub struct App {
    pub store: Arc<dyn Store>,
    pub health: Arc<Health>,
    pub scheduler: Scheduler,
}

pub fn build_embedder(cfg: &Config) -> Result<Arc<dyn Embedder>> {
    Ok(match cfg.embed_provider.as_str() {
        "ollama" => Arc::new(OllamaEmbedder::new(&cfg.ollama_host, &cfg.ollama_model)?),
        "openai" => Arc::new(OpenAiEmbedder::new(&cfg.openai_api_key, &cfg.openai_embed_model)?),
        other => bail!("unknown EMBED_PROVIDER {other:?}"),
    })
}

pub fn build_completion(cfg: &Config) -> Result<Arc<dyn Completion>> {
    let model = cfg.completion_model.as_deref();
    Ok(match cfg.completion_provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(&cfg.anthropic_api_key, model)?),
        "openai" => Arc::new(OpenAiClient::new(&cfg.openai_api_key, model)?),
        other => bail!("unknown COMPLETION_PROVIDER {other:?}"),
    })
}

pub fn build_monitors(cfg: &Config) -> Result<Vec<Arc<dyn Monitor>>> {
    let mut monitors: Vec<Arc<dyn Monitor>> =
        vec![Arc::new(HackerNewsMonitor::new(cfg.hn_max_stories)?)];
    if cfg.reddit_enabled() {
        monitors.push(Arc::new(RedditMonitor::new(RedditConfig::new(
            &cfg.reddit_client_id,
            &cfg.reddit_client_secret,
            &cfg.reddit_user_agent,
        ))?));
    }
    Ok(monitors)
}

pub fn build_matcher(
    cfg: &Config,
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    completion: Arc<dyn Completion>,
) -> Matcher {
    let selector = Selector::new(completion);
    let mcfg = MatcherConfig::default();
    match cfg.retrieval_mode {
        RetrievalMode::Hybrid => {
            let backend = Arc::new(LocalHybridBackend::new(store.clone()));
            Matcher::hybrid(store, embedder, backend, selector, mcfg)
        }
        RetrievalMode::Memory => Matcher::in_memory(store, embedder, selector, mcfg),
    }
}

impl App {
    /// Opens the database and wires the daemon.
    pub async fn build(cfg: &Config) -> Result<Self> {
        tracing::info!(path = %cfg.database_path.display(), "connecting to database");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::connect(&cfg.database_path)
                .await
                .context("connect to database")?,
        );
        Self::with_store(cfg, store)
    }

    pub fn with_store(cfg: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let terms = terms::load_terms(cfg.safety_terms_path.as_deref())
            .context("loading safety terms")?;
        if !terms.is_empty() {
            tracing::info!(count = terms.len(), "loaded additional safety terms");
        }
        let filter = SafetyFilter::new(&terms, cfg.min_trend_score);

        let aggregator = Aggregator::new(build_monitors(cfg)?, filter, store.clone());
        tracing::info!(monitors = ?aggregator.monitor_names(), "monitors configured");

        let matcher = build_matcher(
            cfg,
            store.clone(),
            build_embedder(cfg)?,
            build_completion(cfg)?,
        );
        let publisher: Arc<dyn Publisher> = Arc::new(BlueskyPublisher::new(
            &cfg.bluesky_handle,
            &cfg.bluesky_app_password,
        )?);

        let health = Arc::new(Health::new());
        let scheduler = Scheduler::new(
            store.clone(),
            aggregator,
            matcher,
            publisher,
            health.clone(),
            SchedulerConfig {
                monitor_interval: cfg.monitor_interval,
                post_interval: cfg.post_interval,
                max_posts_per_day: cfg.max_posts_per_day,
                dry_run: cfg.dry_run,
                ..SchedulerConfig::default()
            },
        );

        Ok(Self {
            store,
            health,
            scheduler,
        })
    }
}
