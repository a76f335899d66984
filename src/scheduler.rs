// src/scheduler.rs
//! The daemon loop: monitor cycle and post cycle on two timers, one select point.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::aggregator::{hash_stored_trend, Aggregator};
use crate::formatter::format_for_limit;
use crate::health::Health;
use crate::matching::Matcher;
use crate::models::{MatchResult, NewPost};
use crate::publish::{PostContent, Publisher};
use crate::store::Store;

pub const NO_MATCH_REASON: &str = "no suitable quote match";

pub const COMPONENT_PUBLISHER: &str = "publisher";
pub const COMPONENT_INDEX: &str = "index";
pub const COMPONENT_MONITOR: &str = "monitor";
pub const COMPONENT_POST: &str = "post";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("post_cycles_total", "Post cycles run.");
        describe_counter!("posts_published_total", "Successful publishes.");
        describe_counter!("post_failures_total", "Post cycles that ended in an error.");
        describe_counter!("posts_quota_skips_total", "Post cycles skipped by the daily quota.");
    });
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub monitor_interval: Duration,
    pub post_interval: Duration,
    pub max_posts_per_day: i64,
    /// Unmatched trends examined per post cycle.
    pub scan_limit: usize,
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(30 * 60),
            post_interval: Duration::from_secs(4 * 60 * 60),
            max_posts_per_day: 6,
            scan_limit: 10,
            dry_run: false,
        }
    }
}

/// How a post cycle ended. Errors are returned separately.
#[derive(Debug, Clone, PartialEq)]
pub enum PostCycleOutcome {
    QuotaReached { posts_today: i64 },
    NoTrends,
    /// Every scanned trend was tried; `skipped` of them were marked.
    NoMatch { skipped: usize },
    DryRun { trend_id: i64, quote_id: i64, text: String },
    Posted { trend_id: i64, quote_id: i64, post_url: String },
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    aggregator: Aggregator,
    matcher: Matcher,
    publisher: Arc<dyn Publisher>,
    health: Arc<Health>,
    cfg: SchedulerConfig,
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(now)
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        aggregator: Aggregator,
        matcher: Matcher,
        publisher: Arc<dyn Publisher>,
        health: Arc<Health>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            aggregator,
            matcher,
            publisher,
            health,
            cfg,
        }
    }

    pub fn health(&self) -> Arc<Health> {
        self.health.clone()
    }

    /// Credential check and index warm-up. Failures are recorded, not fatal.
    pub async fn startup(&self) {
        if self.cfg.dry_run {
            self.health
                .set_healthy(COMPONENT_PUBLISHER, "dry run, credentials not checked");
        } else {
            match self.publisher.validate_credentials().await {
                Ok(()) => self.health.set_healthy(COMPONENT_PUBLISHER, "authenticated"),
                Err(e) => {
                    tracing::error!(error = ?e, platform = self.publisher.platform(), "credential validation failed");
                    self.health.set_unhealthy(COMPONENT_PUBLISHER, &e);
                }
            }
        }

        match self.matcher.ensure_ready().await {
            Ok(0) => {
                tracing::warn!("retrieval index is empty; trends stay open until quotes are embedded");
                self.health
                    .set_unhealthy(COMPONENT_INDEX, &anyhow!("no quotes in index"));
            }
            Ok(n) => self
                .health
                .set_healthy(COMPONENT_INDEX, &format!("loaded {n} quotes")),
            Err(e) => {
                tracing::error!(error = ?e, "failed to load retrieval index");
                self.health.set_unhealthy(COMPONENT_INDEX, &e);
            }
        }
    }

    /// Runs until `shutdown` resolves. The monitor timer fires immediately,
    /// the post timer after one full interval.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            monitor_interval = ?self.cfg.monitor_interval,
            post_interval = ?self.cfg.post_interval,
            max_posts_per_day = self.cfg.max_posts_per_day,
            dry_run = self.cfg.dry_run,
            "starting scheduler"
        );
        self.startup().await;

        let mut monitor_tick = interval(self.cfg.monitor_interval);
        monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut post_tick = interval_at(Instant::now() + self.cfg.post_interval, self.cfg.post_interval);
        post_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("scheduler shutting down");
                    return Ok(());
                }
                _ = monitor_tick.tick() => {
                    // already logged and recorded in health
                    let _ = self.run_monitor_cycle().await;
                }
                _ = post_tick.tick() => {
                    match self.run_post_cycle().await {
                        Ok(outcome) => tracing::debug!(?outcome, "post cycle finished"),
                        Err(e) => tracing::error!(error = ?e, "post cycle failed"),
                    }
                }
            }
        }
    }

    /// Fetches, filters and stores trends; returns how many were new.
    pub async fn run_monitor_cycle(&self) -> Result<usize> {
        tracing::debug!("running monitor cycle");
        match self.aggregator.fetch_and_store().await {
            Ok(fresh) => {
                self.health.set_healthy(COMPONENT_MONITOR, "fetched trends");
                tracing::info!(new_trends = fresh.len(), "monitor cycle complete");
                Ok(fresh.len())
            }
            Err(e) => {
                tracing::error!(error = ?e, "monitor cycle failed");
                self.health.set_unhealthy(COMPONENT_MONITOR, &e);
                Err(e)
            }
        }
    }

    pub async fn run_post_cycle(&self) -> Result<PostCycleOutcome> {
        ensure_metrics_described();
        counter!("post_cycles_total").increment(1);

        let result = self.post_cycle().await;
        if let Err(e) = &result {
            counter!("post_failures_total").increment(1);
            self.health.set_unhealthy(COMPONENT_POST, e);
        }
        result
    }

    async fn post_cycle(&self) -> Result<PostCycleOutcome> {
        let platform = self.publisher.platform().to_string();

        // read-then-act; a crash between publish and record can overshoot by one
        match self
            .store
            .count_posts_since(&platform, start_of_day(Utc::now()))
            .await
        {
            Ok(n) if n >= self.cfg.max_posts_per_day => {
                tracing::info!(posts_today = n, max = self.cfg.max_posts_per_day, "daily post limit reached");
                counter!("posts_quota_skips_total").increment(1);
                return Ok(PostCycleOutcome::QuotaReached { posts_today: n });
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "failed to count today's posts"),
        }

        let trends = self
            .aggregator
            .get_unmatched_trends(self.cfg.scan_limit)
            .await
            .context("loading unmatched trends")?;
        if trends.is_empty() {
            tracing::debug!("no unmatched trends to post about");
            return Ok(PostCycleOutcome::NoTrends);
        }

        let mut skipped = 0;
        let mut found = None;
        for trend in &trends {
            match self.matcher.match_trend(trend).await {
                Ok(Some(m)) => {
                    found = Some(m);
                    break;
                }
                Ok(None) => {
                    if self.cfg.dry_run {
                        continue;
                    }
                    match self.store.mark_trend_skipped(trend.id, NO_MATCH_REASON).await {
                        Ok(()) => skipped += 1,
                        Err(e) => tracing::warn!(error = ?e, trend_id = trend.id, "failed to mark trend skipped"),
                    }
                }
                // left open for the next cycle
                Err(e) => tracing::warn!(error = ?e, trend = %trend.title, "match failed"),
            }
        }

        let Some(m) = found else {
            tracing::debug!(scanned = trends.len(), skipped, "no suitable quote-trend match found");
            return Ok(PostCycleOutcome::NoMatch { skipped });
        };

        let text = format_for_limit(
            &m.quote.text,
            &m.quote.source_book,
            m.quote.attribution_character().unwrap_or_default(),
            self.publisher.max_length(),
        );

        if self.cfg.dry_run {
            tracing::info!(
                trend = %m.trend.title,
                quote_id = m.quote.id,
                relevance = m.relevance_score,
                text = %text,
                "dry run, not publishing"
            );
            return Ok(PostCycleOutcome::DryRun {
                trend_id: m.trend.id,
                quote_id: m.quote.id,
                text,
            });
        }

        let content = PostContent {
            text,
            quote_text: m.quote.text.clone(),
            source_book: m.quote.source_book.clone(),
            character: m.quote.attribution_character().unwrap_or_default().to_string(),
            trend_title: m.trend.title.clone(),
        };
        let receipt = self
            .publisher
            .post(&content)
            .await
            .with_context(|| format!("publishing to {platform}"))?;

        self.health.set_healthy(COMPONENT_POST, "posted successfully");
        counter!("posts_published_total").increment(1);
        tracing::info!(
            url = %receipt.post_url,
            trend = %m.trend.title,
            similarity = m.vector_similarity,
            relevance = m.relevance_score,
            "posted quote"
        );

        self.record(&m, &platform, &receipt.post_id, &receipt.post_url).await;

        Ok(PostCycleOutcome::Posted {
            trend_id: m.trend.id,
            quote_id: m.quote.id,
            post_url: receipt.post_url,
        })
    }

    /// Bookkeeping after a publish. The post is live, so failures only warn.
    async fn record(&self, m: &MatchResult, platform: &str, post_id: &str, post_url: &str) {
        let post = NewPost {
            quote_id: m.quote.id,
            trend_id: Some(m.trend.id),
            platform: platform.to_string(),
            platform_post_id: Some(post_id.to_string()).filter(|s| !s.is_empty()),
            post_url: Some(post_url.to_string()).filter(|s| !s.is_empty()),
            trend_title: m.trend.title.clone(),
            trend_source: m.trend.source.clone(),
            trend_hash: hash_stored_trend(&m.trend),
            relevance_score: m.relevance_score,
            relevance_reasoning: Some(m.reasoning.clone()).filter(|s| !s.is_empty()),
            vector_similarity: f64::from(m.vector_similarity),
        };
        if let Err(e) = self.store.create_post(&post).await {
            tracing::warn!(error = ?e, "failed to record post");
        }
        if let Err(e) = self.store.mark_trend_matched(m.trend.id).await {
            tracing::warn!(error = ?e, trend_id = m.trend.id, "failed to mark trend matched");
        }
        if let Err(e) = self.store.mark_quote_posted(m.quote.id, Utc::now()).await {
            tracing::warn!(error = ?e, quote_id = m.quote.id, "failed to update quote posted count");
        }
    }
}
