// src/aggregator.rs
//! Fetch from every monitor, filter, persist what is new.

use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::models::{NewTrend, Trend};
use crate::monitor::Monitor;
use crate::safety::SafetyFilter;
use crate::store::{to_hex, Store};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("trends_fetched_total", "Trends returned by monitors.");
        describe_counter!("trends_filtered_total", "Trends dropped by the safety filter.");
        describe_counter!("trends_stored_total", "New trends persisted.");
        describe_counter!("monitor_errors_total", "Monitor fetch failures.");
        describe_gauge!("trends_last_fetch_ts", "Unix ts of the last aggregation run.");
    });
}

/// Hex of the first 16 bytes of SHA-256 over `source:external_id:title`.
pub fn hash_trend(source: &str, external_id: &str, title: &str) -> String {
    let digest = Sha256::digest(format!("{source}:{external_id}:{title}").as_bytes());
    to_hex(&digest[..16])
}

pub fn hash_stored_trend(t: &Trend) -> String {
    hash_trend(&t.source, t.external_id.as_deref().unwrap_or_default(), &t.title)
}

pub struct Aggregator {
    monitors: Vec<Arc<dyn Monitor>>,
    filter: SafetyFilter,
    store: Arc<dyn Store>,
}

impl Aggregator {
    pub fn new(monitors: Vec<Arc<dyn Monitor>>, filter: SafetyFilter, store: Arc<dyn Store>) -> Self {
        Self {
            monitors,
            filter,
            store,
        }
    }

    pub fn monitor_names(&self) -> Vec<String> {
        self.monitors.iter().map(|m| m.name().to_string()).collect()
    }

    /// Returns only the trends that were not already stored. A failing
    /// monitor or a failing insert is logged and skipped.
    pub async fn fetch_and_store(&self) -> Result<Vec<NewTrend>> {
        ensure_metrics_described();

        let mut all = Vec::new();
        for m in &self.monitors {
            match m.fetch_trends().await {
                Ok(mut v) => {
                    tracing::debug!(source = m.name(), count = v.len(), "fetched trends");
                    all.append(&mut v);
                }
                Err(e) => {
                    tracing::warn!(error = ?e, source = m.name(), "monitor fetch failed");
                    counter!("monitor_errors_total").increment(1);
                }
            }
        }

        let fetched = all.len();
        let filtered = self.filter.filter_trends(all);
        counter!("trends_fetched_total").increment(fetched as u64);
        counter!("trends_filtered_total").increment((fetched - filtered.len()) as u64);

        let after_filter = filtered.len();
        let mut fresh = Vec::new();
        for trend in filtered {
            match self.store_trend(&trend).await {
                Ok(true) => fresh.push(trend),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = ?e, title = %trend.title, "failed to store trend"),
            }
        }

        counter!("trends_stored_total").increment(fresh.len() as u64);
        gauge!("trends_last_fetch_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            total_fetched = fetched,
            after_filter,
            new_stored = fresh.len(),
            "trend aggregation complete"
        );
        Ok(fresh)
    }

    async fn store_trend(&self, trend: &NewTrend) -> Result<bool> {
        if self
            .store
            .find_trend(&trend.source, &trend.external_id)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        Ok(self.store.insert_trend(trend).await?.is_some())
    }

    /// Post-cycle input queue: open trends, newest first.
    pub async fn get_unmatched_trends(&self, limit: usize) -> Result<Vec<Trend>> {
        self.store.list_unmatched_trends(limit).await
    }
}
