// src/metrics.rs
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::Config;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the global Prometheus recorder (once per process) and
    /// publishes the scheduling limits as static gauges.
    pub fn install(cfg: &Config) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;

        gauge!("max_posts_per_day").set(cfg.max_posts_per_day as f64);
        gauge!("post_interval_seconds").set(cfg.post_interval.as_secs_f64());
        gauge!("monitor_interval_seconds").set(cfg.monitor_interval.as_secs_f64());

        Ok(Self { handle })
    }

    /// A handle backed by a recorder that is not installed globally.
    /// Renders an empty exposition; used when no recorder is wanted.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// `/metrics` in the Prometheus text format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
