// src/api.rs
//! Read-only status surface: `/health` and `/metrics`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tower_http::cors::CorsLayer;

use crate::health::{Health, HealthStatus};
use crate::metrics::Metrics;

#[derive(serde::Serialize)]
struct HealthResp {
    status: &'static str,
    components: HashMap<String, HealthStatus>,
}

pub fn router(health: Arc<Health>, metrics: &Metrics) -> Router {
    Router::new()
        .route("/health", get(health_report))
        .with_state(health)
        .merge(metrics.router())
        .layer(CorsLayer::very_permissive())
}

async fn health_report(State(health): State<Arc<Health>>) -> (StatusCode, Json<HealthResp>) {
    let components = health.get_all_statuses();
    let (code, status) = if health.is_overall_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (code, Json(HealthResp { status, components }))
}

/// Serves the router until `shutdown` resolves.
pub async fn serve<F>(addr: &str, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    use anyhow::Context;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "http status surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")
}
