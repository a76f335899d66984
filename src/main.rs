//! DostoBot daemon entrypoint.
//! Loads config, wires the scheduler and (optionally) the HTTP status surface,
//! and runs until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dostobot::{api, metrics::Metrics, App, Config};

/// `RUST_LOG` wins, then `LOG_LEVEL`, then `info`. `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match std::env::var("LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => EnvFilter::try_new(level.trim()),
            _ => Ok(EnvFilter::new("info")),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env().context("load config")?;
    init_tracing();
    cfg.validate_for_serve().context("validate config")?;

    let metrics = Metrics::install(&cfg)?;
    let app = App::build(&cfg).await?;

    tracing::info!(
        monitor_interval = ?cfg.monitor_interval,
        post_interval = ?cfg.post_interval,
        max_posts_per_day = cfg.max_posts_per_day,
        dry_run = cfg.dry_run,
        "starting dostobot daemon"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let wait_stop = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let server = cfg.http_addr.clone().map(|addr| {
        let router = api::router(app.health.clone(), &metrics);
        let stop = wait_stop(stop_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = api::serve(&addr, router, stop).await {
                tracing::error!(error = ?e, "http server failed");
            }
        })
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("received shutdown signal");
        let _ = stop_tx.send(true);
    });

    app.scheduler.run(wait_stop(stop_rx)).await?;

    if let Some(handle) = server {
        let _ = handle.await;
    }
    tracing::info!("shut down");
    Ok(())
}
