//! HTTP server for otad
//!
//! Two listeners share one state: the device API (behind the mTLS proxy)
//! and the dashboard (trusted network only).

use crate::routes;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::Router;
use ota_common::{BundleService, ServerConfig};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub service: BundleService,
    pub config: ServerConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> ota_common::Result<Self> {
        Ok(Self {
            service: BundleService::open(&config)?,
            config,
            start_time: Instant::now(),
        })
    }
}

/// Router for the device listener
pub fn device_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::device_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router for the dashboard listener
pub fn dashboard_app(state: Arc<AppState>) -> Router {
    // Limits past the address space are as good as unlimited
    let max_upload = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .merge(routes::dashboard_routes(&state.config.static_dir))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            break;
        }
    }
}

/// Run both HTTP listeners until Ctrl-C
pub async fn run(config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::new(config)?);
    let device_addr = state.config.listen.device_addr.clone();
    let dashboard_addr = state.config.listen.dashboard_addr.clone();

    let device_listener = TcpListener::bind(&device_addr)
        .await
        .with_context(|| format!("binding device listener on {}", device_addr))?;
    let dashboard_listener = TcpListener::bind(&dashboard_addr)
        .await
        .with_context(|| format!("binding dashboard listener on {}", dashboard_addr))?;

    info!("  Device API on http://{} (mTLS via proxy)", device_addr);
    info!("  Dashboard on http://{}", dashboard_addr);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down gracefully");
        }
        let _ = stop_tx.send(true);
    });

    let device = axum::serve(device_listener, device_app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal(stop_rx.clone()))
        .into_future();
    let dashboard = axum::serve(dashboard_listener, dashboard_app(state))
        .with_graceful_shutdown(shutdown_signal(stop_rx))
        .into_future();

    tokio::try_join!(device, dashboard)?;
    Ok(())
}
