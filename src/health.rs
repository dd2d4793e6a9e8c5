use crate::{error::AppError, jobs::JobRegistry, url_cache::UrlCache, util::format_duration};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::{net::SocketAddr, time::Instant};
use tracing::info;

const SERVICE_NAME: &str = "YouTube Downloader Bot";

#[derive(Clone)]
pub struct HealthState {
    started_at: Instant,
    registry: JobRegistry,
    urls: UrlCache,
}

impl HealthState {
    pub fn new(registry: JobRegistry, urls: UrlCache) -> Self {
        Self {
            started_at: Instant::now(),
            registry,
            urls,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    uptime: String,
    uptime_seconds: u64,
    active_jobs: usize,
    cached_urls: usize,
    service: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthReport> {
    let uptime_seconds = state.started_at.elapsed().as_secs();
    Json(HealthReport {
        status: "healthy",
        uptime: format_duration(uptime_seconds),
        uptime_seconds,
        active_jobs: state.registry.len(),
        cached_urls: state.urls.len(),
        service: SERVICE_NAME,
    })
}

pub fn make_app(state: HealthState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves the liveness endpoint on all interfaces until the process exits.
pub async fn serve(port: u16, state: HealthState) -> Result<(), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "health_server_listening", %addr);
    axum::serve(listener, make_app(state)).await?;
    Ok(())
}
