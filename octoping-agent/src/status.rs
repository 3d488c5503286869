//! Status endpoint
//!
//! Serves liveness and the Prometheus exposition of the agent's registry.

use crate::monitor::PrometheusMonitor;
use crate::server::{Listener, Ready, Runner};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8081";

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn app(monitor: Arc<PrometheusMonitor>) -> Router {
    Router::new()
        .route("/", get(|| async { concat!("octoping-agent ", env!("CARGO_PKG_VERSION")) }))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics))
        .with_state(monitor)
}

async fn metrics(State(monitor): State<Arc<PrometheusMonitor>>) -> Response {
    match monitor.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Supervised HTTP listener for [`app`]. Signals ready once bound.
pub struct StatusListener {
    addr: SocketAddr,
    monitor: Arc<PrometheusMonitor>,
}

impl StatusListener {
    pub fn new(addr: SocketAddr, monitor: Arc<PrometheusMonitor>) -> Self {
        Self { addr, monitor }
    }
}

#[async_trait]
impl Listener for StatusListener {
    async fn start(
        &self,
        token: CancellationToken,
        ready: Ready,
        _run: Runner,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind status server to {}", self.addr))?;
        info!("Status server listening on {}", listener.local_addr()?);
        ready.ready();

        axum::serve(listener, app(Arc::clone(&self.monitor)))
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("Status server failed")?;

        info!("Status server stopped");
        Ok(())
    }
}
