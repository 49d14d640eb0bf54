//! `/metrics`, `/metrics/json` and `/healthz` for scrapers and liveness checks.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::scheduler::DriftScheduler;
use crate::shutdown::ShutdownSignal;

pub fn router(scheduler: Arc<DriftScheduler>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/metrics/json", get(metrics_json))
        .route("/healthz", get(healthz))
        .with_state(scheduler)
}

async fn metrics(State(scheduler): State<Arc<DriftScheduler>>) -> impl IntoResponse {
    let body = scheduler.reporter().collector().export_prometheus();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn metrics_json(State(scheduler): State<Arc<DriftScheduler>>) -> impl IntoResponse {
    Json(scheduler.reporter().collector().export_json())
}

async fn healthz(State(scheduler): State<Arc<DriftScheduler>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "environments": scheduler.environments().len(),
        "totals": scheduler.reporter().totals(),
    }))
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve(listener: TcpListener, scheduler: Arc<DriftScheduler>, shutdown: ShutdownSignal) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "metrics endpoint listening"),
        Err(e) => error!(error = %e, "metrics listener has no local address"),
    }
    let server = axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(async move { shutdown.wait().await });
    if let Err(e) = server.await {
        error!(error = %e, "metrics endpoint error");
    }
}
