use axum::{routing::get, Json, Router};
use serde_json::json;
use tokio::sync::watch as signal;
use tower_http::trace::TraceLayer;

use crate::metrics;
use crate::Result;

pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(gather_metrics))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn ready() -> Json<serde_json::Value> {
    Json(json!({ "status": "ready" }))
}

async fn gather_metrics() -> String {
    metrics::gather_metrics()
}

pub async fn serve(addr: String, mut shutdown: signal::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, build_router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
