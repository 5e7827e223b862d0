//! HTTP transport for the `/healthz` and `/metrics` endpoints (spec §6,
//! §10.7), grounded on
//! `dashflow-observability::metrics_server::serve_metrics`.

use crate::health::HealthState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;

async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let families = prometheus::default_registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }
    ([(axum::http::header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}

async fn health_handler(State(state): State<HealthState>) -> Response {
    let report = state.snapshot();
    let code = if report.recent_error {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, axum::Json(report)).into_response()
}

/// Serves `/healthz` and `/metrics` until the process exits. Bind address
/// is `0.0.0.0:{port}`; pass `0` to let the OS choose.
pub async fn serve(port: u16, health: HealthState) -> crate::error::Result<()> {
    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(health);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::Error::Server(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, "observability server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::Server(e.to_string()))
}
