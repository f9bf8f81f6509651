//! Operational endpoints: Prometheus scrape and readiness.

use std::sync::PoisonError;

use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::{StatusCode, header};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::metrics::REGISTRY;

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Readiness flips once `ready` is cancelled, which happens after the
/// declared state has been replayed into the allocator.
#[derive(Clone)]
pub(crate) struct OpsState {
    ready: CancellationToken,
}

impl OpsState {
    pub fn new(ready: CancellationToken) -> Self {
        Self { ready }
    }
}

pub(crate) fn router(state: OpsState) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn scrape() -> Response {
    let mut body = String::new();
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = prometheus_client::encoding::text::encode(&mut body, &registry) {
        error!(%e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response()
}

async fn readyz(State(state): State<OpsState>) -> (StatusCode, &'static str) {
    if state.ready.is_cancelled() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "restoring allocations")
    }
}
