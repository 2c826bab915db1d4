use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tract_income::error::AppError;
use tract_income::lookup::{
    AddressInput, BatchEntry, BatchOptions, BatchOrchestrator, BatchReport, LookupOptions,
    ResultRecord,
};

#[derive(Debug, Deserialize)]
pub(crate) struct LookupRequest {
    pub(crate) street: String,
    pub(crate) city: String,
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) zip: Option<String>,
    #[serde(default)]
    pub(crate) fuzzy: Option<bool>,
}

/// A batch item is either a `"Street, City State ZIP"` line or structured parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum BatchAddress {
    Line(String),
    Structured(AddressInput),
}

impl From<BatchAddress> for BatchEntry {
    fn from(address: BatchAddress) -> Self {
        match address {
            BatchAddress::Line(line) => BatchEntry::from_line(&line),
            BatchAddress::Structured(input) => BatchEntry::from(input),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchRequest {
    pub(crate) addresses: Vec<BatchAddress>,
    #[serde(default)]
    pub(crate) dry_run: bool,
}

pub(crate) fn router() -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/lookup", post(lookup_endpoint))
        .route("/api/v1/batch", post(batch_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready =
        state.readiness.load(Ordering::Relaxed) && state.reference.loaded().is_some();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready", "reference": state.pipeline.reference_source() })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn lookup_endpoint(
    Extension(state): Extension<AppState>,
    Json(payload): Json<LookupRequest>,
) -> Result<Json<ResultRecord>, AppError> {
    let LookupRequest {
        street,
        city,
        state: region,
        zip,
        fuzzy,
    } = payload;

    for (field, value) in [("street", &street), ("city", &city), ("state", &region)] {
        if value.trim().is_empty() {
            return Err(AppError::InvalidInput(format!("{field} must not be blank")));
        }
    }

    let input = AddressInput::new(street, city, region, zip);
    let options = LookupOptions {
        fuzzy: fuzzy.unwrap_or(state.batch.lookup.fuzzy),
    };
    Ok(Json(state.pipeline.lookup(&input, options).await))
}

pub(crate) async fn batch_endpoint(
    Extension(state): Extension<AppState>,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchReport>, AppError> {
    if payload.addresses.is_empty() {
        return Err(AppError::InvalidInput(
            "addresses must contain at least one entry".to_string(),
        ));
    }
    if payload.addresses.len() > state.max_batch_addresses {
        return Err(AppError::InvalidInput(format!(
            "at most {} addresses per request, got {}",
            state.max_batch_addresses,
            payload.addresses.len()
        )));
    }

    let options = BatchOptions {
        dry_run: payload.dry_run,
        ..state.batch.clone()
    };
    let entries = payload.addresses.into_iter().map(BatchEntry::from).collect();
    let report = BatchOrchestrator::new(state.pipeline.clone(), options)
        .run(entries)
        .await;
    Ok(Json(report))
}
