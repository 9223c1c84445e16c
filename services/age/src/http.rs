//! HTTP API of the age service.
//!
//! - `GET /ages/:person_id` - derived age of a person
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus metrics

use crate::domain::DerivedAge;
use crate::store::DerivedAgeStore;
use age_saga_contracts::{ContractError, PersonId};
use age_saga_runtime::metrics::MetricsExporter;
use age_saga_web::{AppError, WebResult, handlers, server};
use axum::extract::{OriginalUri, Path, State};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Derived age records
    pub store: Arc<dyn DerivedAgeStore>,
}

/// Build the router with every route and the observability layers.
pub fn build_router(state: AppState, exporter: MetricsExporter) -> Router {
    let router = Router::new()
        .route("/ages/:person_id", get(get_age))
        .route("/health", get(handlers::health_check))
        .route("/metrics", handlers::metrics_route(exporter))
        .with_state(state);

    server::with_observability(router)
}

/// `GET /ages/:person_id`
///
/// # Errors
///
/// 400 for a malformed id, 404 when no age was computed for the person,
/// 503 or 500 when the store fails.
pub async fn get_age(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> WebResult<Json<DerivedAge>> {
    let person_id: PersonId = raw_id
        .parse()
        .map_err(|e: ContractError| AppError::bad_request(e.to_string()).at(uri.path()))?;

    let record = state
        .store
        .find(person_id)
        .await
        .map_err(|e| AppError::from(e).at(uri.path()))?
        .ok_or_else(|| AppError::not_found("Age for person", person_id).at(uri.path()))?;

    Ok(Json(record))
}
