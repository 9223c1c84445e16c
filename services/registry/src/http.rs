//! HTTP API of the registry service.
//!
//! - `POST /persons` - create a person and start the age saga
//! - `GET /persons/:id` - a person with its saga status and age
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus metrics

use crate::domain::{NewPerson, Person};
use crate::service::{RegistryError, RegistryService};
use age_saga_contracts::{ContractError, PersonId};
use age_saga_runtime::metrics::MetricsExporter;
use age_saga_web::{AppError, CorrelationId, WebResult, handlers, server};
use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry operations
    pub registry: RegistryService,
}

/// Build the router with every route and the observability layers.
pub fn build_router(state: AppState, exporter: MetricsExporter) -> Router {
    let router = Router::new()
        .route("/persons", post(create_person))
        .route("/persons/:id", get(get_person))
        .route("/health", get(handlers::health_check))
        .route("/metrics", handlers::metrics_route(exporter))
        .with_state(state);

    server::with_observability(router)
}

fn into_app_error(err: RegistryError) -> AppError {
    match err {
        RegistryError::Validation(e) => AppError::validation(e.to_string()),
        RegistryError::Store(e) => AppError::from(e),
        RegistryError::PublishFailed { .. } => {
            AppError::unavailable(err.to_string()).with_source(err)
        }
    }
}

/// `POST /persons`
///
/// Responds 201 with the `PENDING` person and a `Location` header.
///
/// # Errors
///
/// 400 for a malformed body, 422 for missing or blank fields, 503 when the
/// person was saved but the age computation could not be requested.
pub async fn create_person(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    OriginalUri(uri): OriginalUri,
    body: Result<Json<NewPerson>, JsonRejection>,
) -> WebResult<impl IntoResponse> {
    let Json(request) = body.map_err(|e| AppError::bad_request(e.body_text()).at(uri.path()))?;

    let person = state
        .registry
        .create(request, Some(correlation_id.to_string()))
        .await
        .map_err(|e| into_app_error(e).at(uri.path()))?;

    let location = format!("/persons/{}", person.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(person),
    ))
}

/// `GET /persons/:id`
///
/// # Errors
///
/// 400 for a malformed id, 404 for an unknown person, 503 or 500 when the
/// store fails.
pub async fn get_person(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> WebResult<Json<Person>> {
    let id: PersonId = raw_id
        .parse()
        .map_err(|e: ContractError| AppError::bad_request(e.to_string()).at(uri.path()))?;

    let person = state
        .registry
        .find(id)
        .await
        .map_err(|e| into_app_error(e).at(uri.path()))?
        .ok_or_else(|| AppError::not_found("Person", id).at(uri.path()))?;

    Ok(Json(person))
}
