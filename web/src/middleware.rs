//! Correlation id propagation.
//!
//! [`propagate_correlation_id`] reads `X-Correlation-ID` from the request or
//! mints a UUID v4, makes it available to handlers through the
//! [`CorrelationId`] extractor and echoes it on the response. The registry
//! copies it into the `PersonCreated` metadata and the age service carries
//! it over to `AgeComputed`, so one id follows a person through the saga.
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn};
//! use age_saga_web::middleware::propagate_correlation_id;
//!
//! let app = Router::new()
//!     .route("/persons", post(create_person))
//!     .layer(from_fn(propagate_correlation_id));
//! ```

use crate::extractors::CorrelationId;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Attach a [`CorrelationId`] to the request and echo it on the response.
///
/// The rest of the request runs inside an `http_request` span tagged with
/// the id.
pub async fn propagate_correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_headers(request.headers());
    request.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "http_request",
        %correlation_id,
        method = %request.method(),
        path = request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::middleware::from_fn;
    use axum::routing::get;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn echo(correlation_id: CorrelationId) -> String {
        correlation_id.to_string()
    }

    /// Send `GET /echo` with an optional correlation header; returns the
    /// echoed header and the id the handler saw.
    async fn round_trip(header: Option<&str>) -> (String, String) {
        let app = Router::new()
            .route("/echo", get(echo))
            .layer(from_fn(propagate_correlation_id));

        let mut request = axum::http::Request::get("/echo");
        if let Some(value) = header {
            request = request.header(CORRELATION_ID_HEADER, value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let echoed = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation header")
            .to_str()
            .expect("ascii")
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (echoed, String::from_utf8(body.to_vec()).expect("utf8"))
    }

    #[tokio::test]
    async fn incoming_id_is_kept() {
        let id = Uuid::new_v4().to_string();

        let (echoed, seen) = round_trip(Some(&id)).await;

        assert_eq!(echoed, id);
        assert_eq!(seen, id);
    }

    #[tokio::test]
    async fn missing_id_is_minted_once() {
        let (echoed, seen) = round_trip(None).await;

        assert!(Uuid::parse_str(&echoed).is_ok());
        assert_eq!(echoed, seen);
    }

    #[tokio::test]
    async fn malformed_id_is_replaced() {
        let (echoed, seen) = round_trip(Some("person-42")).await;

        assert_ne!(echoed, "person-42");
        assert!(Uuid::parse_str(&echoed).is_ok());
        assert_eq!(echoed, seen);
    }
}
