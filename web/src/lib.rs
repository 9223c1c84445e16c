//! Axum plumbing shared by the saga services.
//!
//! Each service builds its own router; this crate supplies the pieces both
//! routers have in common:
//!
//! - [`AppError`]: handler error rendered as
//!   `{timestamp, status, error, message, path}`
//! - [`CorrelationId`] extractor and the middleware propagating it
//! - `GET /health` and `GET /metrics` handlers
//! - [`server::serve`] with graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! use age_saga_web::{handlers, server};
//! use axum::{Router, routing::get};
//!
//! let app = server::with_observability(
//!     Router::new()
//!         .route("/health", get(handlers::health_check))
//!         .route("/metrics", handlers::metrics_route(exporter)),
//! );
//! server::serve(listener, app, shutdown_signal()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod server;

// Re-export key types for convenience
pub use error::{AppError, ErrorBody};
pub use extractors::CorrelationId;
pub use middleware::{CORRELATION_ID_HEADER, propagate_correlation_id};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
