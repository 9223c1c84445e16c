//! # Registry Service
//!
//! Owns person records. Creating a person stores it as `PENDING` and
//! publishes `PersonCreated`; the `AgeComputed` reply from the age service
//! is merged into the record by the [`reconciler`].
//!
//! ```text
//! POST /persons ─► store PENDING ─► PersonCreated ─► (age service)
//!                                                        │
//! GET /persons/:id ◄─ DONE/FAILED ◄─ reconcile ◄─ AgeComputed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod postgres;
pub mod reconciler;
pub mod service;
pub mod store;

pub use app::Application;
pub use config::Config;
pub use reconciler::{AgeComputedHandler, Reconciliation, reconcile};
pub use service::{RegistryError, RegistryService};
