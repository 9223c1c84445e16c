//! # Age Service
//!
//! Consumes `PersonCreated`, computes the person's age, keeps one
//! [`DerivedAge`](domain::DerivedAge) per person and reports the result as
//! `AgeComputed` (`DONE` with the age, or `FAILED`).
//!
//! Redelivered events are safe: the derived record is inserted only if
//! absent, and a replay republishes the stored result.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod postgres;
pub mod processor;
pub mod store;

pub use app::Application;
pub use config::Config;
pub use processor::PersonCreatedHandler;
