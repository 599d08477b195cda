//! HTTP API and process wiring for the tracker service.
//!
//! - [`config`]: environment configuration
//! - [`app`]: axum router, request validation and response mapping
//! - [`app::services`]: backend selection and service start-up
//! - [`shutdown`]: signal handling

pub mod app;
pub mod config;
pub mod shutdown;
