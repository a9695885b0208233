//! HTTP surface modules (router, handlers, middleware).

/// Authentication middleware and client identity resolution.
pub mod auth;
/// Shared constants and header names.
pub mod constants;
/// Problem response helpers and error types.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Fetch request handlers.
pub mod requests;
/// Router construction and server host.
pub mod router;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
