#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! HTTP API for submitting fetch requests and retrieving their torrents.
//!
//! # Design
//! - Handlers stay thin: validation, rate limiting, and persistence live in
//!   the request service; this crate maps its outcomes onto RFC 9457 problems.
//! - Request routes sit behind the identity middleware; health and metrics do not.
//! - Every route is traced and counted per matched path and status.

pub mod http;
pub mod state;

pub use http::router::ApiServer;
pub use state::ApiState;
