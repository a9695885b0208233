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

//! Typed service configuration sourced from `PROXYSEED_*` environment variables.
//!
//! Layout: `model.rs` (typed sections), `defaults.rs` (baseline values),
//! `loader.rs` (environment mapping), `validate.rs` (parsing and cross-field
//! checks), `error.rs` (`ConfigError`).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, ServiceConfigLoader};
pub use model::{
    FetcherSettings, LoggingSettings, QueueSettings, RateLimitSettings, RequestSettings,
    SecuritySettings, ServerSettings, ServiceConfig, StorageSettings, TorrentSettings,
};
