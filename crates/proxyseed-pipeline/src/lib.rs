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

//! Asynchronous request-processing pipeline.
//!
//! Layout: `rate_limit.rs` (sliding-window admission), `queue.rs` (bounded
//! task queue and worker pool), `executor.rs` (stage driver), `service.rs`
//! (submit/status/cancel/recover), `error.rs`.

pub mod error;
pub mod executor;
pub mod queue;
pub mod rate_limit;
pub mod service;

pub use error::{LimitScope, QueueError, RateLimited, ServiceError, ServiceResult};
pub use executor::{PipelineExecutor, RunOutcome};
pub use queue::{TaskQueue, WorkerPool};
pub use rate_limit::SlidingWindowRateLimiter;
pub use service::{RecoveryReport, RequestService};
