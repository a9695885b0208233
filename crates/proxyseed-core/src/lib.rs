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

//! Request model, lifecycle state machine, and collaborator interfaces.
//!
//! Layout: `state.rs` (status enum and transition table), `model/` (records
//! and DTOs), `service/` (async collaborator traits), `error.rs` (taxonomy).

pub mod error;
pub mod model;
pub mod service;
pub mod state;

pub use error::{
    BoxError, FetchError, PackageError, SeederError, StageError, StoreError, TransitionError,
};
pub use model::{
    ContentSummary, FetchRequest, FetchResult, FetchSpec, HttpMethod, Identity, Package,
    PackageSummary, SENSITIVE_HEADERS, SeedState, SeedStats,
};
pub use service::{Fetcher, Packager, RecordMutator, RequestStore, Seeder};
pub use state::{RequestStatus, progress};
