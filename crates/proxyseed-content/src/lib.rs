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

//! Content-addressable object store keyed by SHA-256 digests.
//!
//! Layout: `digest.rs` (digest newtype and sharding), `store.rs`
//! (`ContentStore` with idempotent writes and sidecar metadata), `error.rs`.

pub mod digest;
pub mod error;
pub mod store;

pub use digest::ContentDigest;
pub use error::{ContentError, ContentResult};
pub use store::{ContentMeta, ContentStats, ContentStore, StoredObject};
