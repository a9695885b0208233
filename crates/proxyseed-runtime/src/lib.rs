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

//! Persistence for request records.
//!
//! Both stores keep one async mutex per record so a read-modify-write on one
//! request never blocks updates to another. The map lock is only held long
//! enough to look up or insert a slot.

mod file;
mod memory;

pub use file::FileRequestStore;
pub use memory::MemoryRequestStore;

use std::cmp::Ordering;

use proxyseed_core::FetchRequest;

fn oldest_first(left: &FetchRequest, right: &FetchRequest) -> Ordering {
    left.created_at
        .cmp(&right.created_at)
        .then_with(|| left.id.cmp(&right.id))
}
