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

//! Concrete pipeline collaborators: upstream HTTP fetching, BitTorrent
//! packaging, and the seeding registry.
//!
//! Layout: `fetcher.rs` (reqwest client), `bencode.rs` (metainfo codec),
//! `packager.rs` (content store + `.torrent` writer), `seeder.rs` (registry
//! with resume records).

pub mod bencode;
pub mod fetcher;
pub mod packager;
pub mod seeder;

pub use bencode::{BencodeError, Value};
pub use fetcher::{HttpFetcher, mime_allowed};
pub use packager::{TorrentPackager, infohash_of, magnet_link, read_infohash};
pub use seeder::{RegistrySeeder, ResumeRecord};
