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

//! Shared test doubles used across integration suites.
//! Layout: fixtures.rs (synthetic `.torrent` builder), repository.rs (in-memory
//! repository), policy.rs (controllable policy source).

pub mod fixtures;
pub mod policy;
pub mod repository;

pub use fixtures::TorrentFixture;
pub use policy::ManualPolicy;
pub use repository::MemoryRepository;
