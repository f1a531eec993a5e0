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

//! Rivulet application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (collaborator wiring and the run loop), `error.rs` (bootstrap
//! failures).

/// Application bootstrap and shutdown.
pub mod bootstrap;
/// Application-level errors.
pub mod error;

pub use bootstrap::{App, run_app};
pub use error::{AppError, AppResult};
