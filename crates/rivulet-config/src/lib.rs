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

//! File-backed configuration for the torrent session.
//!
//! Layout: `model.rs` (the YAML document), `loader.rs` (locating and parsing the file),
//! `validate.rs` (hard validation and guard-rail normalisation), `service.rs`
//! (`ConfigPolicySource` and its polling `ConfigWatcher`).

pub mod error;
pub mod loader;
pub mod model;
pub mod service;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_ENV, DEFAULT_CONFIG_PATH, LoadedConfig, config_path, load, parse};
pub use model::{AppConfig, LogSection, StorageConfig};
pub use service::{ConfigPolicySource, ConfigWatcher, DEFAULT_POLL_INTERVAL};
pub use validate::{normalize_settings, validate_config};
