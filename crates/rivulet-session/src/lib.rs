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

//! Coordination core of a torrent session.
//!
//! Layout: `coordinator.rs` (public command surface and queries), `worker.rs` (the single
//! task that owns the native engine), `lifecycle.rs` (engine state machine), `registry.rs`
//! (live tasks), `settings.rs` (settings cell and change dispatch), `projector.rs`
//! (observable snapshots), `watch.rs` (watch-directory service), `stream.rs` (HTTP
//! streaming listener), `engine/` (in-process engine), `store.rs` and `fs.rs`
//! (disk-backed collaborators).

mod command;
pub mod coordinator;
pub mod engine;
pub mod fs;
pub mod lifecycle;
pub mod projector;
pub mod registry;
pub mod settings;
pub mod store;
pub mod stream;
mod watch;
mod worker;

pub use coordinator::{CoordinatorConfig, PendingMetadata, SessionCoordinator, SessionDeps};
pub use engine::{MemoryProbe, MemorySession};
pub use fs::LocalFileSystem;
pub use lifecycle::{EngineLifecycle, EngineState};
pub use projector::{InfoSnapshotProjector, Observation};
pub use registry::{ManualOverride, TaskRegistry, TorrentTask};
pub use settings::{SettingHandler, SettingsCell, SettingsDispatch, SettingsPatch};
pub use store::FileRepository;
pub use stream::make_stream_url;
