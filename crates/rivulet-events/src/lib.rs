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

//! Process-wide event fan-out for the Rivulet session layer.
//!
//! Layout: `payloads.rs` (event taxonomy and envelope), `topics.rs` (event kinds and
//! filters), `listener.rs` (listener contract and registration handles), `routing.rs`
//! (the `EventBus` itself), `error.rs` (bus errors).

pub mod error;
pub mod listener;
pub mod payloads;
pub mod routing;
pub mod topics;

pub use error::{EventBusError, EventBusResult};
pub use listener::{EventListener, Filtered, ListenerError, RegistrationHandle, RegistrationId};
pub use payloads::{Event, EventEnvelope, EventId, SessionStats, TorrentId, TorrentStateCode};
pub use routing::{EventBus, EventStream};
pub use topics::{EventFilter, EventKind};
