//! Engine implementations of [`rivulet_torrent_core::NativeSession`].
//!
//! Only the in-process engine ships here; bindings to a real torrent library plug in
//! through the same trait.

mod memory;

pub use memory::{MemoryProbe, MemorySession};
