//! Metainfo and magnet URI codecs.

mod magnet;
mod metainfo;

pub use magnet::{make_magnet, parse_magnet};
pub use metainfo::decode_metainfo;
