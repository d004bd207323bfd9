//! NTFS desktop search core.
//!
//! Walks the Master File Table of an NTFS volume through volume-level
//! ioctls to build an in-memory file index, keeps it current by tailing the
//! USN change journal, answers substring and metadata queries against the
//! flat index, and runs a staged, parallel duplicate detector over the
//! indexed files. The GUI shell, RPC bridge, and persistence all live
//! outside this crate; the exported surface is [`SearchEngine`] for Rust
//! callers and the `winseek_*` procedural ABI in [`ffi`] for everything
//! else.
//!
//! Nothing is persisted: the index lives and dies with the process.

mod drives;
mod duplicates;
mod engine;
mod error;
pub mod ffi;
mod index;
mod mft;
mod resolve;
mod search;
mod types;
pub mod usn;
mod watcher;
mod winutil;

pub use engine::SearchEngine;
pub use error::{Result, ScanError};
pub use search::SearchRequest;
pub use types::{
    extension_lower_of, BasicFileRow, DriveRow, DuplicateFileRow, DuplicateGroupRow,
    DuplicateScanStatus, Frn, IndexedFile, JournalPosition, Node, ScanSnapshot, SearchRow,
};
