//! On-disk trace-file format: packet headers, the file-scope header, the
//! compression extension, the changed-data package, the portability table,
//! and the metadata document.
//!
//! This crate only describes the *shape* of bytes on disk. It knows nothing
//! about sockets, compression codecs, or page guards; those live in
//! `gapitrace-stream`, `gapitrace-compress`, and `gapitrace-shadow`
//! respectively, and are wired together by `gapitrace-capture`/`gapitrace-replay`.

mod error;
mod header;
mod metadata;
mod pageguard;
mod portability;

pub use error::*;
pub use header::*;
pub use metadata::*;
pub use pageguard::*;
pub use portability::*;
