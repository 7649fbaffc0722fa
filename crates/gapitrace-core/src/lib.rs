//! Common cursor, buffer, and `Encode`/`Decode` traits shared by every codec in the
//! trace pipeline: packet headers, the trace-file header, the compression extension,
//! the portability table, and the metadata document all build on these primitives.

#[macro_use]
mod macros;

mod cursor;
mod decode;
mod encode;
mod error;
mod padding;
mod write_buf;

pub use self::cursor::*;
pub use self::decode::*;
pub use self::encode::*;
pub use self::error::*;
pub use self::padding::*;
pub use self::write_buf::*;
