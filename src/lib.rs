//! mzgf: a blocked, randomly seekable gzip-compatible container
//!
//! # Overview
//!
//! MZGF stores an arbitrary byte stream as a gzip file that is also a
//! random-access container. The data is deflated in bounded blocks with a
//! full flush at every block boundary, a block index is appended as
//! zero-payload gzip members carried in `FEXTRA` header subfields, and a
//! fixed-size end-of-file member points back at the index. Any standard
//! gunzip recovers the original bytes end-to-end, while [`MzgfReader`] can
//! jump straight into any block.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::io::Cursor;
//! use mzgf::{MzgfReader, MzgfWriter};
//!
//! # fn main() -> mzgf::Result<()> {
//! // Compress a stream into a .mgz container
//! let mut writer = MzgfWriter::new();
//! let mut dst = std::fs::File::create("data.mgz")?;
//! writer.deflate(&mut Cursor::new(b"hello world".to_vec()), &mut dst)?;
//!
//! // Reopen it and read from an arbitrary uncompressed offset
//! let mut reader = MzgfReader::open("data.mgz")?;
//! reader.useek(6)?;
//! let mut buf = [0u8; 5];
//! let n = reader.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"world");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`format`]: on-disk layout (member framing, virtual offsets, the index)
//! - [`io`]: [`MzgfWriter`] and [`MzgfReader`]
//! - [`error`]: error type and crate-wide [`Result`]

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod io;

// Re-export commonly used types
pub use error::{MzgfError, Result};
pub use format::{BlockIndexEntry, VirtualOffset, MZGF_VERSION, UBLOCK_SIZE};
pub use io::{MzgfReader, MzgfWriter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
