//! Error types for mzgf

use thiserror::Error;

/// Result type alias for mzgf operations
pub type Result<T> = std::result::Result<T, MzgfError>;

/// Error types that can occur while reading or writing MZGF containers
#[derive(Debug, Error)]
pub enum MzgfError {
    /// Underlying file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Gzip magic bytes or compression method mismatch
    #[error("not in gzip format")]
    NotGzip,

    /// Valid gzip, but the opening member carries no "MZ" subfield
    #[error("not in MZGF format")]
    NotMzgzip,

    /// "MZ" subfield present but the version byte is not recognized
    #[error("incompatible MZGF version: {0}")]
    BadVersion(u8),

    /// Member header was cut short
    #[error("read incomplete gzip header")]
    TruncatedHeader,

    /// Missing or malformed MZGF metadata
    #[error("MZGF format problem: {0}")]
    BadFormat(String),

    /// The DEFLATE engine reported a hard error while compressing
    #[error("deflate error: {0}")]
    Deflate(String),

    /// The DEFLATE engine reported a hard error while decompressing
    #[error("inflate error: {0}")]
    Inflate(String),

    /// Virtual seek target is not an indexed block boundary
    #[error("no block boundary at virtual offset {0:#x}")]
    InvalidOffset(i64),
}
