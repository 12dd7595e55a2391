//! Conversion pipeline error types.

use thiserror::Error;

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Conversion pipeline error types.
///
/// Structural errors (read, reshape, write) abort the operation with state
/// either fully rolled back (read) or unchanged (reshape/write validate
/// before mutating). Per-quantity calibration failures never surface here;
/// they are collected in a [`mibconv_core::CalibrationReport`].
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted before its required precursor state exists.
    #[error("not set: {0}")]
    NotSet(String),

    /// Raw frame stack failed to load; state was reset.
    #[error("read error: {0}")]
    Read(String),

    /// Requested or inferred scan geometry inconsistent with the frame count.
    #[error("reshape error: {0}")]
    Reshape(String),

    /// Operation requires a dimensionality the current data does not have.
    #[error("dimension error: {0}")]
    Dimension(String),

    /// Data unsuitable for block-file export.
    #[error("blockfile error: {0}")]
    Blockfile(String),

    /// Export failed; wraps the underlying I/O or format error.
    #[error("write error: {0}")]
    Write(String),

    /// Supplied path has the wrong suffix or does not exist.
    #[error("file name error: {0}")]
    FileName(String),

    /// Argument outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
