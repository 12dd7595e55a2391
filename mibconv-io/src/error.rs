//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Path has the wrong suffix or does not exist.
    #[error("file name error: {0}")]
    FileName(String),

    /// Refusing to clobber an existing output file.
    #[error("output file already exists: {0}")]
    AlreadyExists(String),

    /// The signal cannot be represented in the requested format.
    #[error("dimension error: {0}")]
    Dimension(String),

    #[cfg(feature = "hdf5")]
    /// HDF5 library error.
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),
}
