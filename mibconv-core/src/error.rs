//! Error types for mibconv-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for mibconv operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Path has the wrong suffix or does not exist.
    #[error("file name error: {0}")]
    FileName(String),

    /// Header label not part of the Medipix HDR schema.
    #[error("unknown header field: {0:?}")]
    UnknownField(String),

    /// A scale carries units that cannot be converted to the requested regime.
    #[error("units {from:?} cannot be converted to {to:?}")]
    UnitConversion { from: String, to: String },

    /// Camera name without a known physical pixel size.
    #[error("unknown camera: {0:?}")]
    UnknownCamera(String),

    /// Calibration table row or file could not be interpreted.
    #[error("invalid calibration table: {0}")]
    InvalidTable(String),

    /// Axis or shape bookkeeping went inconsistent.
    #[error("signal error: {0}")]
    Signal(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure to resolve a single physical quantity against the calibration table.
///
/// These never abort a bulk calibration pass; they are collected per quantity
/// in a [`crate::calibration::CalibrationReport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    /// The nominal value of the quantity itself is undefined, so no table
    /// query can be formed.
    #[error("nominal value of {0:?} is undefined, cannot query calibration table")]
    UndefinedNominal(String),
}
