//! mibconv-core: Core types for Merlin/Medipix acquisition metadata.
//!
//! This crate provides the instrument header schema, microscope parameter
//! bookkeeping, diffraction-scale unit algebra, the calibration table with
//! its resolver, and the in-memory signal container the conversion pipeline
//! operates on.
//!

pub mod calibration;
pub mod error;
pub mod header;
pub mod microscope;
pub mod parameter;
pub mod scale;
pub mod signal;

pub use calibration::{
    CalibrationEntry, CalibrationLabel, CalibrationRecord, CalibrationReport,
    CalibrationResolver, CalibrationTable,
};
pub use error::{CalibrationError, Error, Result};
pub use header::{HeaderStore, HEADER_LABELS};
pub use microscope::MicroscopeParameters;
pub use parameter::{CalibratedParameter, Parameter, ParameterRef, Value};
pub use scale::{
    camera_pixel_size_um, wavelength, DiffractionScale, DiffractionUnits, MERLIN_PIXEL_SIZE_UM,
    US1000_PIXEL_SIZE_UM,
};
pub use signal::{Axis, DType, Signal, SignalKind};
