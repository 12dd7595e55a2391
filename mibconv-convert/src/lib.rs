//! mibconv-convert: The calibration and reshape/conversion pipeline.
//!
//! This crate turns raw Merlin frame streams plus their companion headers and
//! a calibration table into calibrated, metadata-rich signals, and derives
//! virtual bright-field images and block-file exports from them.
//!

pub mod converter;
mod error;
pub mod vbf;

pub use converter::{Chunks, Converter, LoadOutcome};
pub use error::{Error, Result};
pub use vbf::{virtual_bright_field, Coordinate, VbfRegion};
