//! mibconv-io: Memory-mapped file I/O for mibconv.
//!
//! This crate reads Merlin MIB frame stacks via memmap2 and writes the
//! converted outputs as block files or HDF5 containers.
//!

pub mod blockfile;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod mib;

pub use blockfile::{write_blockfile, BLOCKFILE_HEADER_BYTES, BLOCKFILE_MAGIC};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::write_signal_hdf5;
pub use mib::{companion_hdr_path, load_mib, FrameHeader, FrameStack, MappedFileReader};
