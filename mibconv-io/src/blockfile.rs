//! Block-file (`.blo`) writing for scanning-diffraction stacks.
//!
//! The block file is a fixed little-endian header followed by the frames as
//! raw `u8` rows. The payload is one byte per pixel, so the caller rescales
//! intensities into 0..=255 before writing.

use crate::{Error, Result};
use mibconv_core::Signal;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic bytes at the start of every block file.
pub const BLOCKFILE_MAGIC: &[u8; 4] = b"BLO1";

/// Header size in bytes: magic + version + 4 x u32 dims + 4 x f64 scales.
pub const BLOCKFILE_HEADER_BYTES: usize = 4 + 4 + 16 + 32;

/// Writes a 4-D `(scan y, scan x, detector y, detector x)` signal as a block
/// file.
///
/// Header layout, little-endian:
/// - magic `BLO1`
/// - format version (u32)
/// - scan y, scan x, detector y, detector x (u32 each)
/// - per-axis scale in the same order (f64 each)
///
/// # Errors
/// Returns [`Error::FileName`] for a non-`.blo` path, [`Error::AlreadyExists`]
/// when the target exists and `overwrite` is false, and [`Error::Dimension`]
/// for signals that are not 4-D.
pub fn write_blockfile<P: AsRef<Path>>(path: P, signal: &Signal, overwrite: bool) -> Result<()> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) != Some("blo") {
        return Err(Error::FileName(format!(
            "{} is not a block file path",
            path.display()
        )));
    }
    if path.exists() && !overwrite {
        return Err(Error::AlreadyExists(path.display().to_string()));
    }
    if signal.ndim() != 4 {
        return Err(Error::Dimension(format!(
            "block files hold 4-D scan stacks, got {}-D data",
            signal.ndim()
        )));
    }

    let shape = signal.shape();
    let mut dims = [0u32; 4];
    for (dim, &extent) in dims.iter_mut().zip(shape) {
        *dim = u32::try_from(extent)
            .map_err(|_| Error::Dimension(format!("dimension {extent} overflows the header")))?;
    }

    log::debug!(
        "writing {}x{} scan of {}x{} frames to {}",
        shape[0],
        shape[1],
        shape[2],
        shape[3],
        path.display()
    );

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(BLOCKFILE_MAGIC)?;
    writer.write_all(&1u32.to_le_bytes())?;
    for dim in dims {
        writer.write_all(&dim.to_le_bytes())?;
    }
    for axis in signal.axes() {
        writer.write_all(&axis.scale.to_le_bytes())?;
    }

    // Row-major iteration matches the (sy, sx, dy, dx) header convention.
    for &value in signal.data() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let byte = value as u8;
        writer.write_all(&[byte])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibconv_core::{Axis, DType, SignalKind};
    use ndarray::{ArrayD, Dimension};
    use tempfile::TempDir;

    fn scan_signal(shape: &[usize]) -> Signal {
        let data = ArrayD::from_shape_fn(shape.to_vec(), |idx| {
            idx.slice().iter().sum::<usize>() as f64
        });
        let axes = shape
            .iter()
            .enumerate()
            .map(|(i, &size)| Axis::uncalibrated(&format!("axis{i}"), size, i < shape.len() - 2))
            .collect();
        Signal::new(data, axes, SignalKind::Diffraction, DType::U8).unwrap()
    }

    #[test]
    fn test_write_header_and_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.blo");
        let signal = scan_signal(&[2, 2, 4, 4]);

        write_blockfile(&path, &signal, false).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), BLOCKFILE_HEADER_BYTES + 2 * 2 * 4 * 4);
        assert_eq!(&bytes[..4], BLOCKFILE_MAGIC);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 4);
        // First payload byte is the (0,0,0,0) element.
        assert_eq!(bytes[BLOCKFILE_HEADER_BYTES], 0);
        // Last element is the index sum 2+2+4+4 - 4 = 8.
        assert_eq!(*bytes.last().unwrap(), 8);
    }

    #[test]
    fn test_rejects_non_4d_signals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.blo");
        let signal = scan_signal(&[4, 4]);
        assert!(matches!(
            write_blockfile(&path, &signal, false),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn test_overwrite_guard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.blo");
        let signal = scan_signal(&[1, 1, 2, 2]);

        write_blockfile(&path, &signal, false).unwrap();
        assert!(matches!(
            write_blockfile(&path, &signal, false),
            Err(Error::AlreadyExists(_))
        ));
        write_blockfile(&path, &signal, true).unwrap();
    }

    #[test]
    fn test_rejects_wrong_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.bin");
        let signal = scan_signal(&[1, 1, 2, 2]);
        assert!(matches!(
            write_blockfile(&path, &signal, false),
            Err(Error::FileName(_))
        ));
    }
}
