//! Memory-mapped Merlin MIB frame reading.
//!
//! A MIB file is a flat sequence of frames. Every frame starts with an ASCII
//! header (`MQ1,<seq>,<header bytes>,<chips>,<ndx>,<ndy>,<dtype>,...`)
//! followed by the big-endian pixel payload. The header declares its own
//! size, so the stride is uniform across the file and frames decode
//! independently.

use crate::{Error, Result};
use memmap2::Mmap;
use mibconv_core::DType;
use ndarray::Array3;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file into
/// memory.
pub struct MappedFileReader {
    mmap: Mmap,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }
}

/// Parsed fields of one per-frame MIB header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u64,
    /// Declared header size in bytes; also the payload offset inside a frame.
    pub header_bytes: usize,
    pub chips: usize,
    pub ndx: usize,
    pub ndy: usize,
    /// Raw dtype code from the header (`U01`, `U08`, `U16`, `U32`).
    pub dtype_code: String,
    pub dtype: DType,
}

impl FrameHeader {
    /// Parses the ASCII header at the start of a frame.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for anything that is not a `MQ1`
    /// header with numeric geometry fields and a known dtype code.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        // Only the first seven comma-separated fields matter, and they always
        // sit within the first 128 bytes. Split over raw bytes: with a short
        // header the window runs into the pixel payload, which need not be
        // valid UTF-8.
        let window = &bytes[..bytes.len().min(128)];
        let fields: Vec<&str> = window
            .split(|&b| b == b',')
            .take(7)
            .map(std::str::from_utf8)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::InvalidFormat("frame header is not ASCII".to_string()))?;
        if fields.first() != Some(&"MQ1") {
            return Err(Error::InvalidFormat(
                "frame header does not start with MQ1".to_string(),
            ));
        }
        if fields.len() < 7 {
            return Err(Error::InvalidFormat(format!(
                "frame header has {} fields, expected at least 7",
                fields.len()
            )));
        }
        let numeric = |index: usize, name: &str| -> Result<u64> {
            fields[index].trim().parse().map_err(|_| {
                Error::InvalidFormat(format!("bad {name} field {:?}", fields[index]))
            })
        };
        let dtype_code = fields[6].trim().to_string();
        let dtype = match dtype_code.as_str() {
            "U01" | "U08" => DType::U8,
            "U16" => DType::U16,
            "U32" => DType::U32,
            other => {
                return Err(Error::InvalidFormat(format!("unknown dtype code {other:?}")))
            }
        };
        Ok(Self {
            sequence: numeric(1, "sequence")?,
            header_bytes: usize::try_from(numeric(2, "header size")?)
                .map_err(|_| Error::InvalidFormat("header size overflows".to_string()))?,
            chips: numeric(3, "chip count")? as usize,
            ndx: numeric(4, "ndx")? as usize,
            ndy: numeric(5, "ndy")? as usize,
            dtype_code,
            dtype,
        })
    }

    /// Size of one full frame (header plus payload) in bytes.
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        self.header_bytes + self.payload_bytes()
    }

    /// Size of the pixel payload in bytes.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.ndx * self.ndy * self.dtype.bytes()
    }
}

/// A decoded stack of detector frames, frame-major `(frame, ndy, ndx)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    pub data: Array3<f64>,
    pub dtype: DType,
    pub dtype_code: String,
}

impl FrameStack {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.data.shape()[0]
    }

    #[must_use]
    pub fn ndy(&self) -> usize {
        self.data.shape()[1]
    }

    #[must_use]
    pub fn ndx(&self) -> usize {
        self.data.shape()[2]
    }
}

/// Path of the companion `.hdr` file next to a `.mib` path.
#[must_use]
pub fn companion_hdr_path<P: AsRef<Path>>(mib_path: P) -> PathBuf {
    mib_path.as_ref().with_extension("hdr")
}

/// Loads a MIB file into a frame stack.
///
/// Frames are decoded in parallel; the first frame's header fixes the
/// geometry and every frame must share it for the uniform stride to divide
/// the file.
///
/// # Errors
/// Returns [`Error::FileName`] for a wrong suffix or missing file and
/// [`Error::InvalidFormat`] for malformed headers or a file length that is
/// not a whole number of frames.
pub fn load_mib<P: AsRef<Path>>(path: P) -> Result<FrameStack> {
    let path = path.as_ref();
    if path.extension().and_then(|e| e.to_str()) != Some("mib") {
        return Err(Error::FileName(format!(
            "{} is not a MIB file",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(Error::FileName(format!(
            "MIB file {} does not exist",
            path.display()
        )));
    }

    let reader = MappedFileReader::open(path)?;
    let bytes = reader.as_bytes();
    let header = FrameHeader::parse(bytes)?;
    let frame_bytes = header.frame_bytes();
    if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
        return Err(Error::InvalidFormat(format!(
            "file length {} is not a whole number of {frame_bytes}-byte frames",
            bytes.len()
        )));
    }
    let nframes = bytes.len() / frame_bytes;
    log::debug!(
        "loading {nframes} {}x{} {} frames from {}",
        header.ndx,
        header.ndy,
        header.dtype_code,
        path.display()
    );

    let pixels_per_frame = header.ndx * header.ndy;
    let mut data = vec![0.0f64; nframes * pixels_per_frame];
    data.par_chunks_mut(pixels_per_frame)
        .enumerate()
        .try_for_each(|(index, out)| -> Result<()> {
            let start = index * frame_bytes;
            let frame = &bytes[start..start + frame_bytes];
            // Each frame carries its own header; re-validate the magic so a
            // stride mismatch fails loudly instead of decoding garbage.
            if !frame.starts_with(b"MQ1,") {
                return Err(Error::InvalidFormat(format!(
                    "frame {index} does not start with a MQ1 header"
                )));
            }
            decode_payload(&frame[header.header_bytes..], header.dtype, out);
            Ok(())
        })?;

    let data = Array3::from_shape_vec((nframes, header.ndy, header.ndx), data)
        .map_err(|e| Error::InvalidFormat(format!("frame stack shape: {e}")))?;
    Ok(FrameStack {
        data,
        dtype: header.dtype,
        dtype_code: header.dtype_code,
    })
}

fn decode_payload(payload: &[u8], dtype: DType, out: &mut [f64]) {
    match dtype {
        DType::U8 => {
            for (value, byte) in out.iter_mut().zip(payload) {
                *value = f64::from(*byte);
            }
        }
        DType::U16 => {
            for (value, chunk) in out.iter_mut().zip(payload.chunks_exact(2)) {
                *value = f64::from(u16::from_be_bytes([chunk[0], chunk[1]]));
            }
        }
        DType::U32 => {
            for (value, chunk) in out.iter_mut().zip(payload.chunks_exact(4)) {
                *value = f64::from(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        // Payloads wider than 32 bits do not occur in MIB files; the f64
        // carriers only exist for in-memory processing.
        DType::F32 | DType::F64 => {
            for (value, chunk) in out.iter_mut().zip(payload.chunks_exact(8)) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                *value = f64::from_bits(u64::from_be_bytes(raw));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::TempDir;

    pub(crate) const TEST_HEADER_BYTES: usize = 64;

    /// Builds one MIB frame: a 64-byte header plus a big-endian u16 payload.
    pub(crate) fn u16_frame(sequence: usize, ndx: usize, ndy: usize, values: &[u16]) -> Vec<u8> {
        assert_eq!(values.len(), ndx * ndy);
        let mut header = format!(
            "MQ1,{sequence},{TEST_HEADER_BYTES},1,{ndx},{ndy},U16,1x1,2020-05-26 11:31:04.000,0.001,"
        )
        .into_bytes();
        header.resize(TEST_HEADER_BYTES, 0);
        for value in values {
            header.extend_from_slice(&value.to_be_bytes());
        }
        header
    }

    pub(crate) fn write_mib(dir: &TempDir, name: &str, frames: &[Vec<u8>]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for frame in frames {
            file.write_all(frame).unwrap();
        }
        path
    }

    #[test]
    fn test_header_parse() {
        let frame = u16_frame(1, 4, 4, &[0u16; 16]);
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.sequence, 1);
        assert_eq!(header.header_bytes, TEST_HEADER_BYTES);
        assert_eq!(header.ndx, 4);
        assert_eq!(header.ndy, 4);
        assert_eq!(header.dtype, DType::U16);
        assert_eq!(header.frame_bytes(), TEST_HEADER_BYTES + 32);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        assert!(matches!(
            FrameHeader::parse(b"MQ2,1,64,1,4,4,U16,"),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_header_rejects_unknown_dtype() {
        assert!(matches!(
            FrameHeader::parse(b"MQ1,1,64,1,4,4,R64,"),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_load_two_frames() {
        let dir = TempDir::new().unwrap();
        let first: Vec<u16> = (0..16).collect();
        let second: Vec<u16> = (16..32).collect();
        let path = write_mib(
            &dir,
            "scan.mib",
            &[u16_frame(1, 4, 4, &first), u16_frame(2, 4, 4, &second)],
        );

        let stack = load_mib(&path).unwrap();
        assert_eq!(stack.frames(), 2);
        assert_eq!(stack.ndy(), 4);
        assert_eq!(stack.ndx(), 4);
        assert_eq!(stack.dtype, DType::U16);
        assert_relative_eq!(stack.data[[0, 0, 0]], 0.0);
        assert_relative_eq!(stack.data[[0, 0, 3]], 3.0);
        assert_relative_eq!(stack.data[[1, 3, 3]], 31.0);
    }

    #[test]
    fn test_non_utf8_payload_in_parse_window() {
        // With a 64-byte header the 128-byte parse window overlaps the
        // payload; pixel values that are not valid UTF-8 must not reject the
        // frame.
        let dir = TempDir::new().unwrap();
        let values = vec![50_000u16; 16];
        let path = write_mib(&dir, "scan.mib", &[u16_frame(1, 4, 4, &values)]);

        let stack = load_mib(&path).unwrap();
        assert_eq!(stack.frames(), 1);
        assert_relative_eq!(stack.data[[0, 0, 0]], 50_000.0);
    }

    #[test]
    fn test_wrong_suffix_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_mib(&dir, "scan.dat", &[u16_frame(1, 4, 4, &[0u16; 16])]);
        assert!(matches!(load_mib(&path), Err(Error::FileName(_))));
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(matches!(
            load_mib("/nonexistent/scan.mib"),
            Err(Error::FileName(_))
        ));
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut frame = u16_frame(1, 4, 4, &(0..16).collect::<Vec<u16>>());
        frame.truncate(frame.len() - 3);
        let path = write_mib(&dir, "scan.mib", &[frame]);
        assert!(matches!(load_mib(&path), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_companion_hdr_path() {
        assert_eq!(
            companion_hdr_path("/data/scan.mib"),
            PathBuf::from("/data/scan.hdr")
        );
    }
}
