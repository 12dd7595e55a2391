//! End-to-end pipeline tests over synthesized MIB/HDR fixtures.

use approx::assert_relative_eq;
use mibconv_convert::{Chunks, Converter, Coordinate, Error, LoadOutcome, VbfRegion};
use mibconv_core::{CalibrationLabel, CalibrationRecord, CalibrationTable, DType};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

const HEADER_BYTES: usize = 64;

/// One MIB frame: a 64-byte `MQ1` header plus a big-endian u16 payload.
fn u16_frame(sequence: usize, ndx: usize, ndy: usize, values: &[u16]) -> Vec<u8> {
    assert_eq!(values.len(), ndx * ndy);
    let mut frame = format!(
        "MQ1,{sequence},{HEADER_BYTES},1,{ndx},{ndy},U16,1x1,2020-05-26 11:31:04.000,0.001,"
    )
    .into_bytes();
    frame.resize(HEADER_BYTES, 0);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    frame
}

fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    path
}

/// Writes `frames` constant-valued 8x8 frames (frame i holds the value i).
fn write_mib(dir: &TempDir, name: &str, frames: usize) -> PathBuf {
    let mut content = Vec::new();
    for i in 0..frames {
        #[allow(clippy::cast_possible_truncation)]
        let values = vec![i as u16; 64];
        content.extend_from_slice(&u16_frame(i + 1, 8, 8, &values));
    }
    write_file(dir, name, &content)
}

fn write_hdr(dir: &TempDir, name: &str, frames: usize, per_trigger: usize) {
    let body = format!(
        "HDR\n\
         Time and Date Stamp (day, mnth, yr, hr, min, s): 26/05/2020 11:31:04\n\
         Chip ID: W529_F5\n\
         Counter Depth (number): 12\n\
         Frames in Acquisition (Number): {frames}\n\
         Frames per Trigger (Number): {per_trigger}\n\
         End\t\n"
    );
    write_file(dir, name, body.as_bytes());
}

fn diff_record() -> CalibrationRecord {
    CalibrationRecord {
        label: CalibrationLabel::Diff,
        quantity: "Cameralength".to_string(),
        nominal_value: 30.0,
        actual_value: 33.2,
        units: "cm".to_string(),
        scale: 0.0123,
        acceleration_voltage: 200_000.0,
        camera: "Merlin".to_string(),
        microscope: "2100F".to_string(),
        mode: "NBD".to_string(),
        mag_mode: String::new(),
        alpha: f64::NAN,
        spot: f64::NAN,
        date: chrono::NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
    }
}

#[test]
fn test_single_frame_scenario() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "single.mib", 1);
    write_hdr(&dir, "single.hdr", 1, 1);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    assert_eq!(converter.read().unwrap(), LoadOutcome::WithHeader);

    // A single-frame stack unwraps to a bare 2-D image.
    assert_eq!(converter.dimension().unwrap(), 2);
    assert_eq!(converter.frames().unwrap(), 1);
    assert_eq!(converter.ndx().unwrap(), 8);
    assert!(matches!(
        converter.scan_extent(),
        Err(Error::Dimension(_))
    ));
    // Reshape is a no-op warning, not an error.
    converter.reshape(None, None).unwrap();
    assert_eq!(converter.dimension().unwrap(), 2);
}

#[test]
fn test_reshape_inference_from_frames_per_trigger() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);
    write_hdr(&dir, "scan.hdr", 4, 2);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    assert_eq!(converter.read().unwrap(), LoadOutcome::WithHeader);
    assert_eq!(converter.dimension().unwrap(), 3);

    converter.reshape(None, None).unwrap();
    assert_eq!(converter.dimension().unwrap(), 4);
    assert_eq!((converter.nx().unwrap(), converter.ny().unwrap()), (2, 2));

    // Reshape keeps the original frame order: frame i holds the value i.
    let signal = converter.signal().unwrap();
    for y in 0..2 {
        for x in 0..2 {
            assert_relative_eq!(signal.data()[[y, x, 0, 0]], (y * 2 + x) as f64);
        }
    }
}

#[test]
fn test_reshape_square_raster_without_header() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    assert_eq!(converter.read().unwrap(), LoadOutcome::MissingHeader);

    converter.reshape(None, None).unwrap();
    assert_eq!((converter.nx().unwrap(), converter.ny().unwrap()), (2, 2));
}

#[test]
fn test_reshape_geometry_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();

    assert!(matches!(
        converter.reshape(Some(3), None),
        Err(Error::Reshape(_))
    ));
    assert!(matches!(
        converter.reshape(Some(-2), Some(2)),
        Err(Error::Reshape(_))
    ));
    assert!(matches!(
        converter.reshape(Some(4), Some(4)),
        Err(Error::Reshape(_))
    ));
    // Validation happens before mutation: the stack is still flat.
    assert_eq!(converter.dimension().unwrap(), 3);
    // Deriving the missing dimension from the frame count works.
    converter.reshape(Some(4), None).unwrap();
    assert_eq!((converter.nx().unwrap(), converter.ny().unwrap()), (4, 1));
}

#[test]
fn test_read_rollback_on_structural_failure() {
    let dir = TempDir::new().unwrap();
    let good = write_mib(&dir, "good.mib", 4);
    // Truncated payload: not a whole number of frames.
    let mut corrupt = u16_frame(1, 8, 8, &[0u16; 64]);
    corrupt.truncate(corrupt.len() - 5);
    let bad = write_file(&dir, "bad.mib", &corrupt);
    write_hdr(&dir, "good.hdr", 4, 2);

    let mut converter = Converter::new();
    converter.set_data_path(&good).unwrap();
    converter.read().unwrap();
    assert!(converter.signal().is_some());
    assert!(converter.header().is_some());

    converter.set_data_path(&bad).unwrap();
    assert!(matches!(converter.read(), Err(Error::Read(_))));
    // Atomicity: both the stack and the header are gone.
    assert!(converter.signal().is_none());
    assert!(converter.header().is_none());
    assert!(matches!(converter.frames(), Err(Error::NotSet(_))));
}

#[test]
fn test_operations_require_loaded_state() {
    let mut converter = Converter::new();
    assert!(matches!(converter.read(), Err(Error::NotSet(_))));
    assert!(matches!(
        converter.reshape(None, None),
        Err(Error::NotSet(_))
    ));
    assert!(matches!(
        converter.downsample(DType::U8),
        Err(Error::NotSet(_))
    ));
    assert!(matches!(converter.calibrate(), Err(Error::NotSet(_))));
    assert!(matches!(
        converter.set_data_path("/tmp/scan.txt"),
        Err(Error::FileName(_))
    ));
}

#[test]
fn test_apply_calibrations_with_empty_table_records_undefined() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);
    write_hdr(&dir, "scan.hdr", 4, 2);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    converter.reshape(None, None).unwrap();
    converter.set_calibration_table(CalibrationTable::new());
    converter.apply_calibrations().unwrap();

    let signal = converter.signal().unwrap();
    for axis in signal.signal_axes() {
        assert_relative_eq!(axis.scale, 1.0);
        assert_eq!(axis.units, "undefined");
    }
    // Provenance: the raw header and full parameter set are embedded.
    assert!(signal.original_metadata().contains_key("Parameters"));
    assert!(signal.original_metadata().contains_key("Header"));
}

#[test]
fn test_apply_calibrations_with_matching_table() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);
    write_hdr(&dir, "scan.hdr", 4, 2);

    let mut table = CalibrationTable::new();
    table.push(diff_record());

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    converter.reshape(None, None).unwrap();
    converter.microscope_mut().set_acceleration_voltage(200.0);
    converter.microscope_mut().set_camera("Merlin");
    converter.microscope_mut().set_microscope("2100F");
    converter.microscope_mut().set_nominal_cameralength(30.0);
    converter.set_calibration_table(table);
    converter.apply_calibrations().unwrap();

    let signal = converter.signal().unwrap();
    for axis in signal.signal_axes() {
        assert_relative_eq!(axis.scale, 0.0123);
        assert_eq!(axis.units, "1/Å");
    }
    assert_eq!(
        signal
            .get_metadata("Acquisition_instrument.TEM.camera_length")
            .unwrap(),
        &serde_json::json!(33.2)
    );
    assert_eq!(
        signal
            .get_metadata("Acquisition_instrument.TEM.beam_energy")
            .unwrap(),
        &serde_json::json!(200.0)
    );
}

#[test]
fn test_rechunk_and_downsample() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    converter.reshape(Some(2), Some(2)).unwrap();

    converter.rechunk(&Chunks::Uniform(1)).unwrap();
    assert_eq!(
        converter.signal().unwrap().chunks(),
        Some(&[1, 1, 1, 1][..])
    );
    converter.rechunk(&Chunks::PerDim(vec![1, 1, 8, 8])).unwrap();
    assert!(matches!(
        converter.rechunk(&Chunks::PerDim(vec![1, 8, 8])),
        Err(Error::InvalidArgument(_))
    ));

    converter.downsample(DType::U8).unwrap();
    assert_eq!(converter.signal().unwrap().dtype(), DType::U8);
    assert_relative_eq!(converter.max_value().unwrap(), 3.0);
}

#[test]
fn test_vbf_requires_scan_data() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "single.mib", 1);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();

    let region = VbfRegion::Box {
        center_x: Coordinate::Pixel(4),
        center_y: Coordinate::Pixel(4),
        width: Coordinate::Pixel(2),
    };
    assert!(matches!(
        converter.get_vbf(&region),
        Err(Error::Dimension(_))
    ));
}

#[test]
fn test_vbf_image_per_scan_position() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    converter.reshape(Some(2), Some(2)).unwrap();

    let region = VbfRegion::Box {
        center_x: Coordinate::Pixel(4),
        center_y: Coordinate::Pixel(4),
        width: Coordinate::Pixel(2),
    };
    let image = converter.get_vbf(&region).unwrap();
    assert_eq!(image.dim(), (2, 2));
    // Constant frames: each sum is frame value x 9 window pixels.
    assert_relative_eq!(image[[0, 0]], 0.0);
    assert_relative_eq!(image[[1, 1]], 27.0);
}

#[test]
fn test_prepare_blockfile_contract() {
    let dir = TempDir::new().unwrap();
    let single = write_mib(&dir, "single.mib", 1);
    let scan = write_mib(&dir, "scan.mib", 4);

    let mut converter = Converter::new();
    converter.set_data_path(&single).unwrap();
    converter.read().unwrap();
    assert!(matches!(
        converter.prepare_blockfile(true, true, 55.0),
        Err(Error::Dimension(_))
    ));

    converter.set_data_path(&scan).unwrap();
    converter.read().unwrap();
    converter.reshape(Some(2), Some(2)).unwrap();
    let prepared = converter.prepare_blockfile(true, true, 55.0).unwrap();

    assert_eq!(prepared.dtype(), DType::U8);
    assert_relative_eq!(prepared.max_value(), 255.0);
    for axis in prepared.signal_axes() {
        assert_relative_eq!(axis.scale, 55.0 * 1e4);
        assert_eq!(axis.units, "cm");
    }
    // Deep copy: the live signal keeps its values and dtype.
    assert_eq!(converter.signal().unwrap().dtype(), DType::U16);
    assert_relative_eq!(converter.max_value().unwrap(), 3.0);
}

#[test]
fn test_write_blockfile_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_mib(&dir, "scan.mib", 4);
    let out = dir.path().join("scan.blo");

    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    converter.reshape(Some(2), Some(2)).unwrap();
    converter.write(&out, false).unwrap();

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[..4], b"BLO1");
    // Second write without overwrite is wrapped as a write error.
    assert!(matches!(converter.write(&out, false), Err(Error::Write(_))));
    converter.write(&out, true).unwrap();
}

#[test]
fn test_write_error_taxonomy() {
    let dir = TempDir::new().unwrap();
    let converter = Converter::new();
    assert!(matches!(
        converter.write(dir.path().join("out.blo"), false),
        Err(Error::Write(_))
    ));

    let path = write_mib(&dir, "scan.mib", 4);
    let mut converter = Converter::new();
    converter.set_data_path(&path).unwrap();
    converter.read().unwrap();
    assert!(matches!(
        converter.write(dir.path().join("out.xyz"), false),
        Err(Error::FileName(_))
    ));
}
