//! HDF5 signal output.
//!
//! Layout: one `entry` group holding the `data` dataset, one `axis{i}` group
//! per data dimension carrying the axis calibration as attributes, and the
//! two metadata trees JSON-encoded as string attributes on the entry group.

use crate::{Error, Result};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, Group};
use mibconv_core::{Axis, Signal};
use std::path::Path;
use std::str::FromStr;

/// Writes a signal to an HDF5 file.
///
/// # Errors
/// Returns [`Error::AlreadyExists`] when the target exists and `overwrite` is
/// false, and an HDF5 error if the file or datasets cannot be created.
pub fn write_signal_hdf5<P: AsRef<Path>>(path: P, signal: &Signal, overwrite: bool) -> Result<()> {
    let path = path.as_ref();
    if path.exists() && !overwrite {
        return Err(Error::AlreadyExists(path.display().to_string()));
    }

    let file = File::create(path)?;
    set_attr_str_file(&file, "mibconv_format_version", "0.1")?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "signal_kind", &signal.kind().to_string())?;
    set_attr_str_group(&entry, "dtype", &signal.dtype().to_string())?;
    set_attr_str_group(
        &entry,
        "metadata",
        &serde_json::Value::Object(signal.metadata().clone()).to_string(),
    )?;
    set_attr_str_group(
        &entry,
        "original_metadata",
        &serde_json::Value::Object(signal.original_metadata().clone()).to_string(),
    )?;

    let data = create_data_dataset(&entry, signal)?;
    data.write(signal.data().view())?;

    for (index, axis) in signal.axes().iter().enumerate() {
        write_axis_group(&entry, index, axis)?;
    }
    Ok(())
}

fn create_data_dataset(entry: &Group, signal: &Signal) -> Result<Dataset> {
    let mut builder = entry
        .new_dataset::<f64>()
        .shape(signal.shape())
        .deflate(1)
        .shuffle();
    if let Some(chunks) = signal.chunks() {
        builder = builder.chunk(chunks);
    }
    Ok(builder.create("data")?)
}

fn write_axis_group(entry: &Group, index: usize, axis: &Axis) -> Result<()> {
    let group = entry.create_group(&format!("axis{index}"))?;
    set_attr_str_group(&group, "name", &axis.name)?;
    set_attr_str_group(&group, "units", &axis.units)?;
    group
        .new_attr::<f64>()
        .create("scale")?
        .write_scalar(&axis.scale)?;
    group
        .new_attr::<f64>()
        .create("offset")?
        .write_scalar(&axis.offset)?;
    group
        .new_attr::<u64>()
        .create("size")?
        .write_scalar(&(axis.size as u64))?;
    group
        .new_attr::<u8>()
        .create("navigate")?
        .write_scalar(&u8::from(axis.navigate))?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibconv_core::{DType, SignalKind};
    use ndarray::ArrayD;
    use tempfile::TempDir;

    fn signal() -> Signal {
        let data = ArrayD::<f64>::zeros(vec![2, 2, 4, 4]);
        let axes = vec![
            Axis::uncalibrated("y", 2, true),
            Axis::uncalibrated("x", 2, true),
            Axis::uncalibrated("ky", 4, false),
            Axis::uncalibrated("kx", 4, false),
        ];
        let mut signal = Signal::new(data, axes, SignalKind::Diffraction, DType::U16).unwrap();
        signal.set_metadata("General.title", serde_json::json!("test"));
        signal
    }

    #[test]
    fn test_write_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.hspy");
        write_signal_hdf5(&path, &signal(), false).unwrap();

        let file = File::open(&path).unwrap();
        let entry = file.group("entry").unwrap();
        let data = entry.dataset("data").unwrap();
        assert_eq!(data.shape(), vec![2, 2, 4, 4]);

        let axis0 = entry.group("axis0").unwrap();
        let navigate: u8 = axis0.attr("navigate").unwrap().read_scalar().unwrap();
        assert_eq!(navigate, 1);

        let metadata: VarLenUnicode = entry.attr("metadata").unwrap().read_scalar().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(parsed["General"]["title"], "test");
    }

    #[test]
    fn test_overwrite_guard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.hspy");
        write_signal_hdf5(&path, &signal(), false).unwrap();
        assert!(matches!(
            write_signal_hdf5(&path, &signal(), false),
            Err(Error::AlreadyExists(_))
        ));
        write_signal_hdf5(&path, &signal(), true).unwrap();
    }
}
