//! Medipix HDR instrument header parsing and storage.
//!
//! The companion `.hdr` file written by the Merlin readout is a flat
//! key-value text file. The first and last lines are boundary markers; every
//! interior line reads `"<field label>: <value>"`. The field set is a closed
//! schema: unknown labels are a hard parse failure.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The closed set of field labels in a Medipix HDR file, in file order.
///
/// Labels are case- and wording-sensitive and must match the readout software
/// exactly, parenthetical hints included.
pub const HEADER_LABELS: [&str; 27] = [
    "Time and Date Stamp (day, mnth, yr, hr, min, s)",
    "Chip ID",
    "Chip Type (Medipix 3.0, Medipix 3.1, Medipix 3RX)",
    "Assembly Size (NX1, 2X2)",
    "Chip Mode  (SPM, CSM, CM, CSCM)",
    "Counter Depth (number)",
    "Gain",
    "Active Counters",
    "Thresholds (keV)",
    "DACs",
    "bpc File",
    "DAC File",
    "Gap Fill Mode",
    "Flat Field File",
    "Dead Time File",
    "Acquisition Type (Normal, Th_scan, Config)",
    "Frames in Acquisition (Number)",
    "Frames per Trigger (Number)",
    "Trigger Start (Positive, Negative, Internal)",
    "Trigger Stop (Positive, Negative, Internal)",
    "Sensor Bias (V)",
    "Sensor Polarity (Positive, Negative)",
    "Temperature (C)",
    "Humidity (%)",
    "Medipix Clock (MHz)",
    "Readout System",
    "Software Version",
];

fn label_index(label: &str) -> Option<usize> {
    HEADER_LABELS.iter().position(|&l| l == label)
}

/// Parsed content of one Medipix HDR file.
///
/// Values are kept as the raw strings from the file; typed accessors parse on
/// demand. Parsed once per raw file and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderStore {
    path: Option<PathBuf>,
    values: Vec<String>,
}

impl HeaderStore {
    /// Creates an empty header with all fields unset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: None,
            values: vec![String::new(); HEADER_LABELS.len()],
        }
    }

    /// Parses a `.hdr` file.
    ///
    /// # Errors
    /// Returns [`Error::FileName`] if the path does not exist or does not end
    /// in `.hdr`, and [`Error::UnknownField`] if an interior line carries a
    /// label outside the schema.
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("hdr") {
            return Err(Error::FileName(format!(
                "{} is not a HDR file",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(Error::FileName(format!(
                "HDR file {} does not exist",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();

        let mut header = Self::new();
        header.path = Some(path.to_path_buf());
        // First and last lines are boundary markers.
        for line in lines.iter().skip(1).take(lines.len().saturating_sub(2)) {
            let (label, value) = line.split_once(':').ok_or_else(|| {
                Error::UnknownField(line.trim().to_string())
            })?;
            let label = label.trim();
            let index = label_index(label)
                .ok_or_else(|| Error::UnknownField(label.to_string()))?;
            header.values[index] = value.trim().to_string();
        }
        Ok(header)
    }

    /// Returns the source path, if the header was parsed from a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the raw value of a field by its exact label.
    ///
    /// # Errors
    /// Returns [`Error::UnknownField`] if the label is not in the schema.
    pub fn field(&self, label: &str) -> Result<&str> {
        let index =
            label_index(label).ok_or_else(|| Error::UnknownField(label.to_string()))?;
        Ok(&self.values[index])
    }

    /// Number of frames per trigger, if set and numeric.
    #[must_use]
    pub fn frames_per_trigger(&self) -> Option<u64> {
        self.values[17].trim().parse().ok()
    }

    /// Number of frames in the acquisition, if set and numeric.
    #[must_use]
    pub fn frames_in_acquisition(&self) -> Option<u64> {
        self.values[16].trim().parse().ok()
    }

    /// Counter depth in bits, if set and numeric.
    #[must_use]
    pub fn counter_depth(&self) -> Option<u32> {
        self.values[5].trim().parse().ok()
    }

    /// Timestamp string recorded by the readout software.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.values[0]
    }

    /// Total snapshot of all fields, keyed by label, for metadata embedding.
    #[must_use]
    pub fn as_mapping(&self) -> BTreeMap<String, String> {
        HEADER_LABELS
            .iter()
            .zip(&self.values)
            .map(|(label, value)| ((*label).to_string(), value.clone()))
            .collect()
    }

    /// Resets all fields to empty and decouples from the source path.
    pub fn clear(&mut self) {
        self.path = None;
        for value in &mut self.values {
            value.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_hdr(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "{body}").unwrap();
        path
    }

    const VALID_HDR: &str = "HDR\n\
        Time and Date Stamp (day, mnth, yr, hr, min, s): 26/05/2020 11:31:04\n\
        Chip ID: W529_F5\n\
        Counter Depth (number): 12\n\
        Frames in Acquisition (Number): 4\n\
        Frames per Trigger (Number): 2\n\
        Sensor Bias (V): 120 V\n\
        End\t\n";

    #[test]
    fn test_parse_valid_header() {
        let dir = TempDir::new().unwrap();
        let path = write_hdr(&dir, "scan.hdr", VALID_HDR);
        let header = HeaderStore::parse(&path).unwrap();

        assert_eq!(header.field("Chip ID").unwrap(), "W529_F5");
        assert_eq!(header.frames_per_trigger(), Some(2));
        assert_eq!(header.frames_in_acquisition(), Some(4));
        assert_eq!(header.counter_depth(), Some(12));
        assert_eq!(header.timestamp(), "26/05/2020 11:31:04");
        // Fields absent from the file stay empty but are still in the schema.
        assert_eq!(header.field("Gain").unwrap(), "");
    }

    #[test]
    fn test_value_with_colons_is_kept_whole() {
        let dir = TempDir::new().unwrap();
        let path = write_hdr(&dir, "scan.hdr", VALID_HDR);
        let header = HeaderStore::parse(&path).unwrap();
        // Split happens on the first colon only.
        assert_eq!(header.timestamp(), "26/05/2020 11:31:04");
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_hdr(&dir, "scan.hdr", "HDR\nNot A Field: 3\nEnd\t\n");
        match HeaderStore::parse(&path) {
            Err(Error::UnknownField(label)) => assert_eq!(label, "Not A Field"),
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_suffix_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_hdr(&dir, "scan.txt", VALID_HDR);
        assert!(matches!(
            HeaderStore::parse(&path),
            Err(Error::FileName(_))
        ));
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(matches!(
            HeaderStore::parse("/nonexistent/scan.hdr"),
            Err(Error::FileName(_))
        ));
    }

    #[test]
    fn test_field_lookup_rejects_unknown_label() {
        let header = HeaderStore::new();
        assert!(matches!(
            header.field("Chip"),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn test_as_mapping_is_total() {
        let header = HeaderStore::new();
        assert_eq!(header.as_mapping().len(), HEADER_LABELS.len());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = write_hdr(&dir, "scan.hdr", VALID_HDR);
        let mut header = HeaderStore::parse(&path).unwrap();
        header.clear();
        assert!(header.path().is_none());
        assert_eq!(header.field("Chip ID").unwrap(), "");
    }
}
