//! Calibration table lookup and bulk parameter resolution.
//!
//! The table is an append-only record of past calibration measurements. A
//! resolution query conjoins a quantity-specific condition (e.g. nominal
//! cameralength) with the base acquisition settings (voltage, camera,
//! microscope). Zero matches is not an error: unmeasured configurations
//! resolve to NaN, which is a representable state throughout the pipeline.
//! When several rows match, the most recently dated row wins; matches are
//! explicitly sorted by date before selection, with row order breaking ties.

use crate::microscope::MicroscopeParameters;
use crate::parameter::Value;
use crate::{CalibrationError, Error, Result};
use chrono::NaiveDate;
use log::warn;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Row category in the calibration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationLabel {
    /// Imaging magnification calibration.
    Img,
    /// Diffraction cameralength calibration.
    Diff,
    /// Scan step calibration.
    Step,
    /// Precession (rocking) angle calibration.
    Prec,
    /// Spotsize calibration.
    Spot,
}

impl FromStr for CalibrationLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IMG" => Ok(CalibrationLabel::Img),
            "DIFF" => Ok(CalibrationLabel::Diff),
            "STEP" => Ok(CalibrationLabel::Step),
            "PREC" => Ok(CalibrationLabel::Prec),
            "SPOT" => Ok(CalibrationLabel::Spot),
            other => Err(Error::InvalidTable(format!(
                "unknown calibration label {other:?}"
            ))),
        }
    }
}

impl fmt::Display for CalibrationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationLabel::Img => "IMG",
            CalibrationLabel::Diff => "DIFF",
            CalibrationLabel::Step => "STEP",
            CalibrationLabel::Prec => "PREC",
            CalibrationLabel::Spot => "SPOT",
        };
        write!(f, "{s}")
    }
}

/// One calibration measurement.
///
/// Nominal settings identify the acquisition configuration the measurement
/// was taken under; absent numeric settings are NaN and absent text settings
/// empty strings, both of which never match a query.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub label: CalibrationLabel,
    /// Physical quantity the row calibrates (`"Cameralength"`, `"Step X"`, ...).
    pub quantity: String,
    pub nominal_value: f64,
    pub actual_value: f64,
    pub units: String,
    /// Pixel scale measured together with the value: nm/px for IMG rows,
    /// 1/angstrom/px for DIFF rows, NaN elsewhere.
    pub scale: f64,
    pub acceleration_voltage: f64,
    pub camera: String,
    pub microscope: String,
    pub mode: String,
    pub mag_mode: String,
    pub alpha: f64,
    pub spot: f64,
    pub date: NaiveDate,
}

impl CalibrationRecord {
    fn quantity_for(label: CalibrationLabel, direction: &str) -> String {
        match label {
            CalibrationLabel::Img => "Magnification".to_string(),
            CalibrationLabel::Diff => "Cameralength".to_string(),
            CalibrationLabel::Step => format!("Step {}", direction.to_uppercase()),
            CalibrationLabel::Prec => "Rocking angle".to_string(),
            CalibrationLabel::Spot => "Spotsize".to_string(),
        }
    }

    fn units_for(label: CalibrationLabel) -> &'static str {
        match label {
            CalibrationLabel::Img => "",
            CalibrationLabel::Diff => "cm",
            CalibrationLabel::Step | CalibrationLabel::Spot => "nm",
            CalibrationLabel::Prec => "deg",
        }
    }
}

/// Append-only table of calibration measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    records: Vec<CalibrationRecord>,
}

/// Column headers of the delimited calibration-table format.
const COLUMN_LABEL: &str = "Label";
const COLUMN_VOLTAGE: &str = "Acceleration Voltage (V)";
const COLUMN_CAMERA: &str = "Camera";
const COLUMN_MICROSCOPE: &str = "Microscope";
const COLUMN_MODE: &str = "Mode";
const COLUMN_ALPHA: &str = "Alpha";
const COLUMN_MAG_MODE: &str = "Mag mode";
const COLUMN_SPOT: &str = "Spot";
const COLUMN_DATE: &str = "Date";
const COLUMN_DIRECTION: &str = "Direction";

impl CalibrationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn push(&mut self, record: CalibrationRecord) {
        self.records.push(record);
    }

    /// All records in row order.
    #[must_use]
    pub fn records(&self) -> &[CalibrationRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Loads a table from a delimited text file with headers.
    ///
    /// # Errors
    /// Returns [`Error::Io`] / [`Error::Csv`] on read failures and
    /// [`Error::InvalidTable`] for missing columns, unknown labels or
    /// malformed dates.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Loads a table from any delimited text source with headers.
    ///
    /// Rows are routed on the `Label` column to reconstruct the correct
    /// calibration-record type with its label-specific value columns.
    ///
    /// # Errors
    /// See [`CalibrationTable::from_csv_path`].
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let column = |name: &str| -> Result<usize> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                Error::InvalidTable(format!("missing column {name:?}"))
            })
        };
        // Label-specific nominal/actual columns, matched by prefix so units
        // annotations in the header stay free-form.
        let value_columns = |label: CalibrationLabel| -> Result<(usize, usize)> {
            let (nominal, actual) = match label {
                CalibrationLabel::Img => ("Nominal Magnification", "Magnification"),
                CalibrationLabel::Diff => ("Nominal Cameralength", "Cameralength"),
                CalibrationLabel::Step => ("Nominal Step", "Step"),
                CalibrationLabel::Prec => ("Nominal Rocking angle", "Rocking angle"),
                CalibrationLabel::Spot => ("Nominal Spotsize", "Spotsize"),
            };
            let find = |prefix: &str| -> Result<usize> {
                headers
                    .iter()
                    .position(|h| {
                        h.starts_with(prefix)
                            && (prefix.starts_with("Nominal") || !h.starts_with("Nominal"))
                    })
                    .ok_or_else(|| Error::InvalidTable(format!("missing column {prefix:?}")))
            };
            Ok((find(nominal)?, find(actual)?))
        };

        let label_col = column(COLUMN_LABEL)?;
        let date_col = column(COLUMN_DATE)?;
        let voltage_col = column(COLUMN_VOLTAGE)?;
        let camera_col = column(COLUMN_CAMERA)?;
        let microscope_col = column(COLUMN_MICROSCOPE)?;
        let mode_col = column(COLUMN_MODE)?;
        let alpha_col = column(COLUMN_ALPHA)?;
        let mag_mode_col = column(COLUMN_MAG_MODE)?;
        let spot_col = column(COLUMN_SPOT)?;
        let direction_col = headers.iter().position(|h| h == COLUMN_DIRECTION);
        let scale_col = headers.iter().position(|h| h.starts_with("Scale"));

        let get = |record: &csv::StringRecord, index: usize| -> String {
            record.get(index).unwrap_or("").to_string()
        };
        let get_number = |record: &csv::StringRecord, index: usize| -> f64 {
            record
                .get(index)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(f64::NAN)
        };

        let mut table = Self::new();
        for row in csv_reader.records() {
            let row = row?;
            let label: CalibrationLabel = get(&row, label_col).parse()?;
            let (nominal_col, actual_col) = value_columns(label)?;
            let date_text = get(&row, date_col);
            let date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
                Error::InvalidTable(format!("bad date {date_text:?}: {e}"))
            })?;
            let direction = direction_col.map_or(String::new(), |c| get(&row, c));
            table.push(CalibrationRecord {
                label,
                quantity: CalibrationRecord::quantity_for(label, &direction),
                nominal_value: get_number(&row, nominal_col),
                actual_value: get_number(&row, actual_col),
                units: CalibrationRecord::units_for(label).to_string(),
                scale: scale_col.map_or(f64::NAN, |c| get_number(&row, c)),
                acceleration_voltage: get_number(&row, voltage_col),
                camera: get(&row, camera_col),
                microscope: get(&row, microscope_col),
                mode: get(&row, mode_col),
                mag_mode: get(&row, mag_mode_col),
                alpha: get_number(&row, alpha_col),
                spot: get_number(&row, spot_col),
                date,
            });
        }
        Ok(table)
    }
}

fn number_matches(field: f64, wanted: f64) -> bool {
    // NaN on either side is unsatisfiable, matching nothing.
    if field.is_nan() || wanted.is_nan() {
        return false;
    }
    (field - wanted).abs() <= 1e-9 * wanted.abs().max(1.0)
}

fn text_matches(field: &str, wanted: &Value) -> bool {
    if !wanted.is_defined() {
        return false;
    }
    wanted.as_text().is_some_and(|w| w == field)
}

/// Outcome of resolving one physical quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEntry {
    pub quantity: String,
    /// Resolved value (NaN for unmeasured configurations) or the reason the
    /// query could not be formed.
    pub outcome: std::result::Result<f64, CalibrationError>,
}

/// Aggregated per-quantity outcomes of a bulk calibration pass.
///
/// A failure resolving one quantity never aborts the pass; partial
/// calibration is an expected outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationReport {
    entries: Vec<CalibrationEntry>,
}

impl CalibrationReport {
    #[must_use]
    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.entries
    }

    /// Quantities that resolved to a defined (non-NaN) value.
    #[must_use]
    pub fn resolved(&self) -> Vec<&CalibrationEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Ok(v) if !v.is_nan()))
            .collect()
    }

    /// Quantities whose query could not be formed.
    #[must_use]
    pub fn failed(&self) -> Vec<&CalibrationEntry> {
        self.entries.iter().filter(|e| e.outcome.is_err()).collect()
    }

    fn record(&mut self, quantity: &str, outcome: std::result::Result<f64, CalibrationError>) {
        if let Err(error) = &outcome {
            warn!("could not resolve {quantity}: {error}");
        }
        self.entries.push(CalibrationEntry {
            quantity: quantity.to_string(),
            outcome,
        });
    }
}

/// Resolves actual parameter values against an immutable table snapshot.
///
/// The resolver never mutates the table; swapping tables mid-pass requires
/// exclusive access to the surrounding converter.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationResolver<'a> {
    table: &'a CalibrationTable,
}

impl<'a> CalibrationResolver<'a> {
    /// Creates a resolver over a table snapshot.
    #[must_use]
    pub fn new(table: &'a CalibrationTable) -> Self {
        Self { table }
    }

    fn base_matches(record: &CalibrationRecord, params: &MicroscopeParameters) -> bool {
        number_matches(record.acceleration_voltage, params.voltage())
            && text_matches(&record.camera, params.camera().value())
            && text_matches(&record.microscope, params.microscope().value())
    }

    /// Resolves one quantity: quantity rows, base condition, caller predicate;
    /// matches sorted by date, latest wins.
    pub fn resolve<F>(
        &self,
        quantity: &str,
        params: &MicroscopeParameters,
        predicate: F,
    ) -> Option<&'a CalibrationRecord>
    where
        F: Fn(&CalibrationRecord) -> bool,
    {
        let mut matches: Vec<&CalibrationRecord> = self
            .table
            .records()
            .iter()
            .filter(|r| r.quantity == quantity)
            .filter(|r| Self::base_matches(r, params))
            .filter(|r| predicate(r))
            .collect();
        // Stable sort: equal dates keep row (append) order.
        matches.sort_by_key(|r| r.date);
        if matches.len() > 1 {
            warn!(
                "{} calibration rows match for {quantity}, using the most recent ({})",
                matches.len(),
                matches[matches.len() - 1].date
            );
        }
        matches.last().copied()
    }

    fn nominal_of(
        parameter: &crate::parameter::CalibratedParameter,
    ) -> std::result::Result<f64, CalibrationError> {
        parameter
            .nominal_value()
            .as_number()
            .filter(|v| !v.is_nan())
            .ok_or_else(|| CalibrationError::UndefinedNominal(parameter.name().to_string()))
    }

    fn is_stem(params: &MicroscopeParameters) -> bool {
        params.mode().value().as_text() == Some("STEM")
    }

    /// Resolves the actual cameralength in cm.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal cameralength is set.
    pub fn resolve_cameralength(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.cameralength())?;
        Ok(self
            .resolve("Cameralength", params, |r| {
                number_matches(r.nominal_value, nominal)
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the actual magnification.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal magnification is set.
    pub fn resolve_magnification(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.magnification())?;
        Ok(self
            .resolve("Magnification", params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && text_matches(&r.mag_mode, params.mag_mode().value())
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the actual rocking (precession) angle in degrees.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal angle is set.
    pub fn resolve_rocking_angle(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.rocking_angle())?;
        Ok(self
            .resolve("Rocking angle", params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && number_matches(r.alpha, params.alpha().value().as_number().unwrap_or(f64::NAN))
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    fn resolve_scan_step(
        &self,
        quantity: &str,
        parameter: &crate::parameter::CalibratedParameter,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(parameter)?;
        // Spot and alpha are meaningless in STEM; scan-step queries drop the
        // alpha key there.
        let stem = Self::is_stem(params);
        Ok(self
            .resolve(quantity, params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && (stem
                        || number_matches(
                            r.alpha,
                            params.alpha().value().as_number().unwrap_or(f64::NAN),
                        ))
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the actual scan step in the x-direction in nm.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal step is set.
    pub fn resolve_scan_step_x(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        self.resolve_scan_step("Step X", params.scan_step_x(), params)
    }

    /// Resolves the actual scan step in the y-direction in nm.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal step is set.
    pub fn resolve_scan_step_y(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        self.resolve_scan_step("Step Y", params.scan_step_y(), params)
    }

    /// Resolves the actual spotsize in nm.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal spotsize is set.
    pub fn resolve_spotsize(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.spotsize())?;
        Ok(self
            .resolve("Spotsize", params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && number_matches(r.spot, params.spot().value().as_number().unwrap_or(f64::NAN))
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the actual condenser aperture size in um.
    ///
    /// No label in the table schema carries condenser aperture rows today, so
    /// this resolves to NaN unless such rows are added.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal size is set.
    pub fn resolve_condenser_aperture(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.condenser_aperture())?;
        Ok(self
            .resolve("Condenser aperture", params, |r| {
                number_matches(r.nominal_value, nominal)
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the actual semi-convergence angle in mrad.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal angle is set.
    pub fn resolve_convergence_angle(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.convergence_angle())?;
        Ok(self
            .resolve("Convergence angle", params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && number_matches(r.alpha, params.alpha().value().as_number().unwrap_or(f64::NAN))
            })
            .map_or(f64::NAN, |r| r.actual_value))
    }

    /// Resolves the image scale in nm/px from the matching IMG row.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal magnification is set.
    pub fn resolve_image_scale(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.magnification())?;
        Ok(self
            .resolve("Magnification", params, |r| {
                number_matches(r.nominal_value, nominal)
                    && text_matches(&r.mode, params.mode().value())
                    && text_matches(&r.mag_mode, params.mag_mode().value())
            })
            .map_or(f64::NAN, |r| r.scale))
    }

    /// Resolves the diffraction scale in 1/angstrom/px from the matching DIFF row.
    ///
    /// # Errors
    /// [`CalibrationError::UndefinedNominal`] when no nominal cameralength is set.
    pub fn resolve_diffraction_scale(
        &self,
        params: &MicroscopeParameters,
    ) -> std::result::Result<f64, CalibrationError> {
        let nominal = Self::nominal_of(params.cameralength())?;
        Ok(self
            .resolve("Cameralength", params, |r| {
                number_matches(r.nominal_value, nominal)
            })
            .map_or(f64::NAN, |r| r.scale))
    }

    /// Resolves every calibrated quantity and writes the results into the
    /// parameter set. Scales are resolved last, after the parameters they
    /// depend on.
    pub fn calibrate_all(&self, params: &mut MicroscopeParameters) -> CalibrationReport {
        let mut report = CalibrationReport::default();

        let quantities: [(&str, std::result::Result<f64, CalibrationError>); 10] = [
            ("Magnification", self.resolve_magnification(params)),
            ("Cameralength", self.resolve_cameralength(params)),
            ("Spotsize", self.resolve_spotsize(params)),
            (
                "Condenser aperture",
                self.resolve_condenser_aperture(params),
            ),
            ("Convergence angle", self.resolve_convergence_angle(params)),
            ("Rocking angle", self.resolve_rocking_angle(params)),
            ("Step X", self.resolve_scan_step_x(params)),
            ("Step Y", self.resolve_scan_step_y(params)),
            ("Image scale", self.resolve_image_scale(params)),
            ("Diffraction scale", self.resolve_diffraction_scale(params)),
        ];

        for (quantity, outcome) in quantities {
            if let Ok(value) = outcome {
                params.set_calibrated_value(quantity, value);
            }
            report.record(quantity, outcome);
        }
        report
    }
}
