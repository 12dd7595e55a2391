//! The full instrument state of one acquisition.

use crate::parameter::{CalibratedParameter, Parameter, ParameterRef, Value};
use crate::scale;
use chrono::NaiveDate;
use serde_json::{Map, Value as JsonValue};

/// Aggregate of all microscope parameters for a single acquisition.
///
/// Constructed with all-undefined defaults and filled through typed setters.
/// Setters normalize to the semantic unit of each parameter; notably the
/// acceleration voltage is taken in kV and stored in volts, which the
/// wavelength computation depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroscopeParameters {
    acceleration_voltage: Parameter,
    mode: Parameter,
    alpha: Parameter,
    mag_mode: Parameter,
    magnification: CalibratedParameter,
    image_scale: Parameter,
    cameralength: CalibratedParameter,
    diffraction_scale: Parameter,
    spot: Parameter,
    spotsize: CalibratedParameter,
    condenser_aperture: CalibratedParameter,
    convergence_angle: CalibratedParameter,
    rocking_angle: CalibratedParameter,
    rocking_frequency: Parameter,
    scan_step_x: CalibratedParameter,
    scan_step_y: CalibratedParameter,
    acquisition_date: Parameter,
    camera: Parameter,
    exposure_time: Parameter,
    microscope: Parameter,
}

impl Default for MicroscopeParameters {
    fn default() -> Self {
        Self {
            acceleration_voltage: Parameter::new("Acceleration voltage", f64::NAN, "V"),
            mode: Parameter::new("Mode", "None", ""),
            alpha: Parameter::new("Alpha", f64::NAN, ""),
            mag_mode: Parameter::new("Mag mode", "None", ""),
            magnification: CalibratedParameter::new("Magnification", f64::NAN, "", f64::NAN),
            image_scale: Parameter::new("Image scale", f64::NAN, "nm"),
            cameralength: CalibratedParameter::new("Cameralength", f64::NAN, "cm", f64::NAN),
            diffraction_scale: Parameter::new("Diffraction scale", f64::NAN, "1/Å"),
            spot: Parameter::new("Spot", f64::NAN, ""),
            spotsize: CalibratedParameter::new("Spotsize", f64::NAN, "nm", f64::NAN),
            condenser_aperture: CalibratedParameter::new(
                "Condenser aperture",
                f64::NAN,
                "um",
                f64::NAN,
            ),
            convergence_angle: CalibratedParameter::new(
                "Convergence angle",
                f64::NAN,
                "mrad",
                f64::NAN,
            ),
            rocking_angle: CalibratedParameter::new("Rocking angle", f64::NAN, "deg", f64::NAN),
            rocking_frequency: Parameter::new("Rocking frequency", f64::NAN, "Hz"),
            scan_step_x: CalibratedParameter::new("Step X", f64::NAN, "nm", f64::NAN),
            scan_step_y: CalibratedParameter::new("Step Y", f64::NAN, "nm", f64::NAN),
            acquisition_date: Parameter::new("Acquisition date", "None", ""),
            camera: Parameter::new("Camera", "None", ""),
            exposure_time: Parameter::new("Exposure time", f64::NAN, "ms"),
            microscope: Parameter::new("Microscope", "None", ""),
        }
    }
}

impl MicroscopeParameters {
    /// Creates an all-undefined parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- typed setters ---

    /// Sets the acceleration voltage from a value in kV (stored in V).
    pub fn set_acceleration_voltage(&mut self, kilovolts: f64) {
        self.acceleration_voltage.set_value(kilovolts * 1e3);
    }

    /// Sets the microscope mode (TEM, STEM, NBD, CBD, ...).
    pub fn set_mode(&mut self, mode: &str) {
        self.mode.set_value(mode);
    }

    /// Sets the condenser minilens (alpha) setting.
    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha.set_value(alpha);
    }

    /// Sets the magnification mode (MAG1/2, SAMAG, LOWMAG, ...).
    pub fn set_mag_mode(&mut self, mag_mode: &str) {
        self.mag_mode.set_value(mag_mode);
    }

    /// Sets the actual (calibrated) magnification.
    pub fn set_magnification(&mut self, magnification: f64) {
        self.magnification.set_value(magnification);
    }

    /// Sets the nominal magnification.
    pub fn set_nominal_magnification(&mut self, magnification: f64) {
        self.magnification.set_nominal_value(magnification);
    }

    /// Sets the image scale in nm per pixel.
    pub fn set_image_scale(&mut self, scale: f64) {
        self.image_scale.set_value(scale);
    }

    /// Sets the actual (calibrated) cameralength in cm.
    pub fn set_cameralength(&mut self, cameralength: f64) {
        self.cameralength.set_value(cameralength);
    }

    /// Sets the nominal cameralength in cm.
    pub fn set_nominal_cameralength(&mut self, cameralength: f64) {
        self.cameralength.set_nominal_value(cameralength);
    }

    /// Sets the diffraction scale in reciprocal angstroms per pixel.
    pub fn set_diffraction_scale(&mut self, scale: f64) {
        self.diffraction_scale.set_value(scale);
    }

    /// Sets the spot (condenser lens) setting.
    pub fn set_spot(&mut self, spot: f64) {
        self.spot.set_value(spot);
    }

    /// Sets the actual (calibrated) spotsize in nm.
    pub fn set_spotsize(&mut self, spotsize: f64) {
        self.spotsize.set_value(spotsize);
    }

    /// Sets the nominal spotsize in nm.
    pub fn set_nominal_spotsize(&mut self, spotsize: f64) {
        self.spotsize.set_nominal_value(spotsize);
    }

    /// Sets the actual (calibrated) condenser aperture size in um.
    pub fn set_condenser_aperture(&mut self, aperture: f64) {
        self.condenser_aperture.set_value(aperture);
    }

    /// Sets the nominal condenser aperture size in um.
    pub fn set_nominal_condenser_aperture(&mut self, aperture: f64) {
        self.condenser_aperture.set_nominal_value(aperture);
    }

    /// Sets the actual (calibrated) semi-convergence angle in mrad.
    pub fn set_convergence_angle(&mut self, angle: f64) {
        self.convergence_angle.set_value(angle);
    }

    /// Sets the nominal semi-convergence angle in mrad.
    pub fn set_nominal_convergence_angle(&mut self, angle: f64) {
        self.convergence_angle.set_nominal_value(angle);
    }

    /// Sets the actual (calibrated) rocking/precession angle in degrees.
    pub fn set_rocking_angle(&mut self, angle: f64) {
        self.rocking_angle.set_value(angle);
    }

    /// Sets the nominal rocking/precession angle in degrees.
    pub fn set_nominal_rocking_angle(&mut self, angle: f64) {
        self.rocking_angle.set_nominal_value(angle);
    }

    /// Sets the rocking/precession frequency in Hz.
    pub fn set_rocking_frequency(&mut self, frequency: f64) {
        self.rocking_frequency.set_value(frequency);
    }

    /// Sets the actual (calibrated) scan step in the x-direction in nm.
    pub fn set_scan_step_x(&mut self, step: f64) {
        self.scan_step_x.set_value(step);
    }

    /// Sets the nominal scan step in the x-direction in nm.
    pub fn set_nominal_scan_step_x(&mut self, step: f64) {
        self.scan_step_x.set_nominal_value(step);
    }

    /// Sets the actual (calibrated) scan step in the y-direction in nm.
    pub fn set_scan_step_y(&mut self, step: f64) {
        self.scan_step_y.set_value(step);
    }

    /// Sets the nominal scan step in the y-direction in nm.
    pub fn set_nominal_scan_step_y(&mut self, step: f64) {
        self.scan_step_y.set_nominal_value(step);
    }

    /// Sets the acquisition date.
    pub fn set_acquisition_date(&mut self, date: NaiveDate) {
        self.acquisition_date.set_value(date);
    }

    /// Sets the camera name.
    pub fn set_camera(&mut self, camera: &str) {
        self.camera.set_value(camera);
    }

    /// Sets the exposure time in ms.
    pub fn set_exposure_time(&mut self, exposure: f64) {
        self.exposure_time.set_value(exposure);
    }

    /// Sets the microscope name.
    pub fn set_microscope(&mut self, microscope: &str) {
        self.microscope.set_value(microscope);
    }

    // --- accessors ---

    #[must_use]
    pub fn acceleration_voltage(&self) -> &Parameter {
        &self.acceleration_voltage
    }

    #[must_use]
    pub fn mode(&self) -> &Parameter {
        &self.mode
    }

    #[must_use]
    pub fn alpha(&self) -> &Parameter {
        &self.alpha
    }

    #[must_use]
    pub fn mag_mode(&self) -> &Parameter {
        &self.mag_mode
    }

    #[must_use]
    pub fn magnification(&self) -> &CalibratedParameter {
        &self.magnification
    }

    #[must_use]
    pub fn image_scale(&self) -> &Parameter {
        &self.image_scale
    }

    #[must_use]
    pub fn cameralength(&self) -> &CalibratedParameter {
        &self.cameralength
    }

    #[must_use]
    pub fn diffraction_scale(&self) -> &Parameter {
        &self.diffraction_scale
    }

    #[must_use]
    pub fn spot(&self) -> &Parameter {
        &self.spot
    }

    #[must_use]
    pub fn spotsize(&self) -> &CalibratedParameter {
        &self.spotsize
    }

    #[must_use]
    pub fn condenser_aperture(&self) -> &CalibratedParameter {
        &self.condenser_aperture
    }

    #[must_use]
    pub fn convergence_angle(&self) -> &CalibratedParameter {
        &self.convergence_angle
    }

    #[must_use]
    pub fn rocking_angle(&self) -> &CalibratedParameter {
        &self.rocking_angle
    }

    #[must_use]
    pub fn rocking_frequency(&self) -> &Parameter {
        &self.rocking_frequency
    }

    #[must_use]
    pub fn scan_step_x(&self) -> &CalibratedParameter {
        &self.scan_step_x
    }

    #[must_use]
    pub fn scan_step_y(&self) -> &CalibratedParameter {
        &self.scan_step_y
    }

    #[must_use]
    pub fn acquisition_date(&self) -> &Parameter {
        &self.acquisition_date
    }

    #[must_use]
    pub fn camera(&self) -> &Parameter {
        &self.camera
    }

    #[must_use]
    pub fn exposure_time(&self) -> &Parameter {
        &self.exposure_time
    }

    #[must_use]
    pub fn microscope(&self) -> &Parameter {
        &self.microscope
    }

    /// Voltage in volts as a plain number (NaN when undefined).
    #[must_use]
    pub fn voltage(&self) -> f64 {
        self.acceleration_voltage
            .value()
            .as_number()
            .unwrap_or(f64::NAN)
    }

    /// Relativistic electron wavelength in angstroms for the current voltage.
    ///
    /// NaN when the voltage is undefined; check
    /// `acceleration_voltage().is_defined()` first.
    #[must_use]
    pub fn wavelength(&self) -> f64 {
        scale::wavelength(self.voltage())
    }

    pub(crate) fn set_calibrated_value(&mut self, quantity: &str, value: f64) {
        match quantity {
            "Magnification" => self.magnification.set_value(value),
            "Cameralength" => self.cameralength.set_value(value),
            "Spotsize" => self.spotsize.set_value(value),
            "Condenser aperture" => self.condenser_aperture.set_value(value),
            "Convergence angle" => self.convergence_angle.set_value(value),
            "Rocking angle" => self.rocking_angle.set_value(value),
            "Step X" => self.scan_step_x.set_value(value),
            "Step Y" => self.scan_step_y.set_value(value),
            "Image scale" => self.image_scale.set_value(value),
            "Diffraction scale" => self.diffraction_scale.set_value(value),
            _ => {}
        }
    }

    // --- projections ---

    /// Iterates over all parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = ParameterRef<'_>> {
        [
            ParameterRef::Plain(&self.acceleration_voltage),
            ParameterRef::Plain(&self.mode),
            ParameterRef::Plain(&self.alpha),
            ParameterRef::Plain(&self.mag_mode),
            ParameterRef::Calibrated(&self.magnification),
            ParameterRef::Plain(&self.image_scale),
            ParameterRef::Calibrated(&self.cameralength),
            ParameterRef::Plain(&self.diffraction_scale),
            ParameterRef::Plain(&self.spot),
            ParameterRef::Calibrated(&self.spotsize),
            ParameterRef::Calibrated(&self.condenser_aperture),
            ParameterRef::Calibrated(&self.convergence_angle),
            ParameterRef::Calibrated(&self.rocking_angle),
            ParameterRef::Plain(&self.rocking_frequency),
            ParameterRef::Calibrated(&self.scan_step_x),
            ParameterRef::Calibrated(&self.scan_step_y),
            ParameterRef::Plain(&self.acquisition_date),
            ParameterRef::Plain(&self.camera),
            ParameterRef::Plain(&self.exposure_time),
            ParameterRef::Plain(&self.microscope),
        ]
        .into_iter()
    }

    /// Nested JSON mapping of all parameters, keyed lowercase with
    /// underscores. Calibrated parameters contribute nominal and actual
    /// fields; plain parameters only a value field.
    #[must_use]
    pub fn as_nested_mapping(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for parameter in self.iter() {
            map.insert(parameter.key(), parameter.as_json());
        }
        map
    }

    /// Flat single-row projection `(column, value)` for tabular embedding.
    #[must_use]
    pub fn as_table_row(&self) -> Vec<(String, Value)> {
        let mut row = Vec::new();
        for parameter in self.iter() {
            match parameter {
                ParameterRef::Plain(p) => {
                    row.push((p.name().to_string(), p.value().clone()));
                }
                ParameterRef::Calibrated(p) => {
                    row.push((format!("Nominal {}", p.name()), p.nominal_value().clone()));
                    row.push((p.name().to_string(), p.value().clone()));
                }
            }
        }
        row
    }

    /// Only the defined parameters, for selective calibration-table querying.
    #[must_use]
    pub fn defined_subset(&self) -> Vec<ParameterRef<'_>> {
        self.iter().filter(ParameterRef::is_defined).collect()
    }

    /// Defined parameters projected to a nested JSON mapping.
    #[must_use]
    pub fn defined_subset_as_mapping(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        for parameter in self.defined_subset() {
            map.insert(parameter.key(), parameter.as_json());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_undefined() {
        let params = MicroscopeParameters::new();
        assert!(params.iter().all(|p| !p.is_defined()));
        assert!(params.wavelength().is_nan());
    }

    #[test]
    fn test_voltage_setter_normalizes_to_volts() {
        let mut params = MicroscopeParameters::new();
        params.set_acceleration_voltage(200.0);
        assert_relative_eq!(params.voltage(), 200_000.0);
        assert_relative_eq!(params.wavelength(), 0.02508, epsilon = 1e-4);
    }

    #[test]
    fn test_nominal_and_actual_are_independent() {
        let mut params = MicroscopeParameters::new();
        params.set_nominal_cameralength(30.0);
        assert!(!params.cameralength().is_defined());
        assert!(params.cameralength().nominal_is_defined());
        params.set_cameralength(33.2);
        assert_relative_eq!(
            params.cameralength().nominal_value().as_number().unwrap(),
            30.0
        );
    }

    #[test]
    fn test_nested_mapping_key_naming() {
        let mut params = MicroscopeParameters::new();
        params.set_acceleration_voltage(200.0);
        params.set_nominal_cameralength(30.0);
        let map = params.as_nested_mapping();

        assert_eq!(map["acceleration_voltage"]["value"], 200_000.0);
        assert_eq!(map["acceleration_voltage"]["units"], "V");
        assert_eq!(map["cameralength"]["nominal_value"], 30.0);
        assert!(map["cameralength"]["value"].is_null());
        assert!(map.contains_key("rocking_frequency"));
        assert!(map.contains_key("step_x"));
    }

    #[test]
    fn test_table_row_has_nominal_columns() {
        let params = MicroscopeParameters::new();
        let row = params.as_table_row();
        let columns: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
        assert!(columns.contains(&"Nominal Cameralength"));
        assert!(columns.contains(&"Cameralength"));
        assert!(columns.contains(&"Mode"));
        assert!(!columns.contains(&"Nominal Mode"));
    }

    #[test]
    fn test_defined_subset() {
        let mut params = MicroscopeParameters::new();
        params.set_mode("NBD");
        params.set_spot(0.0);
        let defined: Vec<String> = params
            .defined_subset()
            .iter()
            .map(super::ParameterRef::key)
            .collect();
        // Zero is a defined value.
        assert_eq!(defined, vec!["mode".to_string(), "spot".to_string()]);
    }
}
