//! The conversion pipeline orchestrator.
//!
//! A [`Converter`] owns the loaded frame stack, the instrument header and the
//! microscope parameter set, and moves them through load, reshape, rechunk,
//! downsample, calibrate and export. Loading is atomic: either the frame
//! stack (and, when present, the header) commit together, or the converter
//! stays in its previous unset state.

use crate::vbf::{virtual_bright_field, VbfRegion};
use crate::{Error, Result};
use mibconv_core::{
    camera_pixel_size_um, Axis, CalibrationReport, CalibrationResolver, CalibrationTable, DType,
    HeaderStore, MicroscopeParameters, Signal, SignalKind, MERLIN_PIXEL_SIZE_UM,
};
use mibconv_io::{companion_hdr_path, load_mib};
use ndarray::{Array2, IxDyn};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Tagged outcome of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Frame stack and companion header both loaded.
    WithHeader,
    /// Frame stack loaded; no usable companion header was found. Geometry
    /// inference from frames-per-trigger is unavailable.
    MissingHeader,
}

/// Chunk layout request for [`Converter::rechunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunks {
    /// One extent broadcast to every dimension.
    Uniform(usize),
    /// One extent per dimension.
    PerDim(Vec<usize>),
}

/// Orchestrates the calibration and reshape/conversion pipeline for one
/// acquisition.
#[derive(Debug, Default)]
pub struct Converter {
    microscope: MicroscopeParameters,
    calibrations: Option<CalibrationTable>,
    data_path: Option<PathBuf>,
    signal: Option<Signal>,
    header: Option<HeaderStore>,
}

impl Converter {
    /// Creates a converter with no data and all-undefined parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a converter around an existing parameter set.
    #[must_use]
    pub fn with_microscope(microscope: MicroscopeParameters) -> Self {
        Self {
            microscope,
            ..Self::default()
        }
    }

    // --- state accessors ---

    #[must_use]
    pub fn microscope(&self) -> &MicroscopeParameters {
        &self.microscope
    }

    pub fn microscope_mut(&mut self) -> &mut MicroscopeParameters {
        &mut self.microscope
    }

    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    #[must_use]
    pub fn signal(&self) -> Option<&Signal> {
        self.signal.as_ref()
    }

    #[must_use]
    pub fn header(&self) -> Option<&HeaderStore> {
        self.header.as_ref()
    }

    #[must_use]
    pub fn calibration_table(&self) -> Option<&CalibrationTable> {
        self.calibrations.as_ref()
    }

    /// Attaches a calibration table snapshot.
    pub fn set_calibration_table(&mut self, table: CalibrationTable) {
        self.calibrations = Some(table);
    }

    /// Sets the raw data path. Clears any previously loaded state.
    ///
    /// # Errors
    /// Returns [`Error::FileName`] for paths without the `.mib` suffix.
    pub fn set_data_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        if path.extension().and_then(|e| e.to_str()) != Some("mib") {
            return Err(Error::FileName(format!(
                "{} is not a MIB file",
                path.display()
            )));
        }
        self.data_path = Some(path.to_path_buf());
        self.signal = None;
        self.header = None;
        Ok(())
    }

    fn loaded_signal(&self) -> Result<&Signal> {
        self.signal
            .as_ref()
            .ok_or_else(|| Error::NotSet("no data loaded".to_string()))
    }

    fn loaded_signal_mut(&mut self) -> Result<&mut Signal> {
        self.signal
            .as_mut()
            .ok_or_else(|| Error::NotSet("no data loaded".to_string()))
    }

    /// Loads the frame stack (and companion header) from the data path.
    ///
    /// The load is atomic: the new signal and header are built first and only
    /// then committed, so a structural failure leaves the converter unset. A
    /// missing or unparseable companion header is not fatal; the outcome tag
    /// says whether header-derived geometry inference is available.
    ///
    /// A single-frame stack is unwrapped to a bare 2-D image.
    ///
    /// # Errors
    /// [`Error::NotSet`] without a data path, [`Error::Read`] on a structural
    /// load failure (state reset).
    pub fn read(&mut self) -> Result<LoadOutcome> {
        let path = self
            .data_path
            .clone()
            .ok_or_else(|| Error::NotSet("no data path set".to_string()))?;

        self.signal = None;
        self.header = None;

        let stack = load_mib(&path).map_err(|e| Error::Read(e.to_string()))?;
        let frames = stack.frames();
        let (ndy, ndx) = (stack.ndy(), stack.ndx());
        let dtype = stack.dtype;

        let signal = if frames == 1 {
            let data = stack
                .data
                .into_shape_with_order(IxDyn(&[ndy, ndx]))
                .map_err(|e| Error::Read(e.to_string()))?;
            let axes = vec![
                Axis::uncalibrated("ky", ndy, false),
                Axis::uncalibrated("kx", ndx, false),
            ];
            Signal::new(data, axes, SignalKind::Diffraction, dtype)
        } else {
            let data = stack
                .data
                .into_shape_with_order(IxDyn(&[frames, ndy, ndx]))
                .map_err(|e| Error::Read(e.to_string()))?;
            let axes = vec![
                Axis::uncalibrated("frame", frames, true),
                Axis::uncalibrated("ky", ndy, false),
                Axis::uncalibrated("kx", ndx, false),
            ];
            Signal::new(data, axes, SignalKind::Diffraction, dtype)
        }
        .map_err(|e| Error::Read(e.to_string()))?;

        let hdr_path = companion_hdr_path(&path);
        let outcome = match HeaderStore::parse(&hdr_path) {
            Ok(header) => {
                self.header = Some(header);
                LoadOutcome::WithHeader
            }
            Err(error) => {
                log::warn!("no usable header at {}: {error}", hdr_path.display());
                LoadOutcome::MissingHeader
            }
        };
        self.signal = Some(signal);
        Ok(outcome)
    }

    // --- geometry queries ---

    /// Total number of frames in the loaded data.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn frames(&self) -> Result<usize> {
        let signal = self.loaded_signal()?;
        Ok(signal.navigation_axes().iter().map(|a| a.size).product())
    }

    /// Dimensionality of the loaded data.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn dimension(&self) -> Result<usize> {
        Ok(self.loaded_signal()?.ndim())
    }

    /// Detector width in pixels.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn ndx(&self) -> Result<usize> {
        let signal = self.loaded_signal()?;
        Ok(signal.shape()[signal.ndim() - 1])
    }

    /// Detector height in pixels.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn ndy(&self) -> Result<usize> {
        let signal = self.loaded_signal()?;
        Ok(signal.shape()[signal.ndim() - 2])
    }

    /// Scan width in positions; requires reshaped 4-D data.
    ///
    /// # Errors
    /// [`Error::NotSet`] / [`Error::Dimension`].
    pub fn nx(&self) -> Result<usize> {
        let signal = self.loaded_signal()?;
        match signal.ndim() {
            4 => Ok(signal.shape()[1]),
            3 => Ok(signal.shape()[0]),
            other => Err(Error::Dimension(format!(
                "no scan dimensions on {other}-D data"
            ))),
        }
    }

    /// Scan height in positions; requires reshaped 4-D data.
    ///
    /// # Errors
    /// [`Error::NotSet`] / [`Error::Dimension`].
    pub fn ny(&self) -> Result<usize> {
        let signal = self.loaded_signal()?;
        match signal.ndim() {
            4 => Ok(signal.shape()[0]),
            3 => Ok(1),
            other => Err(Error::Dimension(format!(
                "no scan dimensions on {other}-D data"
            ))),
        }
    }

    /// Physical extent of the detector plane `(x, y)`.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn image_extent(&self) -> Result<(f64, f64)> {
        let signal = self.loaded_signal()?;
        let detector = signal.signal_axes();
        Ok((detector[1].extent(), detector[0].extent()))
    }

    /// Physical extent of the scan `(x, y)`.
    ///
    /// # Errors
    /// [`Error::NotSet`] / [`Error::Dimension`] on data with no scan axes.
    pub fn scan_extent(&self) -> Result<(f64, f64)> {
        let signal = self.loaded_signal()?;
        let scan = signal.navigation_axes();
        match scan.len() {
            2 => Ok((scan[1].extent(), scan[0].extent())),
            1 => Ok((scan[0].extent(), 0.0)),
            _ => Err(Error::Dimension(
                "no scan dimensions on bare image data".to_string(),
            )),
        }
    }

    /// Largest intensity in the loaded data.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn max_value(&self) -> Result<f64> {
        Ok(self.loaded_signal()?.max_value())
    }

    // --- pipeline operations ---

    /// Reshapes the flat frame stream into a `(ny, nx)` scan raster.
    ///
    /// When both dimensions are omitted: a header with frames-per-trigger
    /// greater than one fixes `nx` (line-triggered raster); otherwise a
    /// square raster is assumed. When exactly one is given, the other is
    /// derived from the frame count. A single-frame image is left untouched
    /// with a warning.
    ///
    /// # Errors
    /// [`Error::NotSet`] with no data; [`Error::Reshape`] when the geometry
    /// is non-positive, does not divide the frame count, or cannot be
    /// inferred.
    pub fn reshape(&mut self, nx: Option<i64>, ny: Option<i64>) -> Result<()> {
        let signal = self.loaded_signal()?;
        if signal.ndim() == 2 {
            log::warn!("single-frame image, nothing to reshape");
            return Ok(());
        }
        for value in [nx, ny].into_iter().flatten() {
            if value <= 0 {
                return Err(Error::Reshape(format!(
                    "scan dimensions must be positive, got {value}"
                )));
            }
        }
        let frames = self.frames()?;
        let (nx, ny) = self.infer_geometry(frames, nx, ny)?;
        if nx * ny != frames {
            return Err(Error::Reshape(format!(
                "{nx} x {ny} scan does not match {frames} frames"
            )));
        }

        let signal = self.loaded_signal_mut()?;
        let shape = signal.shape();
        let (ndy, ndx) = (shape[shape.len() - 2], shape[shape.len() - 1]);
        // Keep any detector-axis calibration across the reshape.
        let detector: Vec<Axis> = signal.signal_axes().into_iter().cloned().collect();
        let data = signal
            .data()
            .clone()
            .into_shape_with_order(IxDyn(&[ny, nx, ndy, ndx]))
            .map_err(|e| Error::Reshape(e.to_string()))?;
        let axes = vec![
            Axis::uncalibrated("y", ny, true),
            Axis::uncalibrated("x", nx, true),
            detector[0].clone(),
            detector[1].clone(),
        ];
        signal
            .replace_data(data, axes)
            .map_err(|e| Error::Reshape(e.to_string()))?;
        Ok(())
    }

    fn infer_geometry(
        &self,
        frames: usize,
        nx: Option<i64>,
        ny: Option<i64>,
    ) -> Result<(usize, usize)> {
        #[allow(clippy::cast_sign_loss)]
        let explicit = |v: i64| v as usize;
        let derive = |given: usize| -> Result<usize> {
            if given == 0 || frames % given != 0 {
                return Err(Error::Reshape(format!(
                    "{given} does not divide {frames} frames"
                )));
            }
            Ok(frames / given)
        };
        match (nx, ny) {
            (Some(nx), Some(ny)) => Ok((explicit(nx), explicit(ny))),
            (Some(nx), None) => {
                let nx = explicit(nx);
                Ok((nx, derive(nx)?))
            }
            (None, Some(ny)) => {
                let ny = explicit(ny);
                Ok((derive(ny)?, ny))
            }
            (None, None) => {
                let per_trigger = self
                    .header
                    .as_ref()
                    .and_then(HeaderStore::frames_per_trigger)
                    .unwrap_or(0);
                if per_trigger > 1 {
                    // Line-triggered raster: one trigger per scan row.
                    let nx = usize::try_from(per_trigger)
                        .map_err(|_| Error::Reshape("frames per trigger overflows".to_string()))?;
                    Ok((nx, derive(nx)?))
                } else {
                    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let side = (frames as f64).sqrt().round() as usize;
                    if side * side != frames {
                        return Err(Error::Reshape(format!(
                            "{frames} frames do not form a square raster and no geometry was given"
                        )));
                    }
                    Ok((side, side))
                }
            }
        }
    }

    /// Records a chunk layout on the loaded data. Storage-layout change only.
    ///
    /// # Errors
    /// [`Error::NotSet`] with no data; [`Error::InvalidArgument`] for zero
    /// extents or a rank mismatch.
    pub fn rechunk(&mut self, chunks: &Chunks) -> Result<()> {
        let signal = self.loaded_signal_mut()?;
        let layout = match chunks {
            Chunks::Uniform(extent) => vec![*extent; signal.ndim()],
            Chunks::PerDim(layout) => layout.clone(),
        };
        signal
            .set_chunks(layout)
            .map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    /// Casts the loaded data to a declared element type.
    ///
    /// Values outside the target range saturate; no range validation is
    /// performed, the caller chooses a safe target type.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn downsample(&mut self, dtype: DType) -> Result<()> {
        self.loaded_signal_mut()?.downsample(dtype);
        Ok(())
    }

    /// Resolves all calibrated quantities against the attached table and
    /// writes them into the parameter set.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no calibration table is attached. Per-quantity
    /// failures never abort the pass; they are collected in the report.
    pub fn calibrate(&mut self) -> Result<CalibrationReport> {
        let table = self
            .calibrations
            .as_ref()
            .ok_or_else(|| Error::NotSet("no calibration table attached".to_string()))?;
        let resolver = CalibrationResolver::new(table);
        Ok(resolver.calibrate_all(&mut self.microscope))
    }

    /// Applies resolved calibrations to the signal axes and embeds metadata.
    ///
    /// Detector axes get the diffraction scale, or an explicit scale of 1
    /// with "undefined" units when unresolved; an undefined calibration is
    /// recorded, never silently skipped. Scan axes get the per-direction
    /// step sizes when defined. Finishes by embedding metadata.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn apply_calibrations(&mut self) -> Result<()> {
        self.loaded_signal()?;
        if self.calibrations.is_some() {
            let report = self.calibrate()?;
            for entry in report.failed() {
                log::warn!("{}: {:?}", entry.quantity, entry.outcome);
            }
        }

        let diffraction = self.microscope.diffraction_scale();
        let (scale, units) = if diffraction.is_defined() {
            (
                diffraction.value().as_number().unwrap_or(f64::NAN),
                diffraction.units().to_string(),
            )
        } else {
            (1.0, "undefined".to_string())
        };
        let step_x = self.microscope.scan_step_x().value().as_number();
        let step_y = self.microscope.scan_step_y().value().as_number();

        let signal = self.loaded_signal_mut()?;
        for axis in signal.axes_mut().iter_mut().filter(|a| !a.navigate) {
            axis.scale = scale;
            axis.units.clone_from(&units);
        }
        let mut scan_steps = [step_y, step_x].into_iter();
        for axis in signal.axes_mut().iter_mut().filter(|a| a.navigate) {
            if let Some(step) = scan_steps.next().flatten().filter(|v| !v.is_nan()) {
                axis.scale = step;
                axis.units = "nm".to_string();
            }
        }
        self.set_metadata()
    }

    /// Embeds experimental parameters into the structured metadata and the
    /// full parameter set plus raw header into the original metadata. This is
    /// the single place header content is preserved for provenance.
    ///
    /// # Errors
    /// [`Error::NotSet`] when no data is loaded.
    pub fn set_metadata(&mut self) -> Result<()> {
        self.loaded_signal()?;

        let voltage = self.microscope.voltage();
        let tem = [
            ("beam_energy", voltage / 1e3),
            (
                "camera_length",
                self.microscope
                    .cameralength()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "magnification",
                self.microscope
                    .magnification()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "convergence_angle",
                self.microscope
                    .convergence_angle()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "rocking_angle",
                self.microscope
                    .rocking_angle()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "rocking_frequency",
                self.microscope
                    .rocking_frequency()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "exposure_time",
                self.microscope
                    .exposure_time()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "scan_step_x",
                self.microscope
                    .scan_step_x()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
            (
                "scan_step_y",
                self.microscope
                    .scan_step_y()
                    .value()
                    .as_number()
                    .unwrap_or(f64::NAN),
            ),
        ];

        let parameters = self.microscope.as_nested_mapping();
        let header = self.header.as_ref().map(HeaderStore::as_mapping);

        let signal = self.loaded_signal_mut()?;
        for (name, value) in tem {
            if !value.is_nan() {
                signal.set_metadata(
                    &format!("Acquisition_instrument.TEM.{name}"),
                    json!(value),
                );
            }
        }
        signal.set_original_metadata("Parameters", serde_json::Value::Object(parameters));
        if let Some(header) = header {
            signal.set_original_metadata("Header", json!(header));
        }
        Ok(())
    }

    /// Extracts a virtual bright-field image from reshaped 4-D data.
    ///
    /// # Errors
    /// [`Error::NotSet`] / [`Error::Dimension`] / [`Error::InvalidArgument`].
    pub fn get_vbf(&self, region: &VbfRegion) -> Result<Array2<f64>> {
        virtual_bright_field(self.loaded_signal()?, region)
    }

    /// Builds a block-file-ready deep copy of the loaded data: optionally
    /// log-transformed, linearly rescaled into `0..=255`, cast to `uint8`,
    /// detector axes fixed to the block-file pixel-size convention. The live
    /// signal is never mutated. A 3-D stack is carried as a single scan row.
    ///
    /// # Errors
    /// [`Error::NotSet`] with no data; [`Error::Dimension`] for data without
    /// scan axes; [`Error::Blockfile`] for non-diffraction data.
    pub fn prepare_blockfile(
        &self,
        normalize: bool,
        logarithmic: bool,
        pixel_size_um: f64,
    ) -> Result<Signal> {
        let signal = self.loaded_signal()?;
        if signal.ndim() < 3 {
            return Err(Error::Dimension(
                "block files need scan dimensions, got a bare image".to_string(),
            ));
        }
        if signal.kind() != SignalKind::Diffraction {
            return Err(Error::Blockfile(format!(
                "block files hold diffraction data, got {} data",
                signal.kind()
            )));
        }

        let mut copy = signal.clone();
        if signal.ndim() == 3 {
            let shape = signal.shape();
            let data = copy
                .data()
                .clone()
                .into_shape_with_order(IxDyn(&[1, shape[0], shape[1], shape[2]]))
                .map_err(|e| Error::Blockfile(e.to_string()))?;
            let mut axes = vec![
                Axis::uncalibrated("y", 1, true),
                Axis::uncalibrated("x", shape[0], true),
            ];
            axes.extend(signal.signal_axes().into_iter().cloned());
            copy.replace_data(data, axes)
                .map_err(|e| Error::Blockfile(e.to_string()))?;
        }

        let mut data = copy.data().clone();
        if logarithmic {
            data.mapv_inplace(f64::ln_1p);
        }
        if normalize {
            let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max > 0.0 {
                data.mapv_inplace(|v| v / max * 255.0);
            }
        }
        let axes = copy.axes().to_vec();
        copy.replace_data(data, axes)
            .map_err(|e| Error::Blockfile(e.to_string()))?;
        copy.downsample(DType::U8);

        for axis in copy.axes_mut().iter_mut().filter(|a| !a.navigate) {
            axis.scale = pixel_size_um * 1e4;
            axis.units = "cm".to_string();
        }
        Ok(copy)
    }

    /// Exports the loaded data, dispatching on the output extension:
    /// `.blo` for block files, `.hspy`/`.hdf5`/`.h5` for the HDF5 container.
    /// Underlying failures are wrapped as [`Error::Write`].
    ///
    /// # Errors
    /// [`Error::Write`] for missing data or a failed export,
    /// [`Error::FileName`] for unsupported extensions.
    pub fn write<P: AsRef<Path>>(&self, path: P, overwrite: bool) -> Result<()> {
        let path = path.as_ref();
        if self.signal.is_none() {
            return Err(Error::Write("no data loaded".to_string()));
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("blo") => {
                let pixel_size = self
                    .microscope
                    .camera()
                    .value()
                    .as_text()
                    .and_then(|camera| camera_pixel_size_um(camera).ok())
                    .unwrap_or(MERLIN_PIXEL_SIZE_UM);
                let prepared = self
                    .prepare_blockfile(true, true, pixel_size)
                    .map_err(|e| Error::Write(e.to_string()))?;
                mibconv_io::write_blockfile(path, &prepared, overwrite)
                    .map_err(|e| Error::Write(e.to_string()))
            }
            #[cfg(feature = "hdf5")]
            Some("hspy" | "hdf5" | "h5") => {
                let signal = self.loaded_signal().map_err(|e| Error::Write(e.to_string()))?;
                mibconv_io::write_signal_hdf5(path, signal, overwrite)
                    .map_err(|e| Error::Write(e.to_string()))
            }
            #[cfg(not(feature = "hdf5"))]
            Some("hspy" | "hdf5" | "h5") => Err(Error::Write(
                "built without HDF5 support".to_string(),
            )),
            other => Err(Error::FileName(format!(
                "unsupported output extension {other:?}"
            ))),
        }
    }
}
