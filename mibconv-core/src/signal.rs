//! In-memory signal container: an n-dimensional data block with axis
//! calibrations and nested metadata.

use crate::{Error, Result};
use ndarray::ArrayD;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// What the detector plane of a signal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Reciprocal-space (diffraction) frames.
    Diffraction,
    /// Real-space images.
    Image,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Diffraction => write!(f, "diffraction"),
            SignalKind::Image => write!(f, "image"),
        }
    }
}

/// Element type a signal is declared to hold on disk.
///
/// Data is always carried as `f64` in memory; the declared type controls
/// clamping on downsampling and the on-disk element type on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl DType {
    /// Casts a value to this type's range and precision, saturating at the
    /// integer bounds the way an `as` cast does (NaN maps to zero for the
    /// integer types).
    #[must_use]
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DType::U8 => f64::from(value as u8),
            DType::U16 => f64::from(value as u16),
            DType::U32 => f64::from(value as u32),
            DType::F32 => f64::from(value as f32),
            DType::F64 => value,
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::U16 => 2,
            DType::U32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::F32 => "float32",
            DType::F64 => "float64",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uint8" | "u8" => Ok(DType::U8),
            "uint16" | "u16" => Ok(DType::U16),
            "uint32" | "u32" => Ok(DType::U32),
            "float32" | "f32" => Ok(DType::F32),
            "float64" | "f64" => Ok(DType::F64),
            other => Err(Error::Signal(format!("unknown data type {other:?}"))),
        }
    }
}

/// Calibration of one signal axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub units: String,
    /// Physical size of one step along the axis.
    pub scale: f64,
    pub offset: f64,
    pub size: usize,
    /// Navigation axes index scan positions; non-navigation axes span the
    /// detector plane.
    pub navigate: bool,
}

impl Axis {
    /// Creates an uncalibrated axis (scale 1, no units).
    #[must_use]
    pub fn uncalibrated(name: &str, size: usize, navigate: bool) -> Self {
        Self {
            name: name.to_string(),
            units: String::new(),
            scale: 1.0,
            offset: 0.0,
            size,
            navigate,
        }
    }

    /// Physical extent spanned by the axis.
    #[must_use]
    pub fn extent(&self) -> f64 {
        self.scale * self.size as f64
    }

    /// JSON projection used when embedding axes into file metadata.
    #[must_use]
    pub fn as_json(&self) -> JsonValue {
        json!({
            "name": self.name,
            "units": self.units,
            "scale": self.scale,
            "offset": self.offset,
            "size": self.size,
            "navigate": self.navigate,
        })
    }
}

/// An n-dimensional signal: data block, per-axis calibrations and two
/// metadata trees (processed metadata and the raw acquisition record).
///
/// Invariant: `axes.len()` equals the data dimensionality, with axes stored
/// in data (row-major) order.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    data: ArrayD<f64>,
    axes: Vec<Axis>,
    kind: SignalKind,
    dtype: DType,
    /// Preferred chunk layout for chunked on-disk formats, one entry per axis.
    chunks: Option<Vec<usize>>,
    metadata: Map<String, JsonValue>,
    original_metadata: Map<String, JsonValue>,
}

impl Signal {
    /// Creates a signal over a data block with explicit axes.
    ///
    /// # Errors
    /// Returns [`Error::Signal`] when the axes do not match the data shape.
    pub fn new(data: ArrayD<f64>, axes: Vec<Axis>, kind: SignalKind, dtype: DType) -> Result<Self> {
        if axes.len() != data.ndim() {
            return Err(Error::Signal(format!(
                "{} axes for {}-dimensional data",
                axes.len(),
                data.ndim()
            )));
        }
        for (axis, &dim) in axes.iter().zip(data.shape()) {
            if axis.size != dim {
                return Err(Error::Signal(format!(
                    "axis {:?} has size {} but the data dimension is {dim}",
                    axis.name, axis.size
                )));
            }
        }
        Ok(Self {
            data,
            axes,
            kind,
            dtype,
            chunks: None,
            metadata: Map::new(),
            original_metadata: Map::new(),
        })
    }

    #[must_use]
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Mutable access to the axes, for calibration passes.
    pub fn axes_mut(&mut self) -> &mut [Axis] {
        &mut self.axes
    }

    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn chunks(&self) -> Option<&[usize]> {
        self.chunks.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }

    #[must_use]
    pub fn original_metadata(&self) -> &Map<String, JsonValue> {
        &self.original_metadata
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Navigation (scan) axes in data order.
    #[must_use]
    pub fn navigation_axes(&self) -> Vec<&Axis> {
        self.axes.iter().filter(|a| a.navigate).collect()
    }

    /// Detector-plane axes in data order.
    #[must_use]
    pub fn signal_axes(&self) -> Vec<&Axis> {
        self.axes.iter().filter(|a| !a.navigate).collect()
    }

    /// Largest element in the data block (NaN-free data assumed; NaN elements
    /// are skipped).
    #[must_use]
    pub fn max_value(&self) -> f64 {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Replaces the data block and axes together, keeping metadata.
    ///
    /// # Errors
    /// Returns [`Error::Signal`] when the axes do not match the new shape.
    pub fn replace_data(&mut self, data: ArrayD<f64>, axes: Vec<Axis>) -> Result<()> {
        if axes.len() != data.ndim() {
            return Err(Error::Signal(format!(
                "{} axes for {}-dimensional data",
                axes.len(),
                data.ndim()
            )));
        }
        for (axis, &dim) in axes.iter().zip(data.shape()) {
            if axis.size != dim {
                return Err(Error::Signal(format!(
                    "axis {:?} has size {} but the data dimension is {dim}",
                    axis.name, axis.size
                )));
            }
        }
        self.data = data;
        self.axes = axes;
        // A new shape invalidates any recorded chunk layout.
        self.chunks = None;
        Ok(())
    }

    /// Records a preferred chunk layout, one entry per axis.
    ///
    /// # Errors
    /// Returns [`Error::Signal`] when the layout rank differs from the data
    /// rank or a chunk extent is zero.
    pub fn set_chunks(&mut self, chunks: Vec<usize>) -> Result<()> {
        if chunks.len() != self.ndim() {
            return Err(Error::Signal(format!(
                "{} chunk extents for {}-dimensional data",
                chunks.len(),
                self.ndim()
            )));
        }
        if chunks.iter().any(|&c| c == 0) {
            return Err(Error::Signal("zero-sized chunk extent".to_string()));
        }
        self.chunks = Some(chunks);
        Ok(())
    }

    /// Casts every element through the declared type and records that type.
    pub fn downsample(&mut self, dtype: DType) {
        self.data.mapv_inplace(|v| dtype.cast(v));
        self.dtype = dtype;
    }

    /// Inserts into the processed-metadata tree at a dotted path, creating
    /// intermediate objects as needed.
    pub fn set_metadata(&mut self, path: &str, value: JsonValue) {
        insert_nested(&mut self.metadata, path, value);
    }

    /// Inserts into the raw acquisition-record tree at a dotted path.
    pub fn set_original_metadata(&mut self, path: &str, value: JsonValue) {
        insert_nested(&mut self.original_metadata, path, value);
    }

    /// Reads from the processed-metadata tree at a dotted path.
    #[must_use]
    pub fn get_metadata(&self, path: &str) -> Option<&JsonValue> {
        get_nested(&self.metadata, path)
    }
}

fn insert_nested(map: &mut Map<String, JsonValue>, path: &str, value: JsonValue) {
    let mut current = map;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        // A scalar along the path is overwritten by an object.
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        current = entry.as_object_mut().unwrap_or_else(|| unreachable!());
    }
}

fn get_nested<'a>(map: &'a Map<String, JsonValue>, path: &str) -> Option<&'a JsonValue> {
    let mut parts = path.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
