//!
//! Command-line interface for converting Merlin MIB acquisitions into
//! calibrated container and block-file formats.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand, ValueEnum};

use mibconv_convert::{Chunks, Converter, Coordinate, LoadOutcome, VbfRegion};
use mibconv_core::{CalibrationTable, DType};
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conversion error: {0}")]
    Convert(#[from] mibconv_convert::Error),

    #[error("Core error: {0}")]
    Core(#[from] mibconv_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("State error: {0}")]
    State(String),
}

/// How region coordinates on the detector plane are interpreted.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Units {
    /// Raw pixel indices
    Pixels,
    /// Positions in the calibrated axis units
    Calibrated,
}

impl Units {
    fn coordinate(self, value: f64) -> Coordinate {
        match self {
            Units::Pixels => Coordinate::Pixel(value.round() as i64),
            Units::Calibrated => Coordinate::Scaled(value),
        }
    }
}

/// Virtual bright-field region shape.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegionKind {
    /// Square window around the center
    Box,
    /// Disc (or annulus, with --inner) around the center
    Circle,
}

/// Merlin MIB acquisition converter.
#[derive(Parser)]
#[command(name = "mibconv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a MIB acquisition to calibrated output files
    Convert {
        /// Input MIB file
        input: PathBuf,

        /// Output extensions, one output file per entry
        #[arg(long, value_delimiter = ',', default_value = "blo")]
        output_ext: Vec<String>,

        /// Scan width in positions (inferred from the header when omitted)
        #[arg(long)]
        nx: Option<i64>,

        /// Scan height in positions (inferred when omitted)
        #[arg(long)]
        ny: Option<i64>,

        /// Cast the data to this element type before writing
        #[arg(long)]
        dtype: Option<String>,

        /// Chunk layout: one extent for all dimensions, or one per dimension
        #[arg(long, value_delimiter = ',')]
        chunk: Option<Vec<usize>>,

        /// Calibration table (delimited text with headers)
        #[arg(long)]
        calibrations: Option<PathBuf>,

        /// Acceleration voltage in kV
        #[arg(long)]
        voltage: Option<f64>,

        /// Nominal cameralength in cm
        #[arg(long)]
        cameralength: Option<f64>,

        /// Nominal magnification
        #[arg(long)]
        magnification: Option<f64>,

        /// Microscope mode (TEM, STEM, NBD, CBD, ...)
        #[arg(long)]
        mode: Option<String>,

        /// Camera name
        #[arg(long)]
        camera: Option<String>,

        /// Microscope name
        #[arg(long)]
        microscope: Option<String>,

        /// Overwrite existing output files
        #[arg(long)]
        overwrite: bool,
    },

    /// Show information about a MIB acquisition
    Info {
        /// Input MIB file
        input: PathBuf,

        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Extract a virtual bright-field image
    Vbf {
        /// Input MIB file
        input: PathBuf,

        /// Region shape
        #[arg(long, value_enum, default_value = "circle")]
        kind: RegionKind,

        /// Region center, x
        #[arg(long)]
        center_x: f64,

        /// Region center, y
        #[arg(long)]
        center_y: f64,

        /// Box width (box regions)
        #[arg(long, default_value = "10.0")]
        width: f64,

        /// Outer radius (circle regions)
        #[arg(long, default_value = "5.0")]
        radius: f64,

        /// Inner radius; zero integrates the full disc
        #[arg(long, default_value = "0.0")]
        inner: f64,

        /// Coordinate interpretation
        #[arg(long, value_enum, default_value = "pixels")]
        units: Units,

        /// Scan width in positions (inferred when omitted)
        #[arg(long)]
        nx: Option<i64>,

        /// Scan height in positions (inferred when omitted)
        #[arg(long)]
        ny: Option<i64>,

        /// Output CSV path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load(input: &PathBuf) -> Result<Converter> {
    let mut converter = Converter::new();
    converter.set_data_path(input)?;
    match converter.read()? {
        LoadOutcome::WithHeader => {}
        LoadOutcome::MissingHeader => {
            log::warn!("no companion header found for {}", input.display());
        }
    }
    Ok(converter)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output_ext,
            nx,
            ny,
            dtype,
            chunk,
            calibrations,
            voltage,
            cameralength,
            magnification,
            mode,
            camera,
            microscope,
            overwrite,
        } => {
            let mut converter = load(&input)?;

            if let Some(path) = calibrations {
                converter.set_calibration_table(CalibrationTable::from_csv_path(path)?);
            }
            if let Some(kilovolts) = voltage {
                converter.microscope_mut().set_acceleration_voltage(kilovolts);
            }
            if let Some(cameralength) = cameralength {
                converter
                    .microscope_mut()
                    .set_nominal_cameralength(cameralength);
            }
            if let Some(magnification) = magnification {
                converter
                    .microscope_mut()
                    .set_nominal_magnification(magnification);
            }
            if let Some(mode) = mode {
                converter.microscope_mut().set_mode(&mode);
            }
            if let Some(camera) = camera {
                converter.microscope_mut().set_camera(&camera);
            }
            if let Some(microscope) = microscope {
                converter.microscope_mut().set_microscope(&microscope);
            }

            if converter.dimension()? > 2 {
                converter.reshape(nx, ny)?;
            }
            if let Some(chunk) = chunk {
                let layout = if chunk.len() == 1 {
                    Chunks::Uniform(chunk[0])
                } else {
                    Chunks::PerDim(chunk)
                };
                converter.rechunk(&layout)?;
            }
            converter.apply_calibrations()?;
            if let Some(dtype) = dtype {
                converter.downsample(dtype.parse::<DType>()?)?;
            }

            for ext in &output_ext {
                let path = input.with_extension(ext.trim_start_matches('.'));
                converter.write(&path, overwrite)?;
                println!("Wrote: {}", path.display());
            }
        }

        Commands::Info { input, json } => {
            let converter = load(&input)?;
            let signal = converter
                .signal()
                .ok_or_else(|| CliError::State("no data loaded".to_string()))?;

            if json {
                let mut report = serde_json::json!({
                    "path": input.display().to_string(),
                    "shape": signal.shape(),
                    "dtype": signal.dtype().to_string(),
                    "kind": signal.kind().to_string(),
                    "frames": converter.frames()?,
                    "max_value": converter.max_value()?,
                    "parameters": serde_json::Value::Object(
                        converter.microscope().as_nested_mapping(),
                    ),
                });
                if let Some(header) = converter.header() {
                    report["header"] = serde_json::json!(header.as_mapping());
                }
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("File: {}", input.display());
                println!("Shape: {:?}", signal.shape());
                println!("Data type: {}", signal.dtype());
                println!("Frames: {}", converter.frames()?);
                println!(
                    "Detector: {} x {} pixels",
                    converter.ndx()?,
                    converter.ndy()?
                );
                println!("Max value: {}", converter.max_value()?);
                if let Some(header) = converter.header() {
                    println!("Timestamp: {}", header.timestamp());
                    if let Some(per_trigger) = header.frames_per_trigger() {
                        println!("Frames per trigger: {}", per_trigger);
                    }
                    if let Some(depth) = header.counter_depth() {
                        println!("Counter depth: {} bits", depth);
                    }
                }
            }
        }

        Commands::Vbf {
            input,
            kind,
            center_x,
            center_y,
            width,
            radius,
            inner,
            units,
            nx,
            ny,
            output,
        } => {
            let mut converter = load(&input)?;
            converter.reshape(nx, ny)?;

            let region = match kind {
                RegionKind::Box => VbfRegion::Box {
                    center_x: units.coordinate(center_x),
                    center_y: units.coordinate(center_y),
                    width: units.coordinate(width),
                },
                RegionKind::Circle => VbfRegion::Annulus {
                    center_x: units.coordinate(center_x),
                    center_y: units.coordinate(center_y),
                    radius: units.coordinate(radius),
                    inner: units.coordinate(inner),
                },
            };
            let image = converter.get_vbf(&region)?;

            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
                None => Box::new(std::io::stdout().lock()),
            };
            let (scan_y, scan_x) = image.dim();
            for y in 0..scan_y {
                let row: Vec<String> = (0..scan_x).map(|x| image[[y, x]].to_string()).collect();
                writeln!(out, "{}", row.join(","))?;
            }
            out.flush()?;
            if let Some(path) = output {
                println!("Wrote: {}", path.display());
            }
        }
    }

    Ok(())
}
