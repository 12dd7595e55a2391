//! Diffraction scale algebra and the relativistic electron wavelength.
//!
//! Diffraction-pattern pixel scales move between reciprocal-space,
//! real-space and angular regimes. All conversions chain through radians as
//! the canonical intermediate; reciprocal/real regimes need the electron
//! wavelength, so every conversion takes the acceleration voltage. A scale
//! converted under one voltage is only meaningful in that regime; callers
//! track which voltage was used.

use crate::{Error, Result};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Rest mass of the electron [kg].
const ELECTRON_MASS: f64 = 9.109_383_701_5e-31;
/// Elementary charge [C].
const ELEMENTARY_CHARGE: f64 = 1.602_176_62e-19;
/// Planck's constant [m^2 kg / s].
const PLANCK: f64 = 6.626_070_04e-34;
/// Speed of light in vacuum [m/s].
const LIGHT_SPEED: f64 = 299_792_458.0;

/// Physical pixel size of the Merlin (Medipix3) camera [um].
pub const MERLIN_PIXEL_SIZE_UM: f64 = 55.0;
/// Physical pixel size of the Gatan US1000 camera [um].
pub const US1000_PIXEL_SIZE_UM: f64 = 14.0;

/// Relativistic wavelength of an electron accelerated through `voltage` volts,
/// in angstroms.
///
/// `lambda = h / sqrt(2 m0 e V (1 + eV / (2 m0 c^2)))`. A NaN or non-positive
/// voltage yields NaN; callers check definedness before converting.
#[must_use]
pub fn wavelength(voltage: f64) -> f64 {
    if !(voltage > 0.0) {
        return f64::NAN;
    }
    let relativistic = 1.0
        + (ELEMENTARY_CHARGE * voltage) / (2.0 * ELECTRON_MASS * LIGHT_SPEED * LIGHT_SPEED);
    PLANCK / (2.0 * ELECTRON_MASS * ELEMENTARY_CHARGE * voltage * relativistic).sqrt() * 1e10
}

/// Physical pixel size in micrometers for a named camera.
///
/// # Errors
/// Returns [`Error::UnknownCamera`] for cameras without a known pixel size.
pub fn camera_pixel_size_um(camera: &str) -> Result<f64> {
    match camera {
        "Merlin" => Ok(MERLIN_PIXEL_SIZE_UM),
        "US1000" => Ok(US1000_PIXEL_SIZE_UM),
        other => Err(Error::UnknownCamera(other.to_string())),
    }
}

/// Unit regimes a diffraction scale can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffractionUnits {
    /// Reciprocal angstroms per pixel.
    InvAngstrom,
    /// Reciprocal nanometers per pixel.
    InvNm,
    /// Angstroms per pixel (real-space d-spacing).
    Angstrom,
    /// Nanometers per pixel (real-space d-spacing).
    Nm,
    /// Radians per pixel (scattering angle).
    Rad,
    /// Milliradians per pixel.
    Mrad,
    /// Degrees per pixel.
    Deg,
}

impl fmt::Display for DiffractionUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffractionUnits::InvAngstrom => "1/Å",
            DiffractionUnits::InvNm => "1/nm",
            DiffractionUnits::Angstrom => "Å",
            DiffractionUnits::Nm => "nm",
            DiffractionUnits::Rad => "rad",
            DiffractionUnits::Mrad => "mrad",
            DiffractionUnits::Deg => "deg",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DiffractionUnits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1/Å" | "1/A" => Ok(DiffractionUnits::InvAngstrom),
            "1/nm" => Ok(DiffractionUnits::InvNm),
            "Å" | "A" => Ok(DiffractionUnits::Angstrom),
            "nm" => Ok(DiffractionUnits::Nm),
            "rad" => Ok(DiffractionUnits::Rad),
            "mrad" => Ok(DiffractionUnits::Mrad),
            "deg" => Ok(DiffractionUnits::Deg),
            other => Err(Error::UnitConversion {
                from: other.to_string(),
                to: "diffraction units".to_string(),
            }),
        }
    }
}

/// A diffraction-pattern pixel scale: magnitude plus unit regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffractionScale {
    pub magnitude: f64,
    pub units: DiffractionUnits,
}

impl DiffractionScale {
    /// Creates a scale in the default reciprocal-angstrom regime.
    #[must_use]
    pub fn new(magnitude: f64) -> Self {
        Self {
            magnitude,
            units: DiffractionUnits::InvAngstrom,
        }
    }

    /// Creates a scale in an explicit regime.
    #[must_use]
    pub fn with_units(magnitude: f64, units: DiffractionUnits) -> Self {
        Self { magnitude, units }
    }

    /// Converts the scale to radians per pixel.
    ///
    /// # Errors
    /// Propagates [`Error::UnitConversion`] from unrecognized regimes
    /// (unreachable with the closed enum, kept for parity with text input).
    pub fn to_rad(&self, voltage: f64) -> Result<Self> {
        let lambda = wavelength(voltage);
        let magnitude = match self.units {
            DiffractionUnits::InvAngstrom => self.magnitude * lambda,
            DiffractionUnits::InvNm => self.magnitude / 10.0 * lambda,
            DiffractionUnits::Angstrom => lambda / self.magnitude,
            DiffractionUnits::Nm => lambda / (10.0 * self.magnitude),
            DiffractionUnits::Deg => self.magnitude * PI / 180.0,
            DiffractionUnits::Mrad => self.magnitude / 1000.0,
            DiffractionUnits::Rad => self.magnitude,
        };
        Ok(Self {
            magnitude,
            units: DiffractionUnits::Rad,
        })
    }

    /// Converts the scale to milliradians per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_mrad(&self, voltage: f64) -> Result<Self> {
        let rad = self.to_rad(voltage)?;
        Ok(Self {
            magnitude: rad.magnitude * 1000.0,
            units: DiffractionUnits::Mrad,
        })
    }

    /// Converts the scale to degrees per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_deg(&self, voltage: f64) -> Result<Self> {
        let rad = self.to_rad(voltage)?;
        Ok(Self {
            magnitude: rad.magnitude * 180.0 / PI,
            units: DiffractionUnits::Deg,
        })
    }

    /// Converts the scale to reciprocal angstroms per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_inv_angstrom(&self, voltage: f64) -> Result<Self> {
        let rad = self.to_rad(voltage)?;
        Ok(Self {
            magnitude: rad.magnitude / wavelength(voltage),
            units: DiffractionUnits::InvAngstrom,
        })
    }

    /// Converts the scale to reciprocal nanometers per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_inv_nm(&self, voltage: f64) -> Result<Self> {
        let inv_angstrom = self.to_inv_angstrom(voltage)?;
        Ok(Self {
            magnitude: inv_angstrom.magnitude * 10.0,
            units: DiffractionUnits::InvNm,
        })
    }

    /// Converts the scale to angstroms per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_angstrom(&self, voltage: f64) -> Result<Self> {
        let inv_angstrom = self.to_inv_angstrom(voltage)?;
        Ok(Self {
            magnitude: 1.0 / inv_angstrom.magnitude,
            units: DiffractionUnits::Angstrom,
        })
    }

    /// Converts the scale to nanometers per pixel.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn to_nm(&self, voltage: f64) -> Result<Self> {
        let angstrom = self.to_angstrom(voltage)?;
        Ok(Self {
            magnitude: angstrom.magnitude / 10.0,
            units: DiffractionUnits::Nm,
        })
    }

    /// Converts the scale to an arbitrary target regime.
    ///
    /// # Errors
    /// See [`DiffractionScale::to_rad`].
    pub fn convert_to(&self, units: DiffractionUnits, voltage: f64) -> Result<Self> {
        match units {
            DiffractionUnits::InvAngstrom => self.to_inv_angstrom(voltage),
            DiffractionUnits::InvNm => self.to_inv_nm(voltage),
            DiffractionUnits::Angstrom => self.to_angstrom(voltage),
            DiffractionUnits::Nm => self.to_nm(voltage),
            DiffractionUnits::Rad => self.to_rad(voltage),
            DiffractionUnits::Mrad => self.to_mrad(voltage),
            DiffractionUnits::Deg => self.to_deg(voltage),
        }
    }

    /// Cameralength in cm matching this scale on a named camera.
    ///
    /// `L = pixel_size / tan(theta)` with theta the per-pixel scattering
    /// angle.
    ///
    /// # Errors
    /// Returns [`Error::UnknownCamera`] for unknown camera names.
    pub fn calculate_cameralength(&self, voltage: f64, camera: &str) -> Result<f64> {
        let pixel_size_cm = camera_pixel_size_um(camera)? * 1e-4;
        let rad = self.to_rad(voltage)?;
        Ok(pixel_size_cm / rad.magnitude.tan())
    }
}

impl fmt::Display for DiffractionScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.units)
    }
}
