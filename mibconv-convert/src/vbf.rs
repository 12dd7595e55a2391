//! Virtual bright-field (VBF) extraction.
//!
//! A VBF image integrates detector-plane intensity inside a region of
//! interest, once per scan position. Region coordinates are an explicit
//! tagged type: a pixel index or a scaled (axis-calibrated) position, so a
//! center given in reciprocal units and one given in pixels can never be
//! confused.

use crate::{Error, Result};
use mibconv_core::{Axis, Signal};
use ndarray::{Array2, ArrayViewD, Axis as NdAxis};

/// One detector-plane coordinate: either a raw pixel index or a position in
/// the axis's calibrated units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinate {
    Pixel(i64),
    Scaled(f64),
}

impl Coordinate {
    /// Resolves the coordinate to a (fractional) pixel position on an axis.
    #[must_use]
    pub fn to_pixel(self, axis: &Axis) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Coordinate::Pixel(index) => index as f64,
            Coordinate::Scaled(position) => (position - axis.offset) / axis.scale,
        }
    }
}

/// Region of the detector plane to integrate over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VbfRegion {
    /// Axis-aligned square window around a center.
    Box {
        center_x: Coordinate,
        center_y: Coordinate,
        width: Coordinate,
    },
    /// Annulus around a center; `inner` of zero gives a full disc.
    Annulus {
        center_x: Coordinate,
        center_y: Coordinate,
        radius: Coordinate,
        inner: Coordinate,
    },
}

/// Detector-plane mask for a region, given the two detector axes `(ky, kx)`.
fn region_mask(region: &VbfRegion, ky: &Axis, kx: &Axis) -> Result<Vec<(usize, usize)>> {
    let mut mask = Vec::new();
    match *region {
        VbfRegion::Box {
            center_x,
            center_y,
            width,
        } => {
            let cx = center_x.to_pixel(kx);
            let cy = center_y.to_pixel(ky);
            // Widths are lengths, not positions: a scaled width divides by
            // the axis scale without the offset shift.
            let half = match width {
                #[allow(clippy::cast_precision_loss)]
                Coordinate::Pixel(w) => w as f64 / 2.0,
                Coordinate::Scaled(w) => w / kx.scale / 2.0,
            };
            if !(half > 0.0) {
                return Err(Error::InvalidArgument(format!(
                    "box width must be positive, got {width:?}"
                )));
            }
            for row in 0..ky.size {
                for col in 0..kx.size {
                    #[allow(clippy::cast_precision_loss)]
                    if (row as f64 - cy).abs() <= half && (col as f64 - cx).abs() <= half {
                        mask.push((row, col));
                    }
                }
            }
        }
        VbfRegion::Annulus {
            center_x,
            center_y,
            radius,
            inner,
        } => {
            let cx = center_x.to_pixel(kx);
            let cy = center_y.to_pixel(ky);
            let to_length = |c: Coordinate| -> f64 {
                match c {
                    #[allow(clippy::cast_precision_loss)]
                    Coordinate::Pixel(r) => r as f64,
                    Coordinate::Scaled(r) => r / kx.scale,
                }
            };
            let outer = to_length(radius);
            let inner = to_length(inner);
            if !(outer > 0.0) || inner < 0.0 || inner >= outer {
                return Err(Error::InvalidArgument(format!(
                    "annulus radii must satisfy 0 <= inner < radius, got {inner} and {outer}"
                )));
            }
            for row in 0..ky.size {
                for col in 0..kx.size {
                    #[allow(clippy::cast_precision_loss)]
                    let distance =
                        ((row as f64 - cy).powi(2) + (col as f64 - cx).powi(2)).sqrt();
                    if distance >= inner && distance <= outer {
                        mask.push((row, col));
                    }
                }
            }
        }
    }
    if mask.is_empty() {
        log::warn!("VBF region covers no detector pixels");
    }
    Ok(mask)
}

/// Computes a VBF image from a 4-D `(scan y, scan x, detector y, detector x)`
/// signal.
///
/// # Errors
/// Returns [`Error::Dimension`] for non-4-D data and
/// [`Error::InvalidArgument`] for degenerate regions.
pub fn virtual_bright_field(signal: &Signal, region: &VbfRegion) -> Result<Array2<f64>> {
    if signal.ndim() != 4 {
        return Err(Error::Dimension(format!(
            "VBF extraction requires 4-D scan data, got {}-D",
            signal.ndim()
        )));
    }
    let detector = signal.signal_axes();
    let mask = region_mask(region, detector[0], detector[1])?;

    let shape = signal.shape();
    let (scan_y, scan_x) = (shape[0], shape[1]);
    let mut image = Array2::<f64>::zeros((scan_y, scan_x));
    for (y, plane) in signal.data().axis_iter(NdAxis(0)).enumerate() {
        for (x, frame) in plane.axis_iter(NdAxis(0)).enumerate() {
            image[[y, x]] = masked_sum(&frame, &mask);
        }
    }
    Ok(image)
}

fn masked_sum(frame: &ArrayViewD<'_, f64>, mask: &[(usize, usize)]) -> f64 {
    mask.iter().map(|&(row, col)| frame[[row, col]]).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mibconv_core::{DType, SignalKind};
    use ndarray::ArrayD;

    fn scan_signal() -> Signal {
        // 2x2 scan of 5x5 frames; every pixel of frame (y, x) holds y*10 + x.
        let data = ArrayD::from_shape_fn(vec![2, 2, 5, 5], |idx| {
            (idx[0] * 10 + idx[1]) as f64
        });
        let axes = vec![
            Axis::uncalibrated("y", 2, true),
            Axis::uncalibrated("x", 2, true),
            Axis::uncalibrated("ky", 5, false),
            Axis::uncalibrated("kx", 5, false),
        ];
        Signal::new(data, axes, SignalKind::Diffraction, DType::U16).unwrap()
    }

    #[test]
    fn test_box_sums_window_per_scan_position() {
        let signal = scan_signal();
        let region = VbfRegion::Box {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            width: Coordinate::Pixel(2),
        };
        let image = virtual_bright_field(&signal, &region).unwrap();
        assert_eq!(image.dim(), (2, 2));
        // 3x3 window of constant frames: 9 pixels each.
        assert_relative_eq!(image[[0, 0]], 0.0);
        assert_relative_eq!(image[[0, 1]], 9.0);
        assert_relative_eq!(image[[1, 0]], 90.0);
        assert_relative_eq!(image[[1, 1]], 99.0);
    }

    #[test]
    fn test_annulus_excludes_inner_disc() {
        let signal = scan_signal();
        let full = VbfRegion::Annulus {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            radius: Coordinate::Pixel(2),
            inner: Coordinate::Pixel(0),
        };
        let ring = VbfRegion::Annulus {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            radius: Coordinate::Pixel(2),
            inner: Coordinate::Pixel(1),
        };
        let full_image = virtual_bright_field(&signal, &full).unwrap();
        let ring_image = virtual_bright_field(&signal, &ring).unwrap();
        // Frames are constant, so the ring integrates fewer pixels.
        assert!(ring_image[[1, 1]] < full_image[[1, 1]]);
    }

    #[test]
    fn test_scaled_coordinates_resolve_through_axis() {
        let mut signal = scan_signal();
        for axis in signal.axes_mut().iter_mut().filter(|a| !a.navigate) {
            axis.scale = 0.5;
            axis.offset = -1.0;
        }
        // Scaled (0.0, 0.0) lands on pixel (2, 2).
        let scaled = VbfRegion::Box {
            center_x: Coordinate::Scaled(0.0),
            center_y: Coordinate::Scaled(0.0),
            width: Coordinate::Scaled(1.0),
        };
        let pixel = VbfRegion::Box {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            width: Coordinate::Pixel(2),
        };
        let from_scaled = virtual_bright_field(&signal, &scaled).unwrap();
        let from_pixels = virtual_bright_field(&signal, &pixel).unwrap();
        assert_relative_eq!(from_scaled[[1, 1]], from_pixels[[1, 1]]);
    }

    #[test]
    fn test_requires_4d_data() {
        let data = ArrayD::<f64>::zeros(vec![5, 5]);
        let axes = vec![
            Axis::uncalibrated("ky", 5, false),
            Axis::uncalibrated("kx", 5, false),
        ];
        let signal = Signal::new(data, axes, SignalKind::Diffraction, DType::U16).unwrap();
        let region = VbfRegion::Box {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            width: Coordinate::Pixel(2),
        };
        assert!(matches!(
            virtual_bright_field(&signal, &region),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn test_degenerate_regions_are_rejected() {
        let signal = scan_signal();
        let zero_width = VbfRegion::Box {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            width: Coordinate::Pixel(0),
        };
        assert!(matches!(
            virtual_bright_field(&signal, &zero_width),
            Err(Error::InvalidArgument(_))
        ));
        let inverted = VbfRegion::Annulus {
            center_x: Coordinate::Pixel(2),
            center_y: Coordinate::Pixel(2),
            radius: Coordinate::Pixel(1),
            inner: Coordinate::Pixel(2),
        };
        assert!(matches!(
            virtual_bright_field(&signal, &inverted),
            Err(Error::InvalidArgument(_))
        ));
    }
}
