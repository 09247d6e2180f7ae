//! Relative phase between the two field components.
//!
//! The X and Y retrievals each recover their phase only up to an arbitrary constant. Both are
//! referenced to a common pixel, and the phase difference measured through the Stokes parameters
//! is applied to the Y component.

use crate::dataset::N_CHANNELS;
use crate::math_tools::{normalize_phasors, EPSILON};
use ndarray::{Array2, Zip};
use num_complex::Complex64;

/// Stokes parameters of a polarimetric measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stokes {
    pub s0: Array2<f64>,
    pub s1: Array2<f64>,
    pub s2: Array2<f64>,
    pub s3: Array2<f64>,
}

impl Stokes {
    /// Phase difference between the Y and X components, `atan2(S3, S2)`.
    pub fn phase_difference(&self) -> Array2<f64> {
        Zip::from(&self.s3)
            .and(&self.s2)
            .map_collect(|s3, s2| s3.atan2(*s2))
    }
}

/// Computes the Stokes parameters from the six channel images.
///
/// `S0 = sum(I) / 3`, `S1 = I2 - I1`, `S2 = I1 - I3`, `S3 = I4 - I5`.
pub fn stokes_parameters(channels: &[Array2<f64>; N_CHANNELS]) -> Stokes {
    let mut s0 = Array2::<f64>::zeros(channels[0].dim());
    for image in channels.iter() {
        s0 += image;
    }
    Stokes {
        s0: s0 / 3.0,
        s1: &channels[2] - &channels[1],
        s2: &channels[1] - &channels[3],
        s3: &channels[4] - &channels[5],
    }
}

/// Phase difference `atan2(S3, S2)` of the six channel images.
pub fn phase_difference(channels: &[Array2<f64>; N_CHANNELS]) -> Array2<f64> {
    stokes_parameters(channels).phase_difference()
}

/// Divides every sample by the unit phasor at `origin`. A zero reference is left alone.
fn reference_to(field: &mut Array2<Complex64>, origin: (usize, usize), name: &str) {
    let reference = field[origin];
    if reference.norm() <= EPSILON {
        log::warn!("{name} component vanishes at {origin:?}, phase left unreferenced");
        return;
    }
    field.par_mapv_inplace(|z| z / reference);
    // exact unit phasor at the reference pixel
    field[origin] = Complex64::new(1.0, 0.0);
}

/// Aligns the recovered phases of both components.
///
/// Both fields are reduced to unit phasors and divided by their own value at `origin`, which
/// becomes exactly `1 + 0i`. The Y component is then rotated by `exp(i * delta)`.
///
/// # Arguments
/// - `ex`, `ey`: the recovered fields.
/// - `origin`: reference pixel `(row, col)`.
/// - `delta`: phase difference between the components at `origin`.
///
/// # Returns
/// The aligned pair `(ex, ey)`.
pub fn align(
    ex: &Array2<Complex64>,
    ey: &Array2<Complex64>,
    origin: (usize, usize),
    delta: f64,
) -> (Array2<Complex64>, Array2<Complex64>) {
    let mut ex = ex.clone();
    let mut ey = ey.clone();
    normalize_phasors(&mut ex);
    normalize_phasors(&mut ey);
    reference_to(&mut ex, origin, "X");
    reference_to(&mut ey, origin, "Y");
    let rotation = Complex64::from_polar(1.0, delta);
    ey.par_mapv_inplace(|z| z * rotation);
    (ex, ey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn channels(values: [f64; N_CHANNELS]) -> [Array2<f64>; N_CHANNELS] {
        std::array::from_fn(|i| Array2::from_elem((2, 2), values[i]))
    }

    #[test]
    fn test_stokes_parameters() {
        let stokes = stokes_parameters(&channels([1.0, 2.0, 4.0, 8.0, 16.0, 32.0]));
        assert_eq!(stokes.s0[(0, 0)], 21.0);
        assert_eq!(stokes.s1[(0, 0)], 2.0);
        assert_eq!(stokes.s2[(0, 0)], -6.0);
        assert_eq!(stokes.s3[(0, 0)], -16.0);
    }

    #[test]
    fn test_phase_difference_quadrants() {
        // circular light: S2 = 0, S3 > 0
        let delta = phase_difference(&channels([1.0, 1.0, 1.0, 1.0, 2.0, 0.0]));
        assert_abs_diff_eq!(delta[(1, 1)], PI / 2.0, epsilon = 1e-12);
        // diagonal linear light: S2 > 0, S3 = 0
        let delta = phase_difference(&channels([1.0, 2.0, 1.0, 0.0, 1.0, 1.0]));
        assert_abs_diff_eq!(delta[(0, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reference_pixel_is_exactly_one() {
        let ex = Array2::from_shape_fn((4, 4), |(i, j)| {
            Complex64::from_polar(1.0 + i as f64, 0.3 * j as f64 - 0.7 * i as f64)
        });
        let ey = Array2::from_shape_fn((4, 4), |(i, j)| {
            Complex64::from_polar(2.0, 1.1 * (i + j) as f64)
        });
        let origin = (2, 1);
        let (ax, ay) = align(&ex, &ey, origin, 0.0);
        assert_eq!(ax[origin], Complex64::new(1.0, 0.0));
        assert_eq!(ay[origin], Complex64::new(1.0, 0.0));
        for z in ax.iter().chain(ay.iter()) {
            assert_abs_diff_eq!(z.norm(), 1.0, epsilon = 1e-12);
        }
        // relative phases survive the referencing
        let expected = (ex[(0, 0)] / ex[origin]).arg();
        assert_abs_diff_eq!(ax[(0, 0)].arg(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_delta_is_applied_to_y_only() {
        let ex = Array2::from_elem((3, 3), Complex64::new(0.0, 2.0));
        let ey = Array2::from_elem((3, 3), Complex64::new(-1.0, 0.0));
        let (ax, ay) = align(&ex, &ey, (1, 1), PI / 3.0);
        assert_eq!(ax[(1, 1)], Complex64::new(1.0, 0.0));
        assert_abs_diff_eq!(ay[(1, 1)].arg(), PI / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ay[(0, 2)].arg(), PI / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_reference_leaves_channel_unreferenced() {
        let mut ex = Array2::from_elem((2, 2), Complex64::new(0.0, 1.0));
        ex[(0, 0)] = Complex64::new(0.0, 0.0);
        let ey = Array2::from_elem((2, 2), Complex64::new(1.0, 0.0));
        let (ax, _) = align(&ex, &ey, (0, 0), 0.0);
        assert_eq!(ax[(0, 0)], Complex64::new(0.0, 0.0));
        assert_abs_diff_eq!(ax[(1, 1)].im, 1.0, epsilon = 1e-12);
    }
}
