//! Estimation of the spatial-frequency support of the beam.

use crate::math_tools::{centered_power_spectrum, max_value};
use ndarray::{Array1, Array2, Axis};

/// Default relative threshold below which the spectrum is considered empty.
pub const DEFAULT_TOL: f64 = 1e-4;

/// Centred power spectrum of an irradiance map, `|fftshift(fft2(ifftshift(I)))|^2`.
pub fn power_spectrum(irradiance: &Array2<f64>) -> Array2<f64> {
    centered_power_spectrum(irradiance)
}

/// Mean of `spectrum` along its longer axis, a profile along the shorter one.
fn radial_profile(spectrum: &Array2<f64>) -> Array1<f64> {
    let (rows, cols) = spectrum.dim();
    let axis = if rows >= cols { Axis(0) } else { Axis(1) };
    spectrum
        .mean_axis(axis)
        .unwrap_or_else(|| Array1::zeros(0))
}

/// Radius (in frequency bins) of the support of a centred power spectrum.
///
/// Walks outward from the centre `len / 2` of the radial profile and returns the first radius
/// `r >= 1` at which the profile falls below `max(spectrum) * tol` on both sides of the centre.
/// A side that already lies outside the profile counts as below the threshold.
///
/// # Returns
/// `None` when the profile never drops below the threshold, or when the spectrum is empty.
pub fn estimate_radius(spectrum: &Array2<f64>, tol: f64) -> Option<usize> {
    let profile = radial_profile(spectrum);
    let len = profile.len();
    if len == 0 {
        return None;
    }
    let threshold = max_value(spectrum) * tol;
    let center = len / 2;
    let below = |i: Option<usize>| match i {
        Some(i) if i < len => profile[i] < threshold,
        _ => true,
    };
    (1..=center.max(len - center)).find(|&r| {
        let left = center.checked_sub(r);
        let right = Some(center + r);
        // at least one side must still be inside the profile
        (left.is_some() || center + r < len) && below(left) && below(right)
    })
}
