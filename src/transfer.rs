//! Band-limited angular-spectrum kernel for free-space propagation between planes.
//!
//! All lengths are expressed in units of the wavelength.

use crate::error::RetrieverError;
use crate::math_tools::{centered_index, ifftshift};
use ndarray::Array2;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Parameters a [`TransferFunction`] is built from.
///
/// Derived kernels are rebuilt only when these change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferInputs {
    pub dim: usize,
    pub pixel_size: f64,
    pub dz: f64,
    pub bandwidth: f64,
}

/// Free-space transfer function `H` between two planes `dz` apart.
#[derive(Debug, Clone)]
pub struct TransferFunction {
    inputs: TransferInputs,
    h: Array2<Complex64>,
    gamma: Array2<f64>,
}

/// Squared normalized transverse frequency `rho^2` of the centred position `(i, j)`.
fn rho_squared(i: usize, j: usize, dim: usize, pixel_size: f64) -> f64 {
    let scale = 0.5 / pixel_size / (dim / 2) as f64;
    let uy = centered_index(i, dim) as f64 * scale;
    let ux = centered_index(j, dim) as f64 * scale;
    uy * uy + ux * ux
}

impl TransferFunction {
    /// Builds the kernel for a `dim x dim` window.
    ///
    /// # Arguments
    /// - `dim`: side of the analysis window.
    /// - `pixel_size`: effective pixel pitch over the wavelength.
    /// - `dz`: distance between consecutive planes over the wavelength.
    /// - `bandwidth`: radius of the passband, in frequency bins.
    ///
    /// # Returns
    /// The transfer function, stored in FFT order.
    pub fn new(
        dim: usize,
        pixel_size: f64,
        dz: f64,
        bandwidth: f64,
    ) -> Result<Self, RetrieverError> {
        if dim < 2 {
            return Err(RetrieverError::Shape(format!(
                "window side must be at least 2, got {dim}"
            )));
        }
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(RetrieverError::Configuration(format!(
                "pixel size must be positive, got {pixel_size}"
            )));
        }
        if !dz.is_finite() {
            return Err(RetrieverError::Configuration(format!(
                "invalid plane spacing {dz}"
            )));
        }
        if !(bandwidth.is_finite() && bandwidth >= 0.0) {
            return Err(RetrieverError::Configuration(format!(
                "bandwidth must be non-negative, got {bandwidth}"
            )));
        }

        let gamma = Array2::from_shape_fn((dim, dim), |(i, j)| {
            let rho2 = rho_squared(i, j, dim, pixel_size);
            if rho2 < 1.0 {
                (1.0 - rho2).sqrt()
            } else {
                0.0
            }
        });
        let bw2 = bandwidth * bandwidth;
        let centred = Array2::from_shape_fn((dim, dim), |(i, j)| {
            let ky = centered_index(i, dim) as f64;
            let kx = centered_index(j, dim) as f64;
            if ky * ky + kx * kx < bw2 {
                Complex64::from_polar(1.0, 2.0 * PI * gamma[(i, j)] * dz)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        log::debug!(
            "transfer function: dim {dim}, pixel {pixel_size}, dz {dz}, bandwidth {bandwidth}"
        );

        Ok(TransferFunction {
            inputs: TransferInputs {
                dim,
                pixel_size,
                dz,
                bandwidth,
            },
            h: ifftshift(&centred),
            gamma,
        })
    }

    /// Builds the kernel from a parameter set.
    pub fn from_inputs(inputs: TransferInputs) -> Result<Self, RetrieverError> {
        Self::new(inputs.dim, inputs.pixel_size, inputs.dz, inputs.bandwidth)
    }

    pub fn inputs(&self) -> &TransferInputs {
        &self.inputs
    }

    /// The kernel in FFT order, ready to multiply a spectrum.
    pub fn h(&self) -> &Array2<Complex64> {
        &self.h
    }

    pub fn into_h(self) -> Array2<Complex64> {
        self.h
    }

    /// Centred map of `gamma = sqrt(1 - rho^2)`, zero for evanescent frequencies.
    pub fn gamma(&self) -> &Array2<f64> {
        &self.gamma
    }

    /// Centred longitudinal frequencies `wz = sqrt(1 - rho^2)` as complex numbers.
    ///
    /// Propagating frequencies are real, evanescent ones purely imaginary.
    pub fn longitudinal_frequencies(&self) -> Array2<Complex64> {
        longitudinal_frequencies(self.inputs.dim, self.inputs.pixel_size)
    }
}

/// Centred longitudinal-frequency map of a `dim x dim` window with the given pixel size.
pub fn longitudinal_frequencies(dim: usize, pixel_size: f64) -> Array2<Complex64> {
    Array2::from_shape_fn((dim, dim), |(i, j)| {
        Complex64::new(1.0 - rho_squared(i, j, dim, pixel_size), 0.0).sqrt()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_kernel_is_unit_modulus_inside_the_passband() {
        let dim = 32;
        let bandwidth = 6.0;
        let tf = TransferFunction::new(dim, 2.0, 150.0, bandwidth).unwrap();
        let h = tf.h();
        for i in 0..dim {
            for j in 0..dim {
                // FFT order: index i carries the frequency i or i - dim
                let ky = if i < dim / 2 { i as f64 } else { i as f64 - dim as f64 };
                let kx = if j < dim / 2 { j as f64 } else { j as f64 - dim as f64 };
                if ky * ky + kx * kx < bandwidth * bandwidth {
                    assert_abs_diff_eq!(h[(i, j)].norm(), 1.0, epsilon = 1e-12);
                } else {
                    assert_eq!(h[(i, j)], Complex64::new(0.0, 0.0));
                }
            }
        }
    }

    #[test]
    fn test_zero_frequency_accumulates_full_phase() {
        let dz = 0.3;
        let tf = TransferFunction::new(16, 1.5, dz, 4.0).unwrap();
        let expected = Complex64::from_polar(1.0, 2.0 * PI * dz);
        assert_abs_diff_eq!(tf.h()[(0, 0)].re, expected.re, epsilon = 1e-12);
        assert_abs_diff_eq!(tf.h()[(0, 0)].im, expected.im, epsilon = 1e-12);
        assert_eq!(tf.gamma()[(8, 8)], 1.0);
    }

    #[test]
    fn test_evanescent_frequencies() {
        // pixel smaller than half a wavelength reaches beyond rho = 1 at the border
        let tf = TransferFunction::new(16, 0.3, 10.0, 100.0).unwrap();
        assert_eq!(tf.gamma()[(0, 0)], 0.0);
        let wz = tf.longitudinal_frequencies();
        assert_eq!(wz[(0, 0)].re, 0.0);
        assert!(wz[(0, 0)].im > 0.0);
        assert_abs_diff_eq!(wz[(8, 8)].re, 1.0, epsilon = 1e-12);
        // outside the evanescent region the real map and the complex map agree
        assert_abs_diff_eq!(wz[(8, 9)].re, tf.gamma()[(8, 9)], epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert!(matches!(
            TransferFunction::new(1, 1.0, 1.0, 1.0),
            Err(RetrieverError::Shape(_))
        ));
        assert!(matches!(
            TransferFunction::new(8, 0.0, 1.0, 1.0),
            Err(RetrieverError::Configuration(_))
        ));
        assert!(matches!(
            TransferFunction::new(8, 1.0, 1.0, -1.0),
            Err(RetrieverError::Configuration(_))
        ));
    }

    #[test]
    fn test_inputs_round_trip() {
        let tf = TransferFunction::new(8, 1.0, 2.0, 3.0).unwrap();
        let rebuilt = TransferFunction::from_inputs(*tf.inputs()).unwrap();
        assert_eq!(rebuilt.h(), tf.h());
    }
}
