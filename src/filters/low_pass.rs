use crate::filters::filter::{Filter, FilterConfig, FilterDomain};
use crate::math_tools::{centered_index, Fft2};
use ndarray::Array2;
use num_complex::Complex64;

/// Removes every spatial frequency outside a centred disk.
///
/// Frequencies with `kx^2 + ky^2 >= radius^2` (signed frequency indices) are set to zero. The
/// real part of the inverse transform is clipped to non-negative values, since the filtered maps
/// are amplitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPass {
    pub radius: f64,
}

impl LowPass {
    pub fn new(radius: f64) -> Self {
        LowPass { radius }
    }

    /// Whether the frequency at FFT-ordered position `(i, j)` of a `(rows, cols)` spectrum passes.
    fn passes(&self, (i, j): (usize, usize), (rows, cols): (usize, usize)) -> bool {
        // FFT order: shift by half the length to get the centred index
        let ky = centered_index((i + rows / 2) % rows, rows) as f64;
        let kx = centered_index((j + cols / 2) % cols, cols) as f64;
        ky * ky + kx * kx < self.radius * self.radius
    }
}

impl Filter for LowPass {
    fn config(&self) -> FilterConfig {
        FilterConfig {
            name: "Low Pass".to_string(),
            description: format!("Keeps spatial frequencies within {} bins", self.radius),
            domain: FilterDomain::Frequency,
        }
    }

    fn filter(&self, input: &Array2<f64>) -> Array2<f64> {
        let shape = input.dim();
        if shape.0 == 0 || shape.1 == 0 {
            return input.clone();
        }
        let fft = Fft2::for_shape(input);
        let mut spectrum = fft.forward_real(input);
        for (idx, v) in spectrum.indexed_iter_mut() {
            if !self.passes(idx, shape) {
                *v = Complex64::new(0.0, 0.0);
            }
        }
        fft.inverse(&mut spectrum);
        spectrum.mapv(|c| c.re.max(0.0))
    }
}
