//! This module provides the 2D Fourier machinery shared by every stage of the retrieval pipeline:
//! planned forward/inverse transforms with numpy normalization, `fftshift`/`ifftshift`, and small
//! helpers for unit phasors and peak location.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayViewMut1, Axis, Zip};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Guard added to moduli before division, so that zero-valued pixels map to a zero phasor.
pub const EPSILON: f64 = 1e-16;

/// A planned 2D complex FFT for a fixed `(rows, cols)` shape.
///
/// Rows and columns are transformed independently with `rustfft` plans, in parallel through rayon.
/// The inverse transform is scaled by `1 / (rows * cols)`, like `numpy.fft.ifft2`.
#[derive(Clone)]
pub struct Fft2 {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2 {
    /// Plans the transforms for arrays of shape `(rows, cols)`.
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Fft2 {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    /// Plans the transforms for arrays shaped like `array`.
    pub fn for_shape<T>(array: &Array2<T>) -> Self {
        let (rows, cols) = array.dim();
        Fft2::new(rows, cols)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// In-place forward transform.
    pub fn forward(&self, data: &mut Array2<Complex64>) {
        debug_assert_eq!(data.dim(), (self.rows, self.cols));
        transform_lanes(data, Axis(0), &self.row_forward);
        transform_lanes(data, Axis(1), &self.col_forward);
    }

    /// In-place inverse transform, normalized by the number of samples.
    pub fn inverse(&self, data: &mut Array2<Complex64>) {
        debug_assert_eq!(data.dim(), (self.rows, self.cols));
        transform_lanes(data, Axis(0), &self.row_inverse);
        transform_lanes(data, Axis(1), &self.col_inverse);
        let norm = 1.0 / (self.rows * self.cols) as f64;
        data.par_mapv_inplace(|v| v * norm);
    }

    /// Forward transform of a real array.
    pub fn forward_real(&self, data: &Array2<f64>) -> Array2<Complex64> {
        let mut spectrum = data.mapv(|v| Complex64::new(v, 0.0));
        self.forward(&mut spectrum);
        spectrum
    }
}

/// Transforms every 1D lane of `data`. `iter_axis` is the axis iterated over, so `Axis(0)`
/// transforms the rows and `Axis(1)` the columns.
fn transform_lanes(data: &mut Array2<Complex64>, iter_axis: Axis, fft: &Arc<dyn Fft<f64>>) {
    let len = fft.len();
    data.axis_iter_mut(iter_axis).into_par_iter().for_each_init(
        || {
            (
                vec![Complex64::new(0.0, 0.0); len],
                vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()],
            )
        },
        |(buffer, scratch), mut lane: ArrayViewMut1<Complex64>| {
            for (b, v) in buffer.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process_with_scratch(buffer, scratch);
            for (v, b) in lane.iter_mut().zip(buffer.iter()) {
                *v = *b;
            }
        },
    );
}

/// Moves the zero-frequency sample to the centre of the array, like `numpy.fft.fftshift`.
pub fn fftshift<T: Clone>(array: &Array2<T>) -> Array2<T> {
    let (rows, cols) = array.dim();
    let (sy, sx) = (rows / 2, cols / 2);
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        array[((i + rows - sy) % rows, (j + cols - sx) % cols)].clone()
    })
}

/// Inverse of [`fftshift`], like `numpy.fft.ifftshift`. Both are identical for even sizes.
pub fn ifftshift<T: Clone>(array: &Array2<T>) -> Array2<T> {
    let (rows, cols) = array.dim();
    let (sy, sx) = (rows / 2, cols / 2);
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        array[((i + sy) % rows, (j + sx) % cols)].clone()
    })
}

/// Squared magnitude of the centred spectrum, `|fftshift(fft2(ifftshift(a)))|^2`.
pub fn centered_power_spectrum(array: &Array2<f64>) -> Array2<f64> {
    let fft = Fft2::for_shape(array);
    let spectrum = fft.forward_real(&ifftshift(array));
    fftshift(&spectrum).mapv(|c| c.norm_sqr())
}

/// Replaces every sample by its unit phasor `z / (|z| + EPSILON)`.
pub fn normalize_phasors(data: &mut Array2<Complex64>) {
    data.par_mapv_inplace(|z| z / (z.norm() + EPSILON));
}

/// Builds `exp(i * phi)` for every sample.
pub fn phasor_from_phase(phase: &Array2<f64>) -> Array2<Complex64> {
    phase.mapv(|phi| Complex64::from_polar(1.0, phi))
}

/// Elementwise `data *= factor`.
pub fn multiply_inplace(data: &mut Array2<Complex64>, factor: &Array2<Complex64>) {
    Zip::from(data).and(factor).par_for_each(|d, f| *d *= *f);
}

/// Location `(row, col)` of the first maximum in row-major order, like `numpy.where(a == a.max())`.
///
/// Returns `None` for empty arrays or arrays containing only NaNs.
pub fn argmax(array: &Array2<f64>) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), f64)> = None;
    for (idx, &v) in array.indexed_iter() {
        match best {
            Some((_, b)) if v <= b => {}
            _ if v.is_nan() => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Maximum value of an array, `f64::NEG_INFINITY` for empty arrays.
pub fn max_value(array: &Array2<f64>) -> f64 {
    array.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))
}

/// Signed frequency index of FFT-centred position `i` in an axis of length `n`: `i - n / 2`.
pub fn centered_index(i: usize, n: usize) -> i64 {
    i as i64 - (n / 2) as i64
}
