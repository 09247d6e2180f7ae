//! Selection of the square analysis window that contains most of the beam energy.
//!
//! The irradiance map is cross-correlated with a centred `dim x dim` indicator kernel in the
//! Fourier domain; the peak of the squared correlation marks the window centre.

use crate::error::WindowError;
use crate::math_tools::{argmax, Fft2};
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
///
/// `top = (y0, x0)` is inclusive and `bottom = (y1, x1)` is exclusive, so the window covers
/// `image[y0..y1, x0..x1]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub top: (usize, usize),
    pub bottom: (usize, usize),
}

impl Window {
    pub fn new(top: (usize, usize), bottom: (usize, usize)) -> Self {
        Window { top, bottom }
    }

    pub fn height(&self) -> usize {
        self.bottom.0.saturating_sub(self.top.0)
    }

    pub fn width(&self) -> usize {
        self.bottom.1.saturating_sub(self.top.1)
    }

    /// Side length if the window is a non-empty square.
    pub fn side(&self) -> Option<usize> {
        let (h, w) = (self.height(), self.width());
        (h == w && h > 0).then_some(h)
    }

    /// Whether the window lies fully inside an image of shape `(rows, cols)`.
    pub fn fits(&self, (rows, cols): (usize, usize)) -> bool {
        self.top.0 < self.bottom.0
            && self.top.1 < self.bottom.1
            && self.bottom.0 <= rows
            && self.bottom.1 <= cols
    }

    /// View of the windowed region of `image`. The window must fit the image.
    pub fn crop<'a>(&self, image: &'a Array2<f64>) -> ArrayView2<'a, f64> {
        image.slice(s![self.top.0..self.bottom.0, self.top.1..self.bottom.1])
    }
}

/// Places a `dim x dim` window on the region of `irradiance` with the highest energy content.
///
/// The window is shifted inward, never resized, when the correlation peak is closer than
/// `dim / 2` to an edge.
///
/// # Arguments
/// - `irradiance`: the irradiance map of the full sensor image.
/// - `dim`: side of the window.
///
/// # Returns
/// The window bounds, always satisfying `0 <= x0 < x1 <= width` and `0 <= y0 < y1 <= height`.
pub fn select_window(irradiance: &Array2<f64>, dim: usize) -> Result<Window, WindowError> {
    let (rows, cols) = irradiance.dim();
    if dim == 0 || dim > rows || dim > cols {
        return Err(WindowError::TooLarge { dim, rows, cols });
    }

    // indicator kernel centred on the origin, in FFT ordering
    let mut rect = Array2::<f64>::zeros((rows, cols));
    for dy in 0..dim {
        for dx in 0..dim {
            let i = (dy + rows - dim / 2) % rows;
            let j = (dx + cols - dim / 2) % cols;
            rect[(i, j)] = 1.0;
        }
    }

    // cross-correlation: correlation[p] sums the irradiance over the window starting at p - dim / 2
    let fft = Fft2::new(rows, cols);
    let mut correlation = fft.forward_real(irradiance);
    let ft_rect = fft.forward_real(&rect);
    correlation.zip_mut_with(&ft_rect, |a, b| *a *= b.conj());
    fft.inverse(&mut correlation);
    let energy = correlation.mapv(|c: Complex64| c.norm_sqr());

    let (cy, cx) = argmax(&energy).unwrap_or((rows / 2, cols / 2));
    let (y0, y1) = clip_span(cy, dim, rows);
    let (x0, x1) = clip_span(cx, dim, cols);
    log::debug!("window centred at ({cy}, {cx}): ({y0}, {x0}) - ({y1}, {x1})");
    Ok(Window::new((y0, x0), (y1, x1)))
}

/// Span of length `dim` centred on `center`, moved inward to stay within `0..len`.
fn clip_span(center: usize, dim: usize, len: usize) -> (usize, usize) {
    let start = center.saturating_sub(dim / 2).min(len - dim);
    (start, start + dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_spot(rows: usize, cols: usize, cy: f64, cx: f64, sigma: f64) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| {
            let r2 = (i as f64 - cy).powi(2) + (j as f64 - cx).powi(2);
            (-r2 / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn test_window_survives_a_json_round_trip() {
        let window = Window::new((3, 5), (35, 37));
        let json = serde_json::to_string(&window).unwrap();
        assert_eq!(serde_json::from_str::<Window>(&json).unwrap(), window);
    }

    #[test]
    fn test_window_is_centred_on_the_spot() {
        let irradiance = gaussian_spot(64, 80, 30.5, 45.5, 3.0);
        let window = select_window(&irradiance, 16).unwrap();
        assert_eq!(window, Window::new((23, 38), (39, 54)));
        assert_eq!(window.side(), Some(16));
    }

    #[test]
    fn test_window_is_shifted_inward_at_the_edges() {
        let irradiance = gaussian_spot(48, 48, 1.0, 46.0, 2.0);
        let window = select_window(&irradiance, 20).unwrap();
        assert!(window.fits((48, 48)));
        assert_eq!(window.side(), Some(20));
        assert_eq!(window.top.0, 0);
        assert_eq!(window.bottom.1, 48);
    }

    #[test]
    fn test_window_bounds_always_inside_image() {
        for (cy, cx) in [(0.0, 0.0), (31.0, 0.0), (15.0, 20.0), (31.0, 39.0)] {
            let irradiance = gaussian_spot(32, 40, cy, cx, 1.5);
            for dim in [1, 7, 16, 32] {
                let w = select_window(&irradiance, dim).unwrap();
                assert!(w.top.1 < w.bottom.1 && w.bottom.1 <= 40);
                assert!(w.top.0 < w.bottom.0 && w.bottom.0 <= 32);
                assert_eq!(w.side(), Some(dim));
            }
        }
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let irradiance = Array2::<f64>::ones((16, 32));
        assert_eq!(
            select_window(&irradiance, 17),
            Err(WindowError::TooLarge {
                dim: 17,
                rows: 16,
                cols: 32
            })
        );
    }
}
