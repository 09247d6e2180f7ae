//! Free-space propagation of the recovered fields to arbitrary axial offsets.

use crate::error::RetrieverError;
use crate::math_tools::{ifftshift, max_value, Fft2};
use ndarray::{Array2, Zip};
use num_complex::Complex64;
use std::f64::consts::PI;

/// Propagates a pair of recovered fields with the angular spectrum method.
///
/// # Fields
/// - `spectrum_x`, `spectrum_y`: `fft2` of the fields at the reference plane.
/// - `wz`: longitudinal frequencies in FFT order.
/// - `i_max`: peak irradiance at the reference plane, used for normalization.
#[derive(Clone)]
pub struct FocalPropagator {
    spectrum_x: Array2<Complex64>,
    spectrum_y: Array2<Complex64>,
    wz: Array2<Complex64>,
    i_max: f64,
    fft: Fft2,
}

impl FocalPropagator {
    /// # Arguments
    /// - `ex`, `ey`: the fields at the reference plane.
    /// - `wz`: centred longitudinal-frequency map of the window.
    pub fn new(
        ex: &Array2<Complex64>,
        ey: &Array2<Complex64>,
        wz: &Array2<Complex64>,
    ) -> Result<Self, RetrieverError> {
        if ex.dim() != ey.dim() || ex.dim() != wz.dim() {
            return Err(RetrieverError::Shape(format!(
                "fields {:?} and {:?} do not match the frequency map {:?}",
                ex.dim(),
                ey.dim(),
                wz.dim()
            )));
        }
        let irradiance = Zip::from(ex)
            .and(ey)
            .map_collect(|x, y| x.norm_sqr() + y.norm_sqr());
        let i_max = max_value(&irradiance);

        let fft = Fft2::for_shape(ex);
        let mut spectrum_x = ex.clone();
        fft.forward(&mut spectrum_x);
        let mut spectrum_y = ey.clone();
        fft.forward(&mut spectrum_y);
        Ok(FocalPropagator {
            spectrum_x,
            spectrum_y,
            wz: ifftshift(wz),
            i_max: if i_max > 0.0 { i_max } else { 1.0 },
            fft,
        })
    }

    /// Replaces the fields and the frequency map.
    pub fn set_fields(
        &mut self,
        ex: &Array2<Complex64>,
        ey: &Array2<Complex64>,
        wz: &Array2<Complex64>,
    ) -> Result<(), RetrieverError> {
        *self = FocalPropagator::new(ex, ey, wz)?;
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        self.wz.dim()
    }

    /// Peak of `|Ex|^2 + |Ey|^2` at the reference plane.
    pub fn max_irradiance(&self) -> f64 {
        self.i_max
    }

    /// `exp(i 2 pi z wz)`; for negative `z`, exponents with a negative real part are negated.
    ///
    /// The principal root in [`longitudinal_frequencies`] has `Im(wz) >= 0`, so the negation only
    /// applies to caller-supplied maps with decaying entries of the opposite sign.
    ///
    /// [`longitudinal_frequencies`]: crate::transfer::longitudinal_frequencies
    fn kernel(&self, z: f64) -> Array2<Complex64> {
        let i2piz = Complex64::new(0.0, 2.0 * PI * z);
        self.wz.mapv(|w| {
            let phase = i2piz * w;
            if z < 0.0 && phase.re < 0.0 {
                (-phase).exp()
            } else {
                phase.exp()
            }
        })
    }

    /// Both fields at axial offset `z`, in units of the wavelength.
    pub fn propagate_field_to(&self, z: f64) -> (Array2<Complex64>, Array2<Complex64>) {
        let kernel = self.kernel(z);
        let apply = |spectrum: &Array2<Complex64>| {
            let mut field = spectrum * &kernel;
            self.fft.inverse(&mut field);
            field
        };
        (apply(&self.spectrum_x), apply(&self.spectrum_y))
    }

    /// Irradiance at axial offset `z`, normalized by the peak irradiance at the reference plane.
    pub fn propagate_to(&self, z: f64) -> Array2<f64> {
        let (ex, ey) = self.propagate_field_to(z);
        Zip::from(&ex)
            .and(&ey)
            .map_collect(|x, y| (x.norm_sqr() + y.norm_sqr()) / self.i_max)
    }
}
