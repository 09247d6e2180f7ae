//! Accelerated multi-plane alternating projections.
//!
//! Starting from an initial phase guess, the field is propagated through every measured plane,
//! where its modulus is replaced by the measured amplitude, and back to the first plane. The
//! step between consecutive iterates is extrapolated with a momentum factor `alpha`, computed
//! from the last two projection residuals and clipped to `[0, 1]`.

use crate::cancellable_loops::{try_for_each_cancellable, LoopExit};
use crate::data_thread::Telemetry;
use crate::error::RetrieverError;
use crate::math_tools::{multiply_inplace, normalize_phasors, phasor_from_phase, Fft2, EPSILON};
use crossbeam_channel::Sender;
use ndarray::{Array2, Zip};
use num_complex::Complex64;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicBool;

/// Reason a retrieval stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The MSE dropped below the tolerance.
    Converged,
    /// The iteration budget was spent without convergence.
    BudgetExhausted,
    /// The abort flag was raised.
    Aborted,
}

/// Final state of a retrieval run.
///
/// # Fields
/// - `field`: the recovered unit-phasor field at the first plane.
/// - `mse`: normalized mean squared amplitude error, one entry per iteration.
/// - `alpha`: momentum factor used by each iteration.
/// - `iterations`: number of completed iterations.
/// - `termination`: why the run stopped.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub field: Array2<Complex64>,
    pub mse: Vec<f64>,
    pub alpha: Vec<f64>,
    pub iterations: usize,
    pub termination: Termination,
}

impl RetrievalOutcome {
    /// Phase of the recovered field.
    pub fn phase(&self) -> Array2<f64> {
        self.field.mapv(|c| c.arg())
    }

    pub fn final_mse(&self) -> Option<f64> {
        self.mse.last().copied()
    }
}

/// Iteration state, created fresh for every run.
struct RetrievalState {
    y: Array2<Complex64>,
    x: Array2<Complex64>,
    g1: Array2<Complex64>,
    g2: Array2<Complex64>,
    h: Array2<Complex64>,
}

impl RetrievalState {
    fn new(phi0: &Array2<f64>) -> Self {
        let zeros = Array2::from_elem(phi0.dim(), Complex64::new(0.0, 0.0));
        RetrievalState {
            y: phasor_from_phase(phi0),
            x: zeros.clone(),
            g1: zeros.clone(),
            g2: zeros.clone(),
            h: zeros,
        }
    }
}

/// Solver for a single field component.
///
/// # Fields
/// - `transfer`: propagation kernel between consecutive planes, in FFT order.
/// - `niter`: iteration budget.
/// - `eps`: MSE below which the run counts as converged.
#[derive(Clone)]
pub struct IterativeRetriever {
    transfer: Array2<Complex64>,
    niter: usize,
    eps: f64,
    fft: Fft2,
}

impl IterativeRetriever {
    pub fn new(transfer: Array2<Complex64>, niter: usize, eps: f64) -> Self {
        let fft = Fft2::for_shape(&transfer);
        IterativeRetriever {
            transfer,
            niter,
            eps,
            fft,
        }
    }

    pub fn niter(&self) -> usize {
        self.niter
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// `ifft2(fft2(amplitude * phasor) * kernel)`
    fn propagate(
        &self,
        amplitude: &Array2<f64>,
        phasor: &Array2<Complex64>,
        kernel: &Array2<Complex64>,
    ) -> Array2<Complex64> {
        let mut field = Array2::from_elem(phasor.dim(), Complex64::new(0.0, 0.0));
        Zip::from(&mut field)
            .and(amplitude)
            .and(phasor)
            .par_for_each(|u, a, p| *u = *p * *a);
        self.fft.forward(&mut field);
        multiply_inplace(&mut field, kernel);
        self.fft.inverse(&mut field);
        field
    }

    fn check_shapes(
        &self,
        phi0: &Array2<f64>,
        amplitudes: &[Array2<f64>],
    ) -> Result<(), RetrieverError> {
        if amplitudes.len() < 2 {
            return Err(RetrieverError::Shape(format!(
                "at least two amplitude maps are required, got {}",
                amplitudes.len()
            )));
        }
        let shape = self.transfer.dim();
        if phi0.dim() != shape {
            return Err(RetrieverError::Shape(format!(
                "initial phase of shape {:?} does not match the transfer function {shape:?}",
                phi0.dim()
            )));
        }
        if let Some((i, a)) = amplitudes.iter().enumerate().find(|(_, a)| a.dim() != shape) {
            return Err(RetrieverError::Shape(format!(
                "amplitude {i} of shape {:?} does not match the transfer function {shape:?}",
                a.dim()
            )));
        }
        Ok(())
    }

    /// Runs the retrieval.
    ///
    /// # Arguments
    /// - `phi0`: initial phase guess at the first plane.
    /// - `amplitudes`: measured amplitudes, one per plane, in propagation order.
    /// - `telemetry`: receives the MSE of every iteration as it is computed.
    /// - `abort_flag`: stops the run before the next iteration when raised.
    ///
    /// # Returns
    /// The recovered field with the MSE and `alpha` histories.
    pub fn run(
        &self,
        phi0: &Array2<f64>,
        amplitudes: &[Array2<f64>],
        telemetry: Option<&Sender<Telemetry>>,
        abort_flag: &AtomicBool,
    ) -> Result<RetrievalOutcome, RetrieverError> {
        self.check_shapes(phi0, amplitudes)?;

        let n = amplitudes.len();
        let (forward, last) = amplitudes.split_at(n - 1);
        let last = &last[0];
        let backward = self.transfer.mapv(|c| c.conj().powu((n - 1) as u32));
        let a0 = &amplitudes[0];
        let k = 1.0 / (a0.iter().map(|a| a * a).sum::<f64>() + EPSILON);

        let mut state = RetrievalState::new(phi0);
        let mut mse_history = vec![];
        let mut alpha_history = vec![];

        let exit = try_for_each_cancellable(0..self.niter, abort_flag, |_| {
            state.g2 = std::mem::replace(&mut state.g1, state.y.clone());
            state.h.assign(&state.x);

            for amplitude in forward.iter() {
                state.y = self.propagate(amplitude, &state.y, &self.transfer);
                normalize_phasors(&mut state.y);
            }
            let u = self.propagate(last, &state.y, &backward);
            state.y.assign(&u);
            normalize_phasors(&mut state.y);

            Zip::from(&mut state.g1)
                .and(&state.y)
                .par_for_each(|g, y| *g = *y - *g);
            state.x.assign(&state.y);
            Zip::from(&mut state.h)
                .and(&state.x)
                .par_for_each(|h, x| *h = *x - *h);

            let correlation = Zip::from(&state.g1)
                .and(&state.g2)
                .fold(0.0, |acc, g1, g2| acc + (g1.conj() * g2).re);
            let norm = state.g2.iter().map(|g| g.norm_sqr()).sum::<f64>();
            let alpha = (correlation / (norm + EPSILON)).clamp(0.0, 1.0);
            Zip::from(&mut state.y)
                .and(&state.x)
                .and(&state.h)
                .par_for_each(|y, x, h| *y = *x + *h * alpha);

            let mse = Zip::from(&u)
                .and(a0)
                .fold(0.0, |acc, u, a| acc + (u.norm() - a).powi(2))
                * k;
            mse_history.push(mse);
            alpha_history.push(alpha);
            if let Some(tx) = telemetry {
                if tx.send(Telemetry::Mse(mse)).is_err() {
                    log::debug!("telemetry receiver dropped");
                }
            }

            if mse < self.eps {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let termination = match exit {
            LoopExit::Stopped(()) => Termination::Converged,
            LoopExit::Completed => Termination::BudgetExhausted,
            LoopExit::Cancelled => Termination::Aborted,
        };
        log::info!(
            "retrieval finished after {} iterations: {termination:?}, mse {:?}",
            mse_history.len(),
            mse_history.last()
        );

        Ok(RetrievalOutcome {
            field: state.x,
            iterations: mse_history.len(),
            mse: mse_history,
            alpha: alpha_history,
            termination,
        })
    }
}
