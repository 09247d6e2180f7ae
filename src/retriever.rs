//! The phase retrieval session.
//!
//! A [`PhaseRetriever`] owns its configuration, the loaded dataset and every quantity derived from
//! them. Derived quantities are computed lazily and discarded whenever an input they depend on
//! changes:
//!
//! ```text
//! load_dataset -> center_window -> compute_bandwidth -> select_phase_origin
//!              -> retrieve -> poll -> finish -> export
//! ```
//!
//! `retrieve` fills in any missing step with its automatic default.

use crate::alignment::{align, phase_difference};
use crate::bandwidth::{estimate_radius, power_spectrum, DEFAULT_TOL};
use crate::config::{ConfigCommand, Invalidation, RetrieverConfig};
use crate::data_thread::{Channel, DualChannelCoordinator, PollReport, Poller, RetrievalJob};
use crate::dataset::{Dataset, DatasetLoader, Plane, X_CHANNEL, Y_CHANNEL};
use crate::error::{RetrieverError, WindowError};
use crate::filters::filter::Filter;
use crate::filters::low_pass::LowPass;
use crate::io::{stack_planes, RetrievalExport};
use crate::math_tools::argmax;
use crate::propagator::FocalPropagator;
use crate::retrieval::{IterativeRetriever, RetrievalOutcome};
use crate::transfer::{TransferFunction, TransferInputs};
use crate::window::{select_window, Window};
use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;
use std::path::Path;

/// Dataset restricted to the analysis window.
#[derive(Debug, Clone)]
struct CroppedData {
    window: Window,
    dataset: Dataset,
    irradiance: Array2<f64>,
}

/// Inputs of a running retrieval that are needed again once it finishes.
struct RunningRetrieval {
    coordinator: DualChannelCoordinator,
    amplitudes_x: Vec<Array2<f64>>,
    amplitudes_y: Vec<Array2<f64>>,
    origin: (usize, usize),
    delta: f64,
    pixel_size: f64,
    bandwidth: f64,
    wz: Array2<Complex64>,
}

/// Aligned result of a finished retrieval.
///
/// # Fields
/// - `ex`, `ey`: unit-phasor fields, exactly `1 + 0i` at `origin` before the Y rotation.
/// - `outcome_x`, `outcome_y`: the raw solver outcomes, with MSE histories.
/// - `amplitudes_x`, `amplitudes_y`: the amplitude maps the solver ran on.
/// - `origin`: reference pixel inside the window.
/// - `delta`: phase difference between the components at `origin`.
/// - `pixel_size`: effective pixel size in wavelengths.
/// - `bandwidth`: passband radius of the transfer function.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub ex: Array2<Complex64>,
    pub ey: Array2<Complex64>,
    pub outcome_x: RetrievalOutcome,
    pub outcome_y: RetrievalOutcome,
    pub amplitudes_x: Vec<Array2<f64>>,
    pub amplitudes_y: Vec<Array2<f64>>,
    pub origin: (usize, usize),
    pub delta: f64,
    pub pixel_size: f64,
    pub bandwidth: f64,
    wz: Array2<Complex64>,
}

impl RetrievalResult {
    /// Complex fields at the first plane: measured amplitude times recovered phasor.
    pub fn fields(&self) -> (Array2<Complex64>, Array2<Complex64>) {
        let weight = |phasor: &Array2<Complex64>, amplitudes: &[Array2<f64>]| {
            let mut field = phasor.clone();
            field.zip_mut_with(&amplitudes[0], |z, a| *z *= *a);
            field
        };
        (
            weight(&self.ex, &self.amplitudes_x),
            weight(&self.ey, &self.amplitudes_y),
        )
    }

    /// Propagator seeded with [`RetrievalResult::fields`].
    pub fn propagator(&self) -> Result<FocalPropagator, RetrieverError> {
        let (ex, ey) = self.fields();
        FocalPropagator::new(&ex, &ey, &self.wz)
    }

    pub fn export(&self) -> Result<RetrievalExport, RetrieverError> {
        Ok(RetrievalExport {
            amplitudes_x: stack_planes(&self.amplitudes_x)?,
            amplitudes_y: stack_planes(&self.amplitudes_y)?,
            phi_x: self.ex.clone(),
            phi_y: self.ey.clone(),
            pixel_size: self.pixel_size,
            bandwidth: self.bandwidth,
        })
    }

    pub fn save_npz(&self, path: &Path) -> Result<(), RetrieverError> {
        self.export()?.save_npz(path)
    }
}

/// A phase retrieval session.
#[derive(Default)]
pub struct PhaseRetriever {
    config: RetrieverConfig,
    dataset: Option<Dataset>,
    irradiance: Option<Array2<f64>>,
    cropped: Option<CroppedData>,
    spectrum: Option<Array2<f64>>,
    transfer: Option<TransferFunction>,
    running: Option<RunningRetrieval>,
    result: Option<RetrievalResult>,
}

impl PhaseRetriever {
    pub fn new(config: RetrieverConfig) -> Self {
        PhaseRetriever {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Applies a configuration change and drops the derived state it invalidates.
    pub fn apply(&mut self, command: ConfigCommand) -> Result<(), RetrieverError> {
        let invalidation = self.config.apply(command)?;
        self.invalidate(invalidation);
        Ok(())
    }

    /// Applies a flat `key = value` option.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), RetrieverError> {
        self.apply(ConfigCommand::parse(key, value)?)
    }

    fn invalidate(&mut self, invalidation: Invalidation) {
        if invalidation.window {
            self.cropped = None;
            self.spectrum = None;
        }
        if invalidation.transfer_function {
            self.transfer = None;
        }
    }

    /// Loads a dataset with `loader` and makes it the session dataset.
    pub fn load_dataset(
        &mut self,
        loader: &dyn DatasetLoader,
        path: &Path,
    ) -> Result<(), RetrieverError> {
        let dataset = loader.load(path)?;
        self.set_dataset(dataset)?;
        self.config.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Replaces the dataset wholesale, discarding every derived quantity and result.
    pub fn set_dataset(&mut self, dataset: Dataset) -> Result<(), RetrieverError> {
        if self.running.is_some() {
            return Err(RetrieverError::RetrievalInProgress);
        }
        log::info!(
            "dataset with {} planes of shape {:?}",
            dataset.len(),
            dataset.shape()
        );
        self.irradiance = Some(dataset.irradiance());
        self.dataset = Some(dataset);
        self.cropped = None;
        self.spectrum = None;
        self.transfer = None;
        self.result = None;
        Ok(())
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Irradiance `S0` of the first plane of the full images.
    pub fn irradiance(&self) -> Option<&Array2<f64>> {
        self.irradiance.as_ref()
    }

    pub fn window(&self) -> Option<Window> {
        self.cropped.as_ref().map(|c| c.window)
    }

    /// Sum of the six cropped channels of the first plane.
    pub fn cropped_irradiance(&self) -> Option<&Array2<f64>> {
        self.cropped.as_ref().map(|c| &c.irradiance)
    }

    /// Power spectrum of the cropped irradiance, once the bandwidth was computed.
    pub fn power_spectrum(&self) -> Option<&Array2<f64>> {
        self.spectrum.as_ref()
    }

    /// Places the analysis window and crops the dataset to it.
    ///
    /// An explicit `rect` from the configuration takes precedence over the automatic placement.
    pub fn center_window(&mut self) -> Result<Window, RetrieverError> {
        let (dataset, irradiance) = match (&self.dataset, &self.irradiance) {
            (Some(d), Some(i)) => (d, i),
            _ => return Err(WindowError::IrradianceUnavailable.into()),
        };
        let window = match self.config.rect {
            Some(rect) if rect.fits(irradiance.dim()) => rect,
            Some(rect) => {
                return Err(RetrieverError::Configuration(format!(
                    "rect {rect:?} exceeds the image shape {:?}",
                    irradiance.dim()
                )))
            }
            None => select_window(irradiance, self.config.dim)?,
        };
        let cropped = dataset.crop(&window)?;
        let first: &Plane = cropped.first_plane();
        let mut cropped_irradiance = Array2::<f64>::zeros(first.shape());
        for image in first.channels.iter() {
            cropped_irradiance += image;
        }
        log::info!("analysis window {window:?}");
        self.cropped = Some(CroppedData {
            window,
            dataset: cropped,
            irradiance: cropped_irradiance,
        });
        self.spectrum = None;
        self.transfer = None;
        Ok(window)
    }

    fn ensure_window(&mut self) -> Result<(), RetrieverError> {
        if self.cropped.is_none() {
            self.center_window()?;
        }
        Ok(())
    }

    /// Sets the phase origin to the brightest pixel of the cropped irradiance.
    pub fn select_phase_origin(&mut self) -> Result<(usize, usize), RetrieverError> {
        self.ensure_window()?;
        let origin = self
            .cropped
            .as_ref()
            .and_then(|c| argmax(&c.irradiance))
            .ok_or(WindowError::IrradianceUnavailable)?;
        log::info!("phase origin at {origin:?}");
        self.config.origin = Some(origin);
        Ok(origin)
    }

    /// Estimates the bandwidth from the cropped irradiance and stores it in the configuration.
    ///
    /// # Arguments
    /// - `tol`: relative spectral threshold, see [`estimate_radius`].
    ///
    /// # Returns
    /// The bandwidth, half the support radius of the irradiance spectrum.
    pub fn compute_bandwidth(&mut self, tol: f64) -> Result<f64, RetrieverError> {
        self.ensure_window()?;
        let irradiance = self
            .cropped
            .as_ref()
            .map(|c| &c.irradiance)
            .ok_or(WindowError::IrradianceUnavailable)?;
        let spectrum = power_spectrum(irradiance);
        let radius =
            estimate_radius(&spectrum, tol).ok_or(RetrieverError::BandwidthEstimationFailure)?;
        let bandwidth = radius as f64 / 2.0;
        log::info!("estimated bandwidth {bandwidth} (support radius {radius})");
        self.spectrum = Some(spectrum);
        self.apply(ConfigCommand::SetBandwidth(Some(bandwidth)))?;
        Ok(bandwidth)
    }

    fn transfer_inputs(&self) -> Result<TransferInputs, RetrieverError> {
        let pixel_size = self.config.effective_pixel_size()?;
        let lamb = self.config.wavelength()?;
        let cropped = self
            .cropped
            .as_ref()
            .ok_or(WindowError::IrradianceUnavailable)?;
        let bandwidth = self.config.bandwidth.ok_or_else(|| {
            RetrieverError::Configuration("bandwidth not specified".to_string())
        })?;
        Ok(TransferInputs {
            dim: cropped.window.side().unwrap_or(self.config.dim),
            pixel_size,
            dz: cropped.dataset.plane_spacing() / lamb,
            bandwidth,
        })
    }

    /// Transfer function between consecutive planes, rebuilt when its inputs changed.
    pub fn transfer_function(&mut self) -> Result<&TransferFunction, RetrieverError> {
        let inputs = self.transfer_inputs()?;
        let stale = self.transfer.as_ref().is_none_or(|tf| *tf.inputs() != inputs);
        if stale {
            self.transfer = Some(TransferFunction::from_inputs(inputs)?);
        }
        self.transfer.as_ref().ok_or_else(|| {
            RetrieverError::Configuration("transfer function unavailable".to_string())
        })
    }

    /// Amplitude maps of both components over the usable planes.
    fn amplitudes(&self) -> Result<(Vec<Array2<f64>>, Vec<Array2<f64>>), RetrieverError> {
        let cropped = self
            .cropped
            .as_ref()
            .ok_or(WindowError::IrradianceUnavailable)?;
        let low_pass = match (self.config.prefilter, self.config.bandwidth) {
            (true, Some(bandwidth)) => Some(LowPass::new(2.0 * bandwidth)),
            _ => None,
        };
        if let Some(filter) = &low_pass {
            let config = filter.config();
            log::debug!(
                "prefiltering amplitudes: {} ({:?} domain), {}",
                config.name,
                config.domain,
                config.description
            );
        }
        let amplitude = |intensity: &Array2<f64>| {
            let a = intensity.mapv(|i| i.max(0.0).sqrt());
            match &low_pass {
                Some(filter) => filter.filter(&a),
                None => a,
            }
        };
        let planes = cropped.dataset.usable_planes();
        Ok((
            planes
                .par_iter()
                .map(|p| amplitude(&p.channels[X_CHANNEL]))
                .collect(),
            planes
                .par_iter()
                .map(|p| amplitude(&p.channels[Y_CHANNEL]))
                .collect(),
        ))
    }

    /// Starts the retrieval of both components in the background.
    ///
    /// Missing window, bandwidth and phase origin are computed with their automatic defaults.
    pub fn retrieve(&mut self) -> Result<(), RetrieverError> {
        if self.running.is_some() {
            return Err(RetrieverError::RetrievalInProgress);
        }
        self.config.effective_pixel_size()?;
        if self.dataset.is_none() {
            return Err(RetrieverError::Dataset("no dataset loaded".to_string()));
        }
        self.ensure_window()?;
        if self.config.bandwidth.is_none() {
            self.compute_bandwidth(DEFAULT_TOL)?;
        }
        let origin = match self.config.origin {
            Some(origin) => origin,
            None => self.select_phase_origin()?,
        };
        let dim = self.window().and_then(|w| w.side()).unwrap_or(self.config.dim);
        if origin.0 >= dim || origin.1 >= dim {
            return Err(RetrieverError::Configuration(format!(
                "origin {origin:?} lies outside the {dim}x{dim} window"
            )));
        }

        let (amplitudes_x, amplitudes_y) = self.amplitudes()?;
        let (h, wz, pixel_size, bandwidth) = {
            let tf = self.transfer_function()?;
            (
                tf.h().clone(),
                tf.longitudinal_frequencies(),
                tf.inputs().pixel_size,
                tf.inputs().bandwidth,
            )
        };
        let delta = match &self.cropped {
            Some(c) => phase_difference(&c.dataset.first_plane().channels)[origin],
            None => return Err(WindowError::IrradianceUnavailable.into()),
        };

        let retriever = IterativeRetriever::new(h, self.config.n_max, self.config.eps);
        let phi0 = Array2::<f64>::zeros((dim, dim));
        let coordinator = DualChannelCoordinator::spawn(
            RetrievalJob::new(retriever.clone(), phi0.clone(), amplitudes_x.clone()),
            RetrievalJob::new(retriever, phi0, amplitudes_y.clone()),
        )?;
        log::info!(
            "retrieving {} planes, pixel size {pixel_size}, bandwidth {bandwidth}, origin {:?}",
            amplitudes_x.len(),
            origin
        );
        self.result = None;
        self.running = Some(RunningRetrieval {
            coordinator,
            amplitudes_x,
            amplitudes_y,
            origin,
            delta,
            pixel_size,
            bandwidth,
            wz,
        });
        Ok(())
    }

    /// Whether a retrieval was started and not yet collected with [`PhaseRetriever::finish`].
    pub fn is_retrieving(&self) -> bool {
        self.running.is_some()
    }

    /// Drains the telemetry of a running retrieval without blocking.
    pub fn poll(&mut self) -> Result<PollReport, RetrieverError> {
        match self.running.as_mut() {
            Some(running) => Ok(running.coordinator.poll()),
            None => Err(RetrieverError::NoResult),
        }
    }

    /// MSE values received so far from `channel`.
    pub fn mse_history(&self, channel: Channel) -> &[f64] {
        match (&self.running, &self.result) {
            (Some(running), _) => running.coordinator.mse_history(channel),
            (None, Some(result)) => match channel {
                Channel::X => result.outcome_x.mse.as_slice(),
                Channel::Y => result.outcome_y.mse.as_slice(),
            },
            (None, None) => &[],
        }
    }

    /// Asks a running retrieval to stop. Collect it with [`PhaseRetriever::finish`].
    pub fn abort(&self) {
        if let Some(running) = &self.running {
            running.coordinator.abort();
        }
    }

    /// Waits for the running retrieval and aligns its result.
    ///
    /// Returns the stored result when no retrieval is running.
    pub fn finish(&mut self) -> Result<&RetrievalResult, RetrieverError> {
        if let Some(running) = self.running.take() {
            let dual = running.coordinator.wait()?;
            let (ex, ey) = align(&dual.x.field, &dual.y.field, running.origin, running.delta);
            self.result = Some(RetrievalResult {
                ex,
                ey,
                outcome_x: dual.x,
                outcome_y: dual.y,
                amplitudes_x: running.amplitudes_x,
                amplitudes_y: running.amplitudes_y,
                origin: running.origin,
                delta: running.delta,
                pixel_size: running.pixel_size,
                bandwidth: running.bandwidth,
                wz: running.wz,
            });
        }
        self.result.as_ref().ok_or(RetrieverError::NoResult)
    }

    /// Drives the running retrieval with `poller` until both components stopped, then finishes it.
    pub fn run_until_finished<F>(
        &mut self,
        poller: &Poller,
        on_progress: F,
    ) -> Result<&RetrievalResult, RetrieverError>
    where
        F: FnMut(&PollReport),
    {
        if let Some(running) = self.running.as_mut() {
            poller.run_until_finished(&mut running.coordinator, on_progress);
        }
        self.finish()
    }

    pub fn result(&self) -> Option<&RetrievalResult> {
        self.result.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::N_CHANNELS;
    use crate::retrieval::tests::{angle_distance, curved_phase, synthetic_planes_with_phase};
    use crate::retrieval::Termination;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;
    use std::f64::consts::PI;
    use std::time::Duration;

    const DIM: usize = 64;

    /// Three planes of a gaussian beam with `phase`, propagated with the kernel the session builds
    /// for `synthetic_config`. Y equals X, and the Stokes channels encode a quarter-wave delay.
    fn synthetic_dataset_with_phase(phase: &Array2<f64>) -> Dataset {
        let tf = TransferFunction::new(DIM, 4.0, 2000.0, 12.0).unwrap();
        let amplitudes = synthetic_planes_with_phase(8.0, phase, tf.h(), 3);
        let planes: BTreeMap<i64, Plane> = amplitudes
            .iter()
            .enumerate()
            .map(|(p, a)| {
                let intensity = a.mapv(|v| v * v);
                let channels: [Array2<f64>; N_CHANNELS] = [
                    intensity.clone(),
                    &intensity * 0.5,
                    intensity.clone(),
                    &intensity * 0.5,
                    &intensity * 0.9,
                    &intensity * 0.1,
                ];
                (p as i64 * 1000, Plane::new(channels, 2.0))
            })
            .collect();
        Dataset::new(planes).unwrap()
    }

    fn synthetic_dataset() -> Dataset {
        synthetic_dataset_with_phase(&Array2::zeros((DIM, DIM)))
    }

    fn synthetic_config() -> RetrieverConfig {
        RetrieverConfig::from_options([
            ("pixel_size", "4.0"),
            ("lamb", "1.0"),
            ("rect", "0,0,64,64"),
            ("bandwidth", "12"),
            ("n_max", "100"),
            ("eps", "1e-6"),
            ("prefilter", "false"),
        ])
        .unwrap()
    }

    #[test]
    fn test_end_to_end_flat_phase_retrieval() {
        let mut session = PhaseRetriever::new(synthetic_config());
        session.set_dataset(synthetic_dataset()).unwrap();
        session.retrieve().unwrap();
        assert!(session.is_retrieving());

        let mut reports = 0;
        let result = session
            .run_until_finished(&Poller::new(Duration::from_millis(1)), |_| reports += 1)
            .unwrap();
        assert_eq!(result.outcome_x.termination, Termination::Converged);
        assert_eq!(result.outcome_y.termination, Termination::Converged);
        assert_eq!(result.origin, (32, 32));
        assert_abs_diff_eq!(result.delta, PI / 2.0, epsilon = 1e-12);
        assert_eq!(result.ex[result.origin], Complex64::new(1.0, 0.0));

        for i in 16..48 {
            for j in 16..48 {
                assert_abs_diff_eq!(result.ex[(i, j)].arg(), 0.0, epsilon = 1e-3);
                assert_abs_diff_eq!(result.ey[(i, j)].arg(), PI / 2.0, epsilon = 1e-3);
            }
        }

        // the first plane is reproduced by the propagator
        let propagator = result.propagator().unwrap();
        let irradiance = propagator.propagate_to(0.0);
        let (ex, ey) = result.fields();
        for ((x, y), i) in ex.iter().zip(ey.iter()).zip(irradiance.iter()) {
            let expected = (x.norm_sqr() + y.norm_sqr()) / propagator.max_irradiance();
            assert_abs_diff_eq!(*i, expected, epsilon = 1e-9);
        }
        let mse_x = result.outcome_x.mse.clone();
        assert_eq!(session.mse_history(Channel::X), mse_x.as_slice());
        assert!(!session.is_retrieving());
    }

    #[test]
    fn test_end_to_end_curved_phase_retrieval() {
        let truth = curved_phase(DIM);
        let mut session = PhaseRetriever::new(synthetic_config());
        session.apply(ConfigCommand::SetEps(1e-7)).unwrap();
        session.apply(ConfigCommand::SetIterations(500)).unwrap();
        session.set_dataset(synthetic_dataset_with_phase(&truth)).unwrap();
        session.retrieve().unwrap();
        let result = session.finish().unwrap();

        for outcome in [&result.outcome_x, &result.outcome_y] {
            assert_eq!(outcome.termination, Termination::Converged);
            assert!(outcome.iterations > 1);
            assert!(outcome.alpha.iter().any(|a| *a > 0.0));
        }
        assert_eq!(result.origin, (32, 32));

        // both components are referenced to the origin, Y carries the delay on top
        let reference = truth[result.origin];
        let amplitude = &result.amplitudes_x[0];
        for (idx, a) in amplitude.indexed_iter() {
            if *a <= 0.5 {
                continue;
            }
            let expected = truth[idx] - reference;
            let ex_error = angle_distance(result.ex[idx].arg(), expected);
            let ey_error = angle_distance(result.ey[idx].arg(), expected + PI / 2.0);
            assert!(ex_error < 2e-3, "x phase error {ex_error} at {idx:?}");
            assert!(ey_error < 2e-3, "y phase error {ey_error} at {idx:?}");
        }
    }

    #[test]
    fn test_retrieve_requires_pixel_size_and_wavelength() {
        let mut session = PhaseRetriever::default();
        session.set_dataset(synthetic_dataset()).unwrap();
        assert!(matches!(
            session.retrieve(),
            Err(RetrieverError::Configuration(_))
        ));
        session.set_option("pixel_size", "4.0").unwrap();
        assert!(matches!(
            session.retrieve(),
            Err(RetrieverError::Configuration(_))
        ));
        assert!(!session.is_retrieving());
    }

    #[test]
    fn test_retrieve_requires_a_dataset() {
        let mut session = PhaseRetriever::new(synthetic_config());
        assert!(matches!(session.retrieve(), Err(RetrieverError::Dataset(_))));
        assert!(matches!(
            session.center_window(),
            Err(RetrieverError::Window(WindowError::IrradianceUnavailable))
        ));
    }

    #[test]
    fn test_second_retrieval_is_rejected_while_running() {
        let mut session = PhaseRetriever::new(synthetic_config());
        session.set_dataset(synthetic_dataset()).unwrap();
        session.apply(ConfigCommand::SetEps(0.0)).unwrap();
        session.apply(ConfigCommand::SetIterations(1_000_000)).unwrap();
        session.retrieve().unwrap();
        assert!(matches!(
            session.retrieve(),
            Err(RetrieverError::RetrievalInProgress)
        ));
        assert!(matches!(
            session.set_dataset(synthetic_dataset()),
            Err(RetrieverError::RetrievalInProgress)
        ));
        session.abort();
        let result = session.finish().unwrap();
        assert_eq!(result.outcome_x.termination, Termination::Aborted);
    }

    #[test]
    fn test_finish_without_retrieval() {
        let mut session = PhaseRetriever::default();
        assert!(matches!(session.finish(), Err(RetrieverError::NoResult)));
        assert!(matches!(session.poll(), Err(RetrieverError::NoResult)));
    }

    #[test]
    fn test_automatic_preparation_steps() {
        let mut config = synthetic_config();
        config.apply(ConfigCommand::SetRect(None)).unwrap();
        config.apply(ConfigCommand::SetDim(32)).unwrap();
        config.apply(ConfigCommand::SetBandwidth(None)).unwrap();
        let mut session = PhaseRetriever::new(config);
        session.set_dataset(synthetic_dataset()).unwrap();

        let window = session.center_window().unwrap();
        assert_eq!(window.side(), Some(32));
        assert!(window.fits((DIM, DIM)));
        assert_eq!(session.cropped_irradiance().unwrap().dim(), (32, 32));

        let bandwidth = session.compute_bandwidth(DEFAULT_TOL).unwrap();
        assert!(bandwidth > 0.0);
        assert_eq!(session.compute_bandwidth(DEFAULT_TOL).unwrap(), bandwidth);
        assert_eq!(session.config().bandwidth, Some(bandwidth));
        assert!(session.power_spectrum().is_some());

        let origin = session.select_phase_origin().unwrap();
        assert_eq!(session.config().origin, Some(origin));
        assert!(origin.0 < 32 && origin.1 < 32);

        // a new window size invalidates the crop
        session.set_option("dim", "16").unwrap();
        assert!(session.window().is_none());
        assert_eq!(session.center_window().unwrap().side(), Some(16));
    }

    #[test]
    fn test_transfer_function_follows_configuration() {
        let mut session = PhaseRetriever::new(synthetic_config());
        session.set_dataset(synthetic_dataset()).unwrap();
        session.center_window().unwrap();
        let dz = session.transfer_function().unwrap().inputs().dz;
        assert_abs_diff_eq!(dz, 2000.0, epsilon = 1e-9);

        session.set_option("magnification", "2").unwrap();
        let inputs = *session.transfer_function().unwrap().inputs();
        assert_abs_diff_eq!(inputs.pixel_size, 2.0, epsilon = 1e-12);
        assert_eq!(inputs.bandwidth, 12.0);
    }

    #[test]
    fn test_export_after_retrieval() {
        let mut session = PhaseRetriever::new(synthetic_config());
        session.set_dataset(synthetic_dataset()).unwrap();
        session.retrieve().unwrap();
        let result = session.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.npz");
        result.save_npz(&path).unwrap();
        let export = RetrievalExport::load_npz(&path).unwrap();
        assert_eq!(export.amplitudes_x.dim(), (3, DIM, DIM));
        assert_eq!(export.phi_y, result.ey);
        assert_eq!(export.pixel_size, 4.0);
        assert_eq!(export.bandwidth, 12.0);
    }
}
