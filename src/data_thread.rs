//! Concurrent retrieval of the two field components.
//!
//! Each component runs on its own named OS thread and owns its inputs. Progress flows back to the
//! host over an unbounded `crossbeam-channel`, which the host drains on its own tick through
//! [`DualChannelCoordinator::poll`] or a [`Poller`]. Results are only read after joining the
//! workers.

use crate::error::RetrieverError;
use crate::retrieval::{IterativeRetriever, RetrievalOutcome, Termination};
use crossbeam_channel::{Receiver, Sender};
use ndarray::Array2;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default interval between two telemetry polls of the host.
pub const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Field component handled by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    X,
    Y,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::X, Channel::Y];

    fn index(self) -> usize {
        match self {
            Channel::X => 0,
            Channel::Y => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::X => write!(f, "X"),
            Channel::Y => write!(f, "Y"),
        }
    }
}

/// Messages sent from a worker to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// MSE of one completed iteration.
    Mse(f64),
    /// The worker finished normally.
    Finished(Termination),
    /// The worker failed; no result will be available.
    Failed(String),
}

/// Inputs of a single retrieval, moved into its worker.
#[derive(Clone)]
pub struct RetrievalJob {
    pub retriever: IterativeRetriever,
    pub phi0: Array2<f64>,
    pub amplitudes: Vec<Array2<f64>>,
}

impl RetrievalJob {
    pub fn new(
        retriever: IterativeRetriever,
        phi0: Array2<f64>,
        amplitudes: Vec<Array2<f64>>,
    ) -> Self {
        RetrievalJob {
            retriever,
            phi0,
            amplitudes,
        }
    }

    fn run(
        &self,
        telemetry: &Sender<Telemetry>,
        abort_flag: &AtomicBool,
    ) -> Result<RetrievalOutcome, RetrieverError> {
        self.retriever
            .run(&self.phi0, &self.amplitudes, Some(telemetry), abort_flag)
    }
}

/// Recovered fields of both components.
#[derive(Debug, Clone)]
pub struct DualRetrieval {
    pub x: RetrievalOutcome,
    pub y: RetrievalOutcome,
}

/// Per-component results, available once both workers are joined.
#[derive(Debug)]
pub struct ChannelResults {
    pub x: Result<RetrievalOutcome, RetrieverError>,
    pub y: Result<RetrievalOutcome, RetrieverError>,
}

/// New telemetry gathered by one [`DualChannelCoordinator::poll`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Whether any worker was still alive before draining.
    pub running: bool,
}

impl PollReport {
    pub fn new_mse(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::X => &self.x,
            Channel::Y => &self.y,
        }
    }
}

type WorkerHandle = JoinHandle<Result<RetrievalOutcome, RetrieverError>>;

struct Worker {
    channel: Channel,
    handle: Option<WorkerHandle>,
    telemetry_rx: Receiver<Telemetry>,
    mse: Vec<f64>,
    termination: Option<Termination>,
    failure: Option<String>,
}

impl Worker {
    fn spawn(
        channel: Channel,
        job: RetrievalJob,
        abort_flag: Arc<AtomicBool>,
    ) -> Result<Self, RetrieverError> {
        let (telemetry_tx, telemetry_rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name(format!("retrieval-{channel}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    job.run(&telemetry_tx, &abort_flag)
                }))
                .unwrap_or_else(|payload| {
                    Err(RetrieverError::WorkerFailure {
                        channel,
                        reason: panic_message(payload.as_ref()),
                    })
                });
                let message = match &result {
                    Ok(outcome) => Telemetry::Finished(outcome.termination),
                    Err(RetrieverError::WorkerFailure { reason, .. }) => {
                        Telemetry::Failed(reason.clone())
                    }
                    Err(err) => Telemetry::Failed(err.to_string()),
                };
                if telemetry_tx.send(message).is_err() {
                    log::debug!("telemetry receiver of channel {channel} dropped");
                }
                result.map_err(|err| match err {
                    RetrieverError::WorkerFailure { .. } => err,
                    err => RetrieverError::WorkerFailure {
                        channel,
                        reason: err.to_string(),
                    },
                })
            })?;
        log::info!("started retrieval of the {channel} component");
        Ok(Worker {
            channel,
            handle: Some(handle),
            telemetry_rx,
            mse: vec![],
            termination: None,
            failure: None,
        })
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn drain(&mut self) -> Vec<f64> {
        let mut new = vec![];
        for message in self.telemetry_rx.try_iter() {
            match message {
                Telemetry::Mse(mse) => new.push(mse),
                Telemetry::Finished(termination) => {
                    log::info!(
                        "retrieval of the {} component finished: {termination:?}",
                        self.channel
                    );
                    self.termination = Some(termination);
                }
                Telemetry::Failed(reason) => {
                    log::error!("retrieval of the {} component failed: {reason}", self.channel);
                    self.failure = Some(reason);
                }
            }
        }
        self.mse.extend_from_slice(&new);
        new
    }

    fn join(&mut self) -> Result<RetrievalOutcome, RetrieverError> {
        let result = match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|payload| {
                Err(RetrieverError::WorkerFailure {
                    channel: self.channel,
                    reason: panic_message(payload.as_ref()),
                })
            }),
            None => Err(RetrieverError::NoResult),
        };
        self.drain();
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {s}")
    } else {
        "worker panicked".to_string()
    }
}

/// Runs the X and Y retrievals side by side and aggregates their telemetry.
///
/// Dropping a coordinator with live workers aborts and joins them.
pub struct DualChannelCoordinator {
    workers: [Worker; 2],
    abort_flag: Arc<AtomicBool>,
}

impl DualChannelCoordinator {
    /// Starts one worker per component.
    pub fn spawn(x_job: RetrievalJob, y_job: RetrievalJob) -> Result<Self, RetrieverError> {
        let abort_flag = Arc::new(AtomicBool::new(false));
        let x = Worker::spawn(Channel::X, x_job, abort_flag.clone())?;
        let y = match Worker::spawn(Channel::Y, y_job, abort_flag.clone()) {
            Ok(y) => y,
            Err(err) => {
                abort_flag.store(true, Ordering::Relaxed);
                let mut x = x;
                if let Err(join_err) = x.join() {
                    log::debug!("discarded X component: {join_err}");
                }
                return Err(err);
            }
        };
        Ok(DualChannelCoordinator {
            workers: [x, y],
            abort_flag,
        })
    }

    /// Non-blocking; returns the MSE values received since the last drain of `channel`.
    pub fn drain(&mut self, channel: Channel) -> Vec<f64> {
        self.workers[channel.index()].drain()
    }

    /// Drains both telemetry streams.
    pub fn poll(&mut self) -> PollReport {
        // liveness first, so a worker reported as stopped has no telemetry left in flight
        let running = self.is_running();
        PollReport {
            x: self.drain(Channel::X),
            y: self.drain(Channel::Y),
            running,
        }
    }

    /// Every MSE received so far from `channel`, in emission order.
    pub fn mse_history(&self, channel: Channel) -> &[f64] {
        &self.workers[channel.index()].mse
    }

    /// Failure reported by `channel`, if any was drained.
    pub fn failure(&self, channel: Channel) -> Option<&str> {
        self.workers[channel.index()].failure.as_deref()
    }

    /// How `channel` terminated, once its final message was drained.
    pub fn termination(&self, channel: Channel) -> Option<Termination> {
        self.workers[channel.index()].termination
    }

    pub fn is_running(&self) -> bool {
        self.workers.iter().any(Worker::is_alive)
    }

    /// Asks both workers to stop before their next iteration.
    pub fn abort(&self) {
        log::info!("aborting retrieval");
        self.abort_flag.store(true, Ordering::Relaxed);
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort_flag.clone()
    }

    /// Joins both workers and returns their individual results.
    ///
    /// A failed worker never prevents the other one from being joined.
    pub fn join(mut self) -> ChannelResults {
        let x = self.workers[0].join();
        let y = self.workers[1].join();
        ChannelResults { x, y }
    }

    /// Joins both workers, blocking.
    ///
    /// # Returns
    /// Both outcomes, or the first `WorkerFailure` in channel order.
    pub fn wait(self) -> Result<DualRetrieval, RetrieverError> {
        let results = self.join();
        Ok(DualRetrieval {
            x: results.x?,
            y: results.y?,
        })
    }
}

impl Drop for DualChannelCoordinator {
    fn drop(&mut self) {
        if self.workers.iter().any(|w| w.handle.is_some()) {
            self.abort_flag.store(true, Ordering::Relaxed);
            for worker in self.workers.iter_mut() {
                if let Err(err) = worker.join() {
                    log::debug!("discarded {} component: {err}", worker.channel);
                }
            }
        }
    }
}

/// Drives a coordinator from the host at a fixed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Poller {
            interval: POLL_INTERVAL,
        }
    }
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Poller { interval }
    }

    /// Polls `coordinator` every `interval` until both workers stopped, handing every non-empty
    /// report to `on_progress`.
    pub fn run_until_finished<F>(
        &self,
        coordinator: &mut DualChannelCoordinator,
        mut on_progress: F,
    ) where
        F: FnMut(&PollReport),
    {
        loop {
            let report = coordinator.poll();
            if !report.x.is_empty() || !report.y.is_empty() {
                on_progress(&report);
            }
            if !report.running {
                break;
            }
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferFunction;

    fn job(dim: usize, planes: usize, niter: usize, eps: f64) -> RetrievalJob {
        let tf = TransferFunction::new(dim, 2.0, 100.0, (dim / 4) as f64).unwrap();
        let amplitudes = (0..planes)
            .map(|p| {
                Array2::from_shape_fn((dim, dim), |(i, j)| {
                    1.0 + ((i + 2 * j + 3 * p) as f64 * 0.21).cos().abs()
                })
            })
            .collect();
        RetrievalJob::new(
            IterativeRetriever::new(tf.into_h(), niter, eps),
            Array2::zeros((dim, dim)),
            amplitudes,
        )
    }

    #[test]
    fn test_both_channels_finish() {
        let mut coordinator =
            DualChannelCoordinator::spawn(job(16, 3, 5, 0.0), job(16, 2, 4, 0.0)).unwrap();
        let mut polled = vec![];
        Poller::new(Duration::from_millis(1)).run_until_finished(&mut coordinator, |report| {
            polled.extend_from_slice(report.new_mse(Channel::X));
        });
        assert!(!coordinator.is_running());
        assert_eq!(coordinator.mse_history(Channel::X), polled.as_slice());
        let history_y = coordinator.mse_history(Channel::Y).to_vec();

        let result = coordinator.wait().unwrap();
        assert_eq!(result.x.mse, polled);
        assert_eq!(result.y.mse, history_y);
        assert_eq!(result.x.iterations, 5);
        assert_eq!(result.y.termination, Termination::BudgetExhausted);
    }

    #[test]
    fn test_failure_is_isolated_to_its_channel() {
        let coordinator =
            DualChannelCoordinator::spawn(job(16, 3, 3, 0.0), job(16, 1, 3, 0.0)).unwrap();
        let results = coordinator.join();
        assert_eq!(results.x.unwrap().iterations, 3);
        match results.y {
            Err(RetrieverError::WorkerFailure { channel, reason }) => {
                assert_eq!(channel, Channel::Y);
                assert!(reason.contains("shape"));
            }
            other => panic!("expected a worker failure, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_reports_the_failing_channel() {
        let mut coordinator =
            DualChannelCoordinator::spawn(job(16, 1, 3, 0.0), job(16, 2, 3, 0.0)).unwrap();
        while coordinator.poll().running {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(coordinator.failure(Channel::X).is_some());
        assert_eq!(
            coordinator.termination(Channel::Y),
            Some(Termination::BudgetExhausted)
        );
        assert!(matches!(
            coordinator.wait(),
            Err(RetrieverError::WorkerFailure {
                channel: Channel::X,
                ..
            })
        ));
    }

    #[test]
    fn test_abort_stops_both_workers() {
        let coordinator =
            DualChannelCoordinator::spawn(job(32, 3, usize::MAX, 0.0), job(32, 3, usize::MAX, 0.0))
                .unwrap();
        coordinator.abort();
        let result = coordinator.wait().unwrap();
        assert_eq!(result.x.termination, Termination::Aborted);
        assert_eq!(result.y.termination, Termination::Aborted);
    }

    #[test]
    fn test_drop_aborts_live_workers() {
        let coordinator =
            DualChannelCoordinator::spawn(job(32, 3, usize::MAX, 0.0), job(32, 3, usize::MAX, 0.0))
                .unwrap();
        let flag = coordinator.abort_flag();
        drop(coordinator);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::X.to_string(), "X");
        assert_eq!(format!("{}", Channel::Y), "Y");
    }
}
