//! Polarimetric multi-plane phase retrieval.
//!
//! Reconstructs the phase of the two orthogonal field components of a light beam from intensity
//! images recorded at several equally spaced planes along the propagation axis. Each plane carries
//! six polarimetric channels (linear 0°, 45°, 90°, 135°, levo and dextro circular).
//!
//! The crate is organised leaf to root:
//!
//! * [`dataset`]: planes of channel images and the [`DatasetLoader`] trait.
//! * [`window`]: placement of the square analysis window.
//! * [`bandwidth`]: spatial-frequency support of the beam.
//! * [`filters`]: amplitude prefiltering.
//! * [`transfer`]: the band-limited free-space kernel.
//! * [`retrieval`]: the iterative solver for one component.
//! * [`data_thread`]: both components on worker threads, with live telemetry.
//! * [`alignment`]: common phase reference and the Stokes phase difference.
//! * [`propagator`]: the recovered fields at arbitrary axial offsets.
//! * [`retriever`]: the [`PhaseRetriever`] session tying everything together.
//!
//! Logging goes through the `log` facade; installing a logger is up to the host.

pub mod alignment;
pub mod bandwidth;
mod cancellable_loops;
pub mod config;
pub mod data_thread;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod io;
pub mod math_tools;
pub mod propagator;
pub mod retrieval;
pub mod retriever;
pub mod transfer;
pub mod window;

pub use config::{ConfigCommand, RetrieverConfig};
pub use data_thread::{Channel, DualChannelCoordinator, PollReport, Poller, Telemetry};
pub use dataset::{Dataset, DatasetLoader, NpzDatasetLoader, Plane};
pub use error::{RetrieverError, WindowError};
pub use retrieval::{IterativeRetriever, RetrievalOutcome, Termination};
pub use retriever::{PhaseRetriever, RetrievalResult};
pub use window::Window;
