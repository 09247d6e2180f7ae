//! Error taxonomy of the retrieval engine.
//!
//! Configuration and dataset problems are reported synchronously, before any worker is started.
//! Numeric degeneracies inside the iterative loop never surface here; they are absorbed by the
//! epsilon guards of the solver.

use crate::data_thread::Channel;
use thiserror::Error;

/// Reasons the window selection can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("irradiance not yet computed, load a dataset first")]
    IrradianceUnavailable,
    #[error("window side {dim} does not fit into a {rows}x{cols} image")]
    TooLarge { dim: usize, rows: usize, cols: usize },
}

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("window error: {0}")]
    Window(#[from] WindowError),
    #[error("could not estimate the bandwidth of the beam")]
    BandwidthEstimationFailure,
    #[error("shape error: {0}")]
    Shape(String),
    #[error("retrieval of the {channel} component failed: {reason}")]
    WorkerFailure { channel: Channel, reason: String },
    #[error("a retrieval is already running")]
    RetrievalInProgress,
    #[error("no retrieval has been started")]
    NoResult,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed reading npz archive: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),
    #[error("failed writing npz archive: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
}
