//! Spatial filters applied to amplitude maps before retrieval.
//!
//! Filters operate on real 2D maps and return a new map of the same shape. Each filter
//! implements the `Filter` trait defined in the `filter` module.

/// Core filter interface and metadata.
pub mod filter;

/// Disk lowpass in the spatial-frequency domain.
pub mod low_pass;
