//! Polarimetric datasets: six intensity images per axial plane.
//!
//! Parsing of the directory layout and file naming of the different dataset producers is left
//! to implementations of [`DatasetLoader`]. [`NpzDatasetLoader`] reads self-describing `.npz`
//! plane bundles, which carry their own plane index and scale.

use crate::error::RetrieverError;
use crate::io::require_entry;
use crate::window::Window;
use ndarray::{Array0, Array2};
use ndarray_npy::NpzReader;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Number of polarimetric channels recorded per plane.
pub const N_CHANNELS: usize = 6;

/// Channel holding the X component intensity (linear analyzer at 90°).
pub const X_CHANNEL: usize = 2;

/// Channel holding the Y component intensity (linear analyzer at 0°).
pub const Y_CHANNEL: usize = 0;

/// Names of the six channels inside a `.npz` plane bundle, in channel order:
/// linear 0°, 45°, 90°, 135°, levo and dextro circular.
pub const CHANNEL_KEYS: [&str; N_CHANNELS] = ["a0", "a45", "a90", "a135", "aLev", "aDex"];

/// One axial plane: six intensity images and the factor converting plane indices to the length
/// unit of the wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub channels: [Array2<f64>; N_CHANNELS],
    pub scale: f64,
}

impl Plane {
    pub fn new(channels: [Array2<f64>; N_CHANNELS], scale: f64) -> Self {
        Plane { channels, scale }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.channels[0].dim()
    }

    /// Total irradiance `S0 = sum(I) / 3`.
    pub fn irradiance(&self) -> Array2<f64> {
        let mut irradiance = Array2::<f64>::zeros(self.shape());
        for image in self.channels.iter() {
            irradiance += image;
        }
        irradiance / 3.0
    }

    /// Copy of the six channels restricted to `window`.
    pub fn crop(&self, window: &Window) -> Plane {
        let channels = std::array::from_fn(|i| window.crop(&self.channels[i]).to_owned());
        Plane::new(channels, self.scale)
    }
}

/// Mapping from integer plane index to [`Plane`], ordered by index.
///
/// A dataset always holds at least two planes of identical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    planes: BTreeMap<i64, Plane>,
    first: i64,
}

impl Dataset {
    /// Validates and wraps the planes.
    ///
    /// # Errors
    /// `RetrieverError::Dataset` if fewer than two planes are given, if the channel images do not
    /// all share one shape, or if a scale is not a positive number.
    pub fn new(planes: BTreeMap<i64, Plane>) -> Result<Self, RetrieverError> {
        if planes.len() < 2 {
            return Err(RetrieverError::Dataset(format!(
                "at least two planes are required, found {}",
                planes.len()
            )));
        }
        let (first, shape) = planes
            .iter()
            .next()
            .map(|(z, plane)| (*z, plane.shape()))
            .unwrap_or((0, (0, 0)));
        if shape.0 == 0 || shape.1 == 0 {
            return Err(RetrieverError::Dataset("empty images".to_string()));
        }
        for (z, plane) in planes.iter() {
            if plane.channels.iter().any(|c| c.dim() != shape) {
                return Err(RetrieverError::Dataset(format!(
                    "images of plane {z} do not match the shape {shape:?}"
                )));
            }
            if !(plane.scale.is_finite() && plane.scale > 0.0) {
                return Err(RetrieverError::Dataset(format!(
                    "plane {z} has an invalid scale {}",
                    plane.scale
                )));
            }
        }
        Ok(Dataset { planes, first })
    }

    pub fn planes(&self) -> &BTreeMap<i64, Plane> {
        &self.planes
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.first_plane().shape()
    }

    pub fn first_plane(&self) -> &Plane {
        &self.planes[&self.first]
    }

    /// Plane indices usable for retrieval: the longest prefix whose consecutive gaps all equal
    /// the first gap. The first unequal gap truncates the set.
    pub fn equally_spaced_indices(&self) -> Vec<i64> {
        let indices: Vec<i64> = self.planes.keys().copied().collect();
        let step = indices[1] - indices[0];
        let mut usable = vec![indices[0], indices[1]];
        for pair in indices.windows(2).skip(1) {
            if pair[1] - pair[0] != step {
                log::warn!(
                    "plane {} breaks the spacing of {step}, using {} of {} planes",
                    pair[1],
                    usable.len(),
                    indices.len()
                );
                break;
            }
            usable.push(pair[1]);
        }
        usable
    }

    /// Axial spacing between the usable planes, in the length unit of the wavelength.
    pub fn plane_spacing(&self) -> f64 {
        let indices = self.equally_spaced_indices();
        (indices[1] - indices[0]) as f64 * self.first_plane().scale
    }

    /// The usable planes, in ascending index order.
    pub fn usable_planes(&self) -> Vec<&Plane> {
        self.equally_spaced_indices()
            .iter()
            .filter_map(|z| self.planes.get(z))
            .collect()
    }

    /// Irradiance of the first plane.
    pub fn irradiance(&self) -> Array2<f64> {
        self.first_plane().irradiance()
    }

    /// All planes restricted to `window`.
    pub fn crop(&self, window: &Window) -> Result<Dataset, RetrieverError> {
        if !window.fits(self.shape()) {
            return Err(RetrieverError::Dataset(format!(
                "window {window:?} exceeds the image shape {:?}",
                self.shape()
            )));
        }
        let planes = self
            .planes
            .iter()
            .map(|(z, plane)| (*z, plane.crop(window)))
            .collect();
        Ok(Dataset {
            planes,
            first: self.first,
        })
    }
}

/// Source of polarimetric datasets.
pub trait DatasetLoader {
    /// Loads every plane found at `path`.
    fn load(&self, path: &Path) -> Result<Dataset, RetrieverError>;
}

/// Loads a directory of `.npz` plane bundles.
///
/// Every bundle holds a scalar `z` (plane index), a scalar `scale` and the six channel images
/// named after [`CHANNEL_KEYS`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NpzDatasetLoader;

impl NpzDatasetLoader {
    /// Reads a single plane bundle.
    ///
    /// # Returns
    /// The plane index and the plane.
    pub fn load_plane(path: &Path) -> Result<(i64, Plane), RetrieverError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let names = npz.names()?;
        let z: Array0<f64> = npz.by_name(require_entry(&names, "z", path)?)?;
        let scale: Array0<f64> = npz.by_name(require_entry(&names, "scale", path)?)?;
        let mut channels: Vec<Array2<f64>> = Vec::with_capacity(N_CHANNELS);
        for key in CHANNEL_KEYS {
            channels.push(npz.by_name(require_entry(&names, key, path)?)?);
        }
        let channels: [Array2<f64>; N_CHANNELS] = channels
            .try_into()
            .map_err(|_| RetrieverError::Dataset("incomplete channel set".to_string()))?;
        Ok((z.into_scalar().round() as i64, Plane::new(channels, scale.into_scalar())))
    }
}

impl DatasetLoader for NpzDatasetLoader {
    fn load(&self, path: &Path) -> Result<Dataset, RetrieverError> {
        let mut files: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "npz"))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(RetrieverError::Dataset(format!(
                "no plane bundles found in {}",
                path.display()
            )));
        }
        let mut planes = BTreeMap::new();
        for file in files.iter() {
            let (z, plane) = Self::load_plane(file)?;
            if planes.insert(z, plane).is_some() {
                log::warn!("plane {z} found twice, keeping {}", file.display());
            }
        }
        log::info!("loaded {} planes from {}", planes.len(), path.display());
        Dataset::new(planes)
    }
}
