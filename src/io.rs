//! `.npz` persistence of retrieval results.

use crate::error::RetrieverError;
use ndarray::{arr0, stack, Array0, Array2, Array3, ArrayView2, Axis};
use ndarray_npy::{NpzReader, NpzWriter};
use num_complex::Complex64;
use std::fs::File;
use std::path::Path;

/// Name of the entry stored for `key`. Archives written by numpy append `.npy` to every key.
pub fn find_entry<'a>(names: &'a [String], key: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|n| n.as_str() == key || n.strip_suffix(".npy") == Some(key))
        .map(String::as_str)
}

/// Like [`find_entry`], failing with a dataset error naming the archive.
pub(crate) fn require_entry<'a>(
    names: &'a [String],
    key: &str,
    path: &Path,
) -> Result<&'a str, RetrieverError> {
    find_entry(names, key)
        .ok_or_else(|| RetrieverError::Dataset(format!("{} has no entry {key}", path.display())))
}

/// Stacks equally shaped planes along a new leading axis.
pub fn stack_planes(planes: &[Array2<f64>]) -> Result<Array3<f64>, RetrieverError> {
    let views: Vec<ArrayView2<f64>> = planes.iter().map(|p| p.view()).collect();
    stack(Axis(0), &views).map_err(|e| RetrieverError::Shape(e.to_string()))
}

/// Everything needed to reproduce a retrieval outside of the session.
///
/// # Fields
/// - `amplitudes_x`, `amplitudes_y`: amplitude stacks the retrieval ran on, `(planes, dim, dim)`.
/// - `phi_x`, `phi_y`: the aligned unit-phasor fields.
/// - `pixel_size`: effective pixel size in wavelengths.
/// - `bandwidth`: radius of the transfer function passband, in frequency bins.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalExport {
    pub amplitudes_x: Array3<f64>,
    pub amplitudes_y: Array3<f64>,
    pub phi_x: Array2<Complex64>,
    pub phi_y: Array2<Complex64>,
    pub pixel_size: f64,
    pub bandwidth: f64,
}

impl RetrievalExport {
    /// Writes the bundle with the entries `A_x`, `A_y`, `phi_x`, `phi_y`, `p` and `ros`.
    pub fn save_npz(&self, path: &Path) -> Result<(), RetrieverError> {
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("A_x", &self.amplitudes_x)?;
        npz.add_array("A_y", &self.amplitudes_y)?;
        npz.add_array("phi_x", &self.phi_x)?;
        npz.add_array("phi_y", &self.phi_y)?;
        npz.add_array("p", &arr0(self.pixel_size))?;
        npz.add_array("ros", &arr0(self.bandwidth))?;
        npz.finish()?;
        log::info!("saved retrieval to {}", path.display());
        Ok(())
    }

    /// Reads a bundle written by [`RetrievalExport::save_npz`].
    pub fn load_npz(path: &Path) -> Result<Self, RetrieverError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let names = npz.names()?;
        let amplitudes_x: Array3<f64> = npz.by_name(require_entry(&names, "A_x", path)?)?;
        let amplitudes_y: Array3<f64> = npz.by_name(require_entry(&names, "A_y", path)?)?;
        let phi_x: Array2<Complex64> = npz.by_name(require_entry(&names, "phi_x", path)?)?;
        let phi_y: Array2<Complex64> = npz.by_name(require_entry(&names, "phi_y", path)?)?;
        let pixel_size: Array0<f64> = npz.by_name(require_entry(&names, "p", path)?)?;
        let bandwidth: Array0<f64> = npz.by_name(require_entry(&names, "ros", path)?)?;
        Ok(RetrievalExport {
            amplitudes_x,
            amplitudes_y,
            phi_x,
            phi_y,
            pixel_size: pixel_size.into_scalar(),
            bandwidth: bandwidth.into_scalar(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_entry_accepts_numpy_suffix() {
        let names = vec!["z.npy".to_string(), "scale".to_string()];
        assert_eq!(find_entry(&names, "z"), Some("z.npy"));
        assert_eq!(find_entry(&names, "scale"), Some("scale"));
        assert_eq!(find_entry(&names, "a0"), None);
    }

    #[test]
    fn test_stack_planes() {
        let planes = vec![Array2::from_elem((2, 3), 1.0), Array2::from_elem((2, 3), 2.0)];
        let stacked = stack_planes(&planes).unwrap();
        assert_eq!(stacked.dim(), (2, 2, 3));
        assert_eq!(stacked[(1, 1, 2)], 2.0);
        let uneven = vec![Array2::from_elem((2, 3), 1.0), Array2::from_elem((3, 2), 2.0)];
        assert!(matches!(stack_planes(&uneven), Err(RetrieverError::Shape(_))));
    }

    #[test]
    fn test_export_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retrieval.npz");
        let export = RetrievalExport {
            amplitudes_x: Array3::from_shape_fn((3, 4, 4), |(p, i, j)| {
                (p * 16 + i * 4 + j) as f64
            }),
            amplitudes_y: Array3::from_elem((3, 4, 4), 0.5),
            phi_x: Array2::from_shape_fn((4, 4), |(i, j)| {
                Complex64::from_polar(1.0, (i + j) as f64)
            }),
            phi_y: Array2::from_elem((4, 4), Complex64::new(0.0, 1.0)),
            pixel_size: 7.5,
            bandwidth: 11.0,
        };
        export.save_npz(&path).unwrap();
        assert_eq!(RetrievalExport::load_npz(&path).unwrap(), export);
    }

    #[test]
    fn test_missing_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("A_x", &Array3::<f64>::zeros((2, 2, 2))).unwrap();
        npz.finish().unwrap();
        assert!(matches!(
            RetrievalExport::load_npz(&path),
            Err(RetrieverError::Dataset(_))
        ));
    }
}
