use ndarray::Array2;
use std::fmt::Debug;

/// A filter applied to a real 2D map.
///
/// # Example
/// ```
/// use ndarray::Array2;
/// use phase_retriever::filters::filter::{Filter, FilterConfig, FilterDomain};
///
/// #[derive(Debug)]
/// struct Identity;
///
/// impl Filter for Identity {
///     fn config(&self) -> FilterConfig {
///         FilterConfig {
///             name: "Identity".to_string(),
///             description: "Returns the input unchanged.".to_string(),
///             domain: FilterDomain::Spatial,
///         }
///     }
///
///     fn filter(&self, input: &Array2<f64>) -> Array2<f64> {
///         input.clone()
///     }
/// }
///
/// let map = Array2::<f64>::ones((4, 4));
/// assert_eq!(Identity.filter(&map), map);
/// ```
pub trait Filter: Send + Sync + Debug {
    /// Returns the metadata of the filter.
    fn config(&self) -> FilterConfig;

    /// Applies the filter.
    ///
    /// # Arguments
    /// - `input`: the map to filter, left untouched.
    ///
    /// # Returns
    /// The filtered map, of the same shape as `input`.
    fn filter(&self, input: &Array2<f64>) -> Array2<f64>;
}

/// The domain a filter modifies its input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDomain {
    /// Filters acting directly on pixel values.
    Spatial,
    /// Filters acting on the 2D Fourier transform of the map.
    Frequency,
}

/// Configuration and metadata of a filter.
///
/// # Fields
/// - `name`: A human-readable name for the filter.
/// - `description`: What the filter does.
/// - `domain`: The working domain, represented as a `FilterDomain`.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub name: String,
    pub description: String,
    pub domain: FilterDomain,
}
