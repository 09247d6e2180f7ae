//! Per-session configuration of the phase retriever.
//!
//! The configuration is an owned structure with enumerated fields. It can be changed with typed
//! [`ConfigCommand`]s or from a flat `key -> value` mapping (the form an external JSON layer or a
//! property grid produces). Unknown keys and unparsable values are rejected.

use crate::error::RetrieverError;
use crate::window::Window;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Commands that modify a [`RetrieverConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigCommand {
    /// Physical pixel pitch, same length unit as the wavelength.
    SetPixelSize(f64),
    /// Side of the square analysis window in pixels.
    SetDim(usize),
    /// Explicit window, overrides the automatic centring.
    SetRect(Option<Window>),
    /// Iteration budget per channel.
    SetIterations(usize),
    /// MSE threshold for convergence.
    SetEps(f64),
    /// Bandwidth radius in frequency samples, overrides the estimation.
    SetBandwidth(Option<f64>),
    /// Reference pixel `(row, col)` inside the window.
    SetOrigin(Option<(usize, usize)>),
    SetWavelength(f64),
    SetMagnification(f64),
    SetPrefilter(bool),
    SetPath(PathBuf),
}

/// Which derived quantities a command invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Invalidation {
    pub window: bool,
    pub transfer_function: bool,
}

impl ConfigCommand {
    /// Parses a flat `key = value` pair.
    ///
    /// Recognized keys: `pixel_size`, `dim`, `rect` (`y0,x0,y1,x1` or `none`), `n_max`/`niter`,
    /// `eps`, `bandwidth` (number or `none`), `origin` (`row,col` or `none`), `lamb`,
    /// `magnification`, `prefilter`, `path`.
    pub fn parse(key: &str, value: &str) -> Result<ConfigCommand, RetrieverError> {
        let value = value.trim();
        let command = match key {
            "pixel_size" => ConfigCommand::SetPixelSize(parse_value(key, value)?),
            "dim" => ConfigCommand::SetDim(parse_value(key, value)?),
            "rect" => ConfigCommand::SetRect(match parse_optional_list::<usize>(key, value, 4)? {
                Some(v) => Some(Window::new((v[0], v[1]), (v[2], v[3]))),
                None => None,
            }),
            "n_max" | "niter" => ConfigCommand::SetIterations(parse_value(key, value)?),
            "eps" => ConfigCommand::SetEps(parse_value(key, value)?),
            "bandwidth" => ConfigCommand::SetBandwidth(if is_none(value) {
                None
            } else {
                Some(parse_value(key, value)?)
            }),
            "origin" => ConfigCommand::SetOrigin(
                parse_optional_list::<usize>(key, value, 2)?.map(|v| (v[0], v[1])),
            ),
            "lamb" => ConfigCommand::SetWavelength(parse_value(key, value)?),
            "magnification" => ConfigCommand::SetMagnification(parse_value(key, value)?),
            "prefilter" => ConfigCommand::SetPrefilter(parse_value(key, value)?),
            "path" => ConfigCommand::SetPath(PathBuf::from(value)),
            _ => {
                return Err(RetrieverError::Configuration(format!(
                    "option {key} does not exist"
                )))
            }
        };
        Ok(command)
    }
}

fn is_none(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("none")
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RetrieverError> {
    value.parse::<T>().map_err(|_| {
        RetrieverError::Configuration(format!("invalid value {value:?} for option {key}"))
    })
}

fn parse_optional_list<T: std::str::FromStr>(
    key: &str,
    value: &str,
    len: usize,
) -> Result<Option<Vec<T>>, RetrieverError> {
    if is_none(value) {
        return Ok(None);
    }
    let items = value
        .trim_matches(|c| c == '(' || c == ')' || c == '[' || c == ']')
        .split(',')
        .map(|v| parse_value::<T>(key, v.trim()))
        .collect::<Result<Vec<T>, _>>()?;
    if items.len() != len {
        return Err(RetrieverError::Configuration(format!(
            "option {key} expects {len} comma separated values, got {}",
            items.len()
        )));
    }
    Ok(Some(items))
}

/// Owned configuration of one retrieval session.
///
/// # Fields
/// - `pixel_size`: physical pixel pitch (required before retrieving).
/// - `lamb`: wavelength in the same unit as `pixel_size` (required before retrieving).
/// - `magnification`: optical magnification, the effective pixel is `pixel_size / magnification`.
/// - `dim`: side of the square analysis window.
/// - `rect`: explicit window, `None` for automatic centring.
/// - `n_max`: iteration budget per channel.
/// - `eps`: MSE convergence threshold.
/// - `bandwidth`: bandwidth radius override, `None` for automatic estimation.
/// - `origin`: phase reference pixel inside the window, `None` for the irradiance maximum.
/// - `prefilter`: lowpass the amplitude maps to the beam support before retrieving.
/// - `path`: dataset location, consumed by the dataset loader.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub pixel_size: Option<f64>,
    pub lamb: Option<f64>,
    pub magnification: f64,
    pub dim: usize,
    pub rect: Option<Window>,
    pub n_max: usize,
    pub eps: f64,
    pub bandwidth: Option<f64>,
    pub origin: Option<(usize, usize)>,
    pub prefilter: bool,
    pub path: Option<PathBuf>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        RetrieverConfig {
            pixel_size: None,
            lamb: None,
            magnification: 1.0,
            dim: 256,
            rect: None,
            n_max: 200,
            eps: 0.01,
            bandwidth: None,
            origin: None,
            prefilter: true,
            path: None,
        }
    }
}

impl RetrieverConfig {
    /// Builds a validated configuration from a flat `key -> value` mapping, starting from the
    /// defaults.
    pub fn from_options<I, K, V>(options: I) -> Result<Self, RetrieverError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = RetrieverConfig::default();
        for (key, value) in options {
            config.apply(ConfigCommand::parse(key.as_ref(), value.as_ref())?)?;
        }
        Ok(config)
    }

    /// Applies a single command, after validating its value.
    ///
    /// # Returns
    /// The derived quantities that have to be recomputed because of this change.
    pub fn apply(&mut self, command: ConfigCommand) -> Result<Invalidation, RetrieverError> {
        let mut invalidation = Invalidation::default();
        match command {
            ConfigCommand::SetPixelSize(p) => {
                ensure_positive("pixel_size", p)?;
                self.pixel_size = Some(p);
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetDim(dim) => {
                if dim < 2 {
                    return Err(RetrieverError::Configuration(format!(
                        "dim must be at least 2, got {dim}"
                    )));
                }
                self.dim = dim;
                // an explicit window of another size no longer applies
                if self.rect.is_some_and(|r| r.side() != Some(dim)) {
                    self.rect = None;
                }
                invalidation.window = true;
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetRect(rect) => {
                if let Some(r) = rect {
                    match r.side() {
                        Some(side) if side >= 2 => self.dim = side,
                        _ => {
                            return Err(RetrieverError::Configuration(format!(
                                "rect must be a square of side >= 2, got {r:?}"
                            )))
                        }
                    }
                }
                self.rect = rect;
                invalidation.window = true;
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetIterations(n) => {
                if n == 0 {
                    return Err(RetrieverError::Configuration(
                        "n_max must be positive".to_string(),
                    ));
                }
                self.n_max = n;
            }
            ConfigCommand::SetEps(eps) => {
                if !(eps.is_finite() && eps >= 0.0) {
                    return Err(RetrieverError::Configuration(format!(
                        "eps must be a non-negative number, got {eps}"
                    )));
                }
                self.eps = eps;
            }
            ConfigCommand::SetBandwidth(bw) => {
                if let Some(bw) = bw {
                    ensure_positive("bandwidth", bw)?;
                }
                self.bandwidth = bw;
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetOrigin(origin) => {
                self.origin = origin;
            }
            ConfigCommand::SetWavelength(lamb) => {
                ensure_positive("lamb", lamb)?;
                self.lamb = Some(lamb);
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetMagnification(m) => {
                // the sign only encodes image inversion
                ensure_positive("magnification", m.abs())?;
                self.magnification = m.abs();
                invalidation.transfer_function = true;
            }
            ConfigCommand::SetPrefilter(prefilter) => {
                self.prefilter = prefilter;
            }
            ConfigCommand::SetPath(path) => {
                self.path = Some(path);
            }
        }
        Ok(invalidation)
    }

    /// Effective pixel size in wavelength units, `pixel_size / magnification / lamb`.
    pub fn effective_pixel_size(&self) -> Result<f64, RetrieverError> {
        let pixel_size = self.pixel_size.ok_or_else(|| {
            RetrieverError::Configuration("pixel size not specified".to_string())
        })?;
        let lamb = self.wavelength()?;
        Ok(pixel_size / self.magnification / lamb)
    }

    pub fn wavelength(&self) -> Result<f64, RetrieverError> {
        self.lamb
            .ok_or_else(|| RetrieverError::Configuration("wavelength not specified".to_string()))
    }
}

fn ensure_positive(key: &str, value: f64) -> Result<(), RetrieverError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RetrieverError::Configuration(format!(
            "{key} must be a positive number, got {value}"
        )))
    }
}
