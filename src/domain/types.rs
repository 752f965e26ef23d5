//! Shared domain types.
//!
//! Grid construction and region-of-interest handling live outside this crate;
//! the engine only needs to know how many points a domain has and to hand its
//! coordinates through to component evaluation.

use crate::error::{FitError, Result};

/// Coordinates at which components are evaluated.
///
/// A domain is a list of points; `axes[d][i]` is the coordinate of point `i`
/// along dimension `d`. Every axis has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    axes: Vec<Vec<f64>>,
}

impl Domain {
    /// Build a domain from one coordinate vector per dimension.
    pub fn new(axes: Vec<Vec<f64>>) -> Result<Self> {
        let Some(first) = axes.first() else {
            return Err(FitError::config("A domain needs at least one axis."));
        };
        let n = first.len();
        if let Some((d, axis)) = axes.iter().enumerate().find(|(_, a)| a.len() != n) {
            return Err(FitError::config(format!(
                "Domain axis {d} has {} points, expected {n}.",
                axis.len()
            )));
        }
        if axes.iter().flatten().any(|v| !v.is_finite()) {
            return Err(FitError::config("Domain coordinates must be finite."));
        }
        Ok(Self { axes })
    }

    /// One-dimensional domain.
    pub fn linear(x: Vec<f64>) -> Result<Self> {
        Self::new(vec![x])
    }

    /// `steps` evenly spaced points between `min` and `max` (inclusive).
    pub fn linspace(min: f64, max: f64, steps: usize) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && max > min) {
            return Err(FitError::config(format!(
                "Invalid domain range: min={min}, max={max} (must be finite and max>min)."
            )));
        }
        if steps < 2 {
            return Err(FitError::config("Domain steps must be >= 2."));
        }
        let step = (max - min) / (steps as f64 - 1.0);
        Self::linear((0..steps).map(|i| min + step * i as f64).collect())
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.axes[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dimensions.
    pub fn ndims(&self) -> usize {
        self.axes.len()
    }

    /// Coordinates along dimension `dim`.
    pub fn axis(&self, dim: usize) -> Option<&[f64]> {
        self.axes.get(dim).map(Vec::as_slice)
    }

    /// Coordinates of a one-dimensional domain.
    ///
    /// Errors on multi-dimensional domains, which is how 1-D shapes refuse
    /// them in their `prepare` hook.
    pub fn coords_1d(&self) -> Result<&[f64]> {
        if self.ndims() != 1 {
            return Err(FitError::config(format!(
                "Expected a 1-D domain, got {} dimensions.",
                self.ndims()
            )));
        }
        Ok(&self.axes[0])
    }
}

/// Empirical data for one prediction unit: a value and an uncertainty per point.
#[derive(Debug, Clone, PartialEq)]
pub struct Measures {
    values: Vec<f64>,
    uncertainties: Vec<f64>,
}

impl Measures {
    pub fn new(values: Vec<f64>, uncertainties: Vec<f64>) -> Result<Self> {
        if values.len() != uncertainties.len() {
            return Err(FitError::config(format!(
                "Measures length mismatch: {} values vs {} uncertainties.",
                values.len(),
                uncertainties.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::config("Measured values must be finite."));
        }
        if uncertainties.iter().any(|u| !(u.is_finite() && *u > 0.0)) {
            return Err(FitError::config(
                "Measurement uncertainties must be finite and > 0.",
            ));
        }
        Ok(Self {
            values,
            uncertainties,
        })
    }

    /// Same uncertainty for every point.
    pub fn with_constant_uncertainty(values: Vec<f64>, sigma: f64) -> Result<Self> {
        let uncertainties = vec![sigma; values.len()];
        Self::new(values, uncertainties)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_includes_endpoints() {
        let d = Domain::linspace(-1.0, 1.0, 5).unwrap();
        let x = d.coords_1d().unwrap();
        assert_eq!(d.len(), 5);
        assert!((x[0] + 1.0).abs() < 1e-12);
        assert!((x[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ragged_axes_are_rejected() {
        let err = Domain::new(vec![vec![0.0, 1.0], vec![0.0]]).unwrap_err();
        assert!(matches!(err, FitError::Configuration(_)));
    }

    #[test]
    fn two_dimensional_domain_is_not_1d() {
        let d = Domain::new(vec![vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
        assert_eq!(d.ndims(), 2);
        assert_eq!(d.axis(1), Some(&[2.0, 3.0][..]));
        assert!(d.coords_1d().is_err());
    }

    #[test]
    fn measures_reject_non_positive_uncertainty() {
        assert!(Measures::new(vec![1.0, 2.0], vec![1.0, 0.0]).is_err());
        assert!(Measures::new(vec![1.0], vec![1.0, 1.0]).is_err());
        let m = Measures::with_constant_uncertainty(vec![5.0; 3], 1.0).unwrap();
        assert_eq!(m.uncertainties(), &[1.0, 1.0, 1.0]);
    }
}
