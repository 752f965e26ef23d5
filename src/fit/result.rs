//! Fit outcome snapshot.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::params::{CompParamId, ParamId};

/// Convergence status reported by a minimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Ok,
    Error,
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatus::Ok => write!(f, "OK"),
            FitStatus::Error => write!(f, "Error"),
        }
    }
}

/// Best-fit snapshot of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestFitParam {
    pub value: f64,
    /// NaN unless the parameter was free during the fit.
    pub uncertainty: f64,
    /// `true` when the parameter was excluded from the free set.
    pub fixed: bool,
    /// Value after patch functions, i.e. what the component actually used.
    pub patched: f64,
}

/// Parameters of one component, in declaration order.
pub type CompFit = IndexMap<ParamId, BestFitParam>;

/// Immutable result of a fit.
#[derive(Debug, Clone)]
pub struct BestFitResult {
    /// Per unit, per component, per parameter.
    pub units: Vec<IndexMap<String, CompFit>>,
    pub observations: usize,
    pub free_params: usize,
    /// `observations - free_params`; may be zero or negative.
    pub dof: i64,
    /// Sum of squared normalised residuals at the best fit.
    pub cost: f64,
    pub status: FitStatus,
    /// `ln P(χ² ≥ cost)` for `dof` degrees of freedom; NaN when `dof <= 0`.
    pub log_probability: f64,
    pub elapsed: Duration,
    pub minimizer: String,
    pub iterations: u64,
    pub evaluations: usize,
    pub message: String,
}

impl BestFitResult {
    pub fn is_ok(&self) -> bool {
        self.status == FitStatus::Ok
    }

    pub fn get(&self, id: &CompParamId) -> Option<&BestFitParam> {
        self.units
            .get(id.comp.unit)?
            .get(&id.comp.name)?
            .get(&id.param)
    }

    /// Look up by names; `param` is `"name"` or `"name[i]"`.
    pub fn param(&self, unit: usize, comp: &str, param: &str) -> Option<&BestFitParam> {
        self.units
            .get(unit)?
            .get(comp)?
            .iter()
            .find(|(id, _)| id.matches(param))
            .map(|(_, p)| p)
    }

    /// `cost / dof`, NaN when there are no degrees of freedom.
    pub fn reduced_chi2(&self) -> f64 {
        if self.dof > 0 {
            self.cost / self.dof as f64
        } else {
            f64::NAN
        }
    }
}

/// Log of the chi-squared survival function at `cost`.
pub fn log_probability(cost: f64, dof: i64) -> f64 {
    if dof <= 0 || !cost.is_finite() {
        return f64::NAN;
    }
    match ChiSquared::new(dof as f64) {
        Ok(dist) => dist.sf(cost.max(0.0)).ln(),
        Err(_) => f64::NAN,
    }
}
