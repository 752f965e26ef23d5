//! Built-in component shapes.
//!
//! Each shape is a small struct holding its initial parameters as public
//! fields (so callers can adjust bounds before registration) and implementing
//! [`Component`] directly. Once registered, the model owns the live parameter
//! values; the struct fields are only the declaration.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::components::Component;
use crate::domain::Domain;
use crate::error::{FitError, Result};
use crate::params::{ParamSlots, Parameter};

/// Floor for width parameters, so a width at its lower bound of zero does not
/// turn the whole buffer into NaN.
const WIDTH_EPS: f64 = 1e-12;

/// A single free value broadcast over the whole domain.
#[derive(Debug, Clone)]
pub struct Constant {
    pub value: Parameter,
}

impl Constant {
    pub fn new(value: f64) -> Self {
        Self {
            value: Parameter::new(value),
        }
    }
}

impl Component for Constant {
    fn kind(&self) -> &'static str {
        "Constant"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new().scalar("value", self.value)
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], _domain: &Domain, params: &[f64]) {
        buffer.fill(params[0]);
    }
}

/// A fixed buffer with no parameters (e.g. a measured background shape).
#[derive(Debug, Clone)]
pub struct Template {
    pub values: Vec<f64>,
}

impl Template {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

impl Component for Template {
    fn kind(&self) -> &'static str {
        "Template"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new()
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        if self.values.len() != domain.len() {
            return Err(FitError::config(format!(
                "Template has {} values but the domain has {} points.",
                self.values.len(),
                domain.len()
            )));
        }
        Ok(vec![0.0; domain.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], _domain: &Domain, _params: &[f64]) {
        buffer.copy_from_slice(&self.values);
    }
}

/// `offset + slope * x` on a 1-D domain.
#[derive(Debug, Clone)]
pub struct Linear {
    pub offset: Parameter,
    pub slope: Parameter,
}

impl Linear {
    pub fn new(offset: f64, slope: f64) -> Self {
        Self {
            offset: Parameter::new(offset),
            slope: Parameter::new(slope),
        }
    }
}

impl Component for Linear {
    fn kind(&self) -> &'static str {
        "Linear"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new()
            .scalar("offset", self.offset)
            .scalar("slope", self.slope)
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.coords_1d()?.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]) {
        let (offset, slope) = (params[0], params[1]);
        if let Ok(x) = domain.coords_1d() {
            for (out, &xi) in buffer.iter_mut().zip(x) {
                *out = offset + slope * xi;
            }
        }
    }
}

/// Area-normalised Gaussian: `norm / (sqrt(2π) σ) · exp(-(x - center)² / 2σ²)`.
#[derive(Debug, Clone)]
pub struct Gaussian {
    pub norm: Parameter,
    pub center: Parameter,
    pub sigma: Parameter,
}

impl Gaussian {
    pub fn new(norm: f64, center: f64, sigma: f64) -> Self {
        Self {
            norm: Parameter::new(norm),
            center: Parameter::new(center),
            sigma: Parameter::new(sigma).with_bounds(0.0, f64::INFINITY),
        }
    }
}

impl Component for Gaussian {
    fn kind(&self) -> &'static str {
        "Gaussian"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new()
            .scalar("norm", self.norm)
            .scalar("center", self.center)
            .scalar("sigma", self.sigma)
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.coords_1d()?.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]) {
        let (norm, center) = (params[0], params[1]);
        let sigma = params[2].abs().max(WIDTH_EPS);
        let scale = norm / ((2.0 * PI).sqrt() * sigma);
        if let Ok(x) = domain.coords_1d() {
            for (out, &xi) in buffer.iter_mut().zip(x) {
                let z = (xi - center) / sigma;
                *out = scale * (-0.5 * z * z).exp();
            }
        }
    }
}

/// Area-normalised Lorentzian with full width at half maximum `fwhm`.
#[derive(Debug, Clone)]
pub struct Lorentzian {
    pub norm: Parameter,
    pub center: Parameter,
    pub fwhm: Parameter,
}

impl Lorentzian {
    pub fn new(norm: f64, center: f64, fwhm: f64) -> Self {
        Self {
            norm: Parameter::new(norm),
            center: Parameter::new(center),
            fwhm: Parameter::new(fwhm).with_bounds(0.0, f64::INFINITY),
        }
    }
}

impl Component for Lorentzian {
    fn kind(&self) -> &'static str {
        "Lorentzian"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new()
            .scalar("norm", self.norm)
            .scalar("center", self.center)
            .scalar("fwhm", self.fwhm)
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.coords_1d()?.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]) {
        let (norm, center) = (params[0], params[1]);
        let gamma = 0.5 * params[2].abs().max(WIDTH_EPS);
        if let Ok(x) = domain.coords_1d() {
            for (out, &xi) in buffer.iter_mut().zip(x) {
                let dx = xi - center;
                *out = norm * (gamma / PI) / (dx * dx + gamma * gamma);
            }
        }
    }
}

/// `coeff[1] + coeff[2]·x + coeff[3]·x² + ...` on a 1-D domain.
#[derive(Debug, Clone)]
pub struct Polynomial {
    pub coeff: Vec<Parameter>,
}

impl Polynomial {
    /// Coefficients in increasing power order.
    pub fn new(coeff: impl IntoIterator<Item = f64>) -> Self {
        Self {
            coeff: coeff.into_iter().map(Parameter::new).collect(),
        }
    }
}

impl Component for Polynomial {
    fn kind(&self) -> &'static str {
        "Polynomial"
    }

    fn parameters(&self) -> ParamSlots {
        ParamSlots::new().vector("coeff", self.coeff.iter().copied())
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.coords_1d()?.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]) {
        if let Ok(x) = domain.coords_1d() {
            for (out, &xi) in buffer.iter_mut().zip(x) {
                // Horner, highest power first.
                *out = params.iter().rev().fold(0.0, |acc, &c| acc * xi + c);
            }
        }
    }
}

/// In-place evaluation closure used by [`FuncWrap`].
pub type EvalFn = dyn Fn(&mut [f64], &Domain, &[f64]) + Send + Sync;

/// A user-supplied function with an explicitly declared parameter list.
///
/// The closure receives the output buffer, the domain and the parameter
/// values in the order declared by `params`.
#[derive(Clone)]
pub struct FuncWrap {
    params: ParamSlots,
    func: Arc<EvalFn>,
}

impl FuncWrap {
    pub fn new(
        params: ParamSlots,
        func: impl Fn(&mut [f64], &Domain, &[f64]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FuncWrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncWrap")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Component for FuncWrap {
    fn kind(&self) -> &'static str {
        "FuncWrap"
    }

    fn parameters(&self) -> ParamSlots {
        self.params.clone()
    }

    fn prepare(&mut self, domain: &Domain) -> Result<Vec<f64>> {
        Ok(vec![0.0; domain.len()])
    }

    fn evaluate(&self, buffer: &mut [f64], domain: &Domain, params: &[f64]) {
        (self.func)(buffer, domain, params);
    }
}
