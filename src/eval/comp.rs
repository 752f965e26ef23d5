//! Component evaluator: a registered component plus its value-change cache.

use indexmap::IndexMap;

use crate::components::Component;
use crate::domain::Domain;
use crate::error::{FitError, Result};
use crate::params::{ParamId, Parameter};

/// A component bound to its unit's domain.
///
/// Owns the live parameter table of the component; the model's flattened
/// vector is derived from it.
#[derive(Debug)]
pub struct CompEval {
    comp: Box<dyn Component>,
    params: IndexMap<ParamId, Parameter>,
    last_values: Vec<f64>,
    buffer: Vec<f64>,
    counter: usize,
    frozen: usize,
}

impl CompEval {
    /// Prepare `comp` on `domain` and take over its parameter declaration.
    pub fn new(mut comp: Box<dyn Component>, domain: &Domain) -> Result<Self> {
        let mut params = IndexMap::new();
        for (id, param) in comp.parameters().into_vec() {
            if params.insert(id.clone(), param).is_some() {
                return Err(FitError::config(format!(
                    "{} declares parameter '{id}' twice.",
                    comp.kind()
                )));
            }
        }
        let buffer = comp.prepare(domain)?;
        let n = params.len();
        Ok(Self {
            comp,
            params,
            last_values: vec![f64::NAN; n],
            buffer,
            counter: 0,
            frozen: 0,
        })
    }

    /// Re-evaluate only if `values` differ from the last evaluated vector.
    ///
    /// Equality is exact bitwise comparison. Returns `true` when the
    /// component was recomputed.
    pub fn evaluate_cached(&mut self, domain: &Domain, values: &[f64]) -> Result<bool> {
        if values.len() != self.last_values.len() {
            return Err(FitError::numeric(format!(
                "{} expects {} parameter values, got {}.",
                self.comp.kind(),
                self.last_values.len(),
                values.len()
            )));
        }
        if self.counter > 0 && bitwise_eq(values, &self.last_values) {
            return Ok(false);
        }
        if let Some(pos) = values.iter().position(|v| v.is_nan()) {
            let id = self.params.get_index(pos).map(|(id, _)| id.to_string());
            return Err(FitError::numeric(format!(
                "NaN value for parameter '{}' of {}.",
                id.unwrap_or_default(),
                self.comp.kind()
            )));
        }
        self.last_values.copy_from_slice(values);
        self.counter += 1;
        self.comp.evaluate(&mut self.buffer, domain, values);
        Ok(true)
    }

    pub fn kind(&self) -> &'static str {
        self.comp.kind()
    }

    pub fn buffer(&self) -> &[f64] {
        &self.buffer
    }

    /// Number of times the component was actually evaluated.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn params(&self) -> &IndexMap<ParamId, Parameter> {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut IndexMap<ParamId, Parameter> {
        &mut self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen > 0
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen += 1;
    }

    pub(crate) fn thaw(&mut self) {
        self.frozen = self.frozen.saturating_sub(1);
    }

    pub fn freeze_count(&self) -> usize {
        self.frozen
    }
}

fn bitwise_eq(a: &[f64], b: &[f64]) -> bool {
    a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}
