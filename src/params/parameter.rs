//! Scalar fit parameters and the per-component declaration builder.

use crate::error::{FitError, Result};
use crate::params::ParamId;

/// A single scalar fit variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameter {
    pub value: f64,
    pub low: f64,
    pub high: f64,
    /// Step hint for minimizers. Advisory only; no backend reads it today.
    pub step: f64,
    /// Excluded from the free set when `true`.
    pub fixed: bool,
}

impl Parameter {
    /// Unbounded, free parameter.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            low: f64::NEG_INFINITY,
            high: f64::INFINITY,
            step: f64::NAN,
            fixed: false,
        }
    }

    pub fn with_bounds(mut self, low: f64, high: f64) -> Self {
        self.low = low;
        self.high = high;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Same parameter with `fixed = true`.
    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn in_bounds(&self) -> bool {
        self.low <= self.value && self.value <= self.high
    }

    /// Fails unless `low <= value <= high`.
    pub fn check_bounds(&self, id: &impl std::fmt::Display) -> Result<()> {
        if self.in_bounds() {
            Ok(())
        } else {
            Err(FitError::config(format!(
                "Parameter {id} = {} is outside its bounds [{}, {}].",
                self.value, self.low, self.high
            )))
        }
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::new(value)
    }
}

/// Ordered parameter declaration of a component.
///
/// Scalar slots get index 0; a vector slot named `coeff` with `n` entries
/// produces `coeff[1]` .. `coeff[n]` in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSlots {
    slots: Vec<(ParamId, Parameter)>,
}

impl ParamSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, name: &str, param: impl Into<Parameter>) -> Self {
        self.slots.push((ParamId::scalar(name), param.into()));
        self
    }

    pub fn vector<P: Into<Parameter>>(
        mut self,
        name: &str,
        params: impl IntoIterator<Item = P>,
    ) -> Self {
        for (i, p) in params.into_iter().enumerate() {
            self.slots.push((ParamId::indexed(name, i + 1), p.into()));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ParamId, Parameter)> {
        self.slots.iter()
    }

    pub fn into_vec(self) -> Vec<(ParamId, Parameter)> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_check_is_inclusive() {
        let p = Parameter::new(1.0).with_bounds(1.0, 2.0);
        assert!(p.in_bounds());
        let q = Parameter::new(2.5).with_bounds(1.0, 2.0);
        let err = q.check_bounds(&"peak.norm").unwrap_err();
        assert!(err.to_string().contains("peak.norm"));
    }

    #[test]
    fn vector_slots_are_one_based() {
        let slots = ParamSlots::new()
            .scalar("offset", 0.0)
            .vector("coeff", [1.0, 2.0, 3.0]);
        let ids: Vec<String> = slots.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, ["offset", "coeff[1]", "coeff[2]", "coeff[3]"]);
    }
}
