//! Patch functions and the name-indexed view they operate on.
//!
//! A patch function runs on every evaluation, after the raw parameter vector
//! has been copied into the patched vector and before any component is
//! evaluated. Patch functions run in registration order and see each other's
//! writes.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{FitError, Result};
use crate::params::{CompParamId, ParamId};

/// Signature of a patch function.
pub type PatchFn = dyn Fn(&mut PatchView<'_>) -> Result<()>;

/// Position of one component's parameters in the flattened vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct CompSlot {
    pub offset: usize,
    pub params: Vec<ParamId>,
}

impl CompSlot {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.params.len()
    }
}

/// Per-unit component slots, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitSlots {
    pub comps: IndexMap<String, CompSlot>,
}

/// Read/write façade over the patched vector.
///
/// Writes never change the vector's length, only values at fixed offsets.
pub struct PatchView<'a> {
    slots: &'a [UnitSlots],
    values: &'a mut [f64],
}

impl<'a> PatchView<'a> {
    pub(crate) fn new(slots: &'a [UnitSlots], values: &'a mut [f64]) -> Self {
        Self { slots, values }
    }

    /// Number of prediction units.
    pub fn units(&self) -> usize {
        self.slots.len()
    }

    /// Current (possibly already patched) value of `unit`/`comp`/`param`.
    ///
    /// `param` is `"name"` or `"name[i]"`. Unknown names are a configuration error.
    pub fn get(&self, unit: usize, comp: &str, param: &str) -> Result<f64> {
        self.locate(unit, comp, param)
            .map(|i| self.values[i])
            .ok_or_else(|| {
                FitError::config(format!(
                    "Patch view: unknown parameter [{unit}]{comp}.{param}."
                ))
            })
    }

    /// Overwrite the patched value. Unknown names are logged and ignored.
    pub fn set(&mut self, unit: usize, comp: &str, param: &str, value: f64) {
        match self.locate(unit, comp, param) {
            Some(i) => self.values[i] = value,
            None => {
                tracing::warn!(unit, comp, param, "patch writes to unknown parameter; ignored");
            }
        }
    }

    pub fn get_id(&self, id: &CompParamId) -> Result<f64> {
        self.get(id.comp.unit, &id.comp.name, &id.param.to_string())
    }

    pub fn set_id(&mut self, id: &CompParamId, value: f64) {
        self.set(id.comp.unit, &id.comp.name, &id.param.to_string(), value);
    }

    fn locate(&self, unit: usize, comp: &str, param: &str) -> Option<usize> {
        let slot = self.slots.get(unit)?.comps.get(comp)?;
        let pos = slot.params.iter().position(|id| id.matches(param))?;
        Some(slot.offset + pos)
    }
}

/// A registered patch function.
pub(crate) struct Patch {
    pub(crate) label: String,
    pub(crate) func: Box<PatchFn>,
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<UnitSlots> {
        let mut comps = IndexMap::new();
        comps.insert(
            "peak".to_string(),
            CompSlot {
                offset: 0,
                params: vec![ParamId::scalar("norm"), ParamId::scalar("center")],
            },
        );
        comps.insert(
            "poly".to_string(),
            CompSlot {
                offset: 2,
                params: vec![ParamId::indexed("coeff", 1), ParamId::indexed("coeff", 2)],
            },
        );
        vec![UnitSlots { comps }]
    }

    #[test]
    fn reads_and_writes_by_name() {
        let slots = slots();
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        let mut view = PatchView::new(&slots, &mut values);
        assert_eq!(view.get(0, "poly", "coeff[2]").unwrap(), 4.0);
        view.set(0, "peak", "center", 9.0);
        assert_eq!(view.get(0, "peak", "center").unwrap(), 9.0);
        assert_eq!(values, vec![1.0, 9.0, 3.0, 4.0]);
    }

    #[test]
    fn unknown_names_fail_on_read_and_are_ignored_on_write() {
        let slots = slots();
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        let mut view = PatchView::new(&slots, &mut values);
        assert!(matches!(
            view.get(0, "peak", "sigma"),
            Err(FitError::Configuration(_))
        ));
        assert!(view.get(1, "peak", "norm").is_err());
        view.set(0, "nope", "norm", 7.0);
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
