//! The model: prediction units plus the flattened, patched parameter space.
//!
//! Two operations drive everything:
//!
//! - `rebuild`: after any structural change, walk units → components →
//!   parameters in order, assign flat indices and build the raw and patched
//!   vectors from the current parameter values.
//! - `quick_evaluate`: copy raw → patched, run patch functions in order,
//!   re-evaluate every component against its slice of the patched vector
//!   (cache-checked), then reduce every unit in order.
//!
//! The derived flat state is rebuilt from scratch, never patched incrementally.

use indexmap::IndexMap;

use crate::components::{Component, Constant, Item};
use crate::domain::Domain;
use crate::error::{FitError, Result};
use crate::eval::comp::CompEval;
use crate::eval::patch::{CompSlot, Patch, PatchView, UnitSlots};
use crate::eval::reducer::Reducer;
use crate::eval::unit::PredictionUnit;
use crate::params::{CompId, CompParamId, ParamId, Parameter};

/// Derived cross-unit state. Invariant: `ids`, `values` and `patched` have
/// the same length, equal to the total parameter count.
#[derive(Debug)]
struct Flat {
    slots: Vec<UnitSlots>,
    ids: Vec<CompParamId>,
    values: Vec<f64>,
    patched: Vec<f64>,
}

/// Snapshot of one flattened parameter, used by the fit driver.
#[derive(Debug, Clone)]
pub(crate) struct FlatParam {
    pub(crate) unit: usize,
    pub(crate) param: Parameter,
    pub(crate) frozen: bool,
}

/// A composable model over one or more prediction units.
#[derive(Debug, Default)]
pub struct Model {
    units: Vec<PredictionUnit>,
    patches: Vec<Patch>,
    flat: Option<Flat>,
}

impl Model {
    /// Model with a single prediction unit on `domain`.
    pub fn new(domain: Domain) -> Self {
        Self::with_units([domain])
    }

    /// Model with one prediction unit per domain, in order.
    pub fn with_units(domains: impl IntoIterator<Item = Domain>) -> Self {
        Self {
            units: domains.into_iter().map(PredictionUnit::new).collect(),
            patches: Vec::new(),
            flat: None,
        }
    }

    /// Append a prediction unit; returns its index.
    pub fn add_unit(&mut self, domain: Domain) -> usize {
        self.units.push(PredictionUnit::new(domain));
        self.flat = None;
        self.units.len() - 1
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit(&self, unit: usize) -> Result<&PredictionUnit> {
        self.units
            .get(unit)
            .ok_or_else(|| FitError::config(format!("No prediction unit {unit}.")))
    }

    fn unit_mut(&mut self, unit: usize) -> Result<&mut PredictionUnit> {
        self.units
            .get_mut(unit)
            .ok_or_else(|| FitError::config(format!("No prediction unit {unit}.")))
    }

    /// Register `item` under `name` in `unit`.
    pub fn add_to(&mut self, unit: usize, name: &str, item: impl Into<Item>) -> Result<()> {
        let target = self.unit_mut(unit)?;
        match item.into() {
            Item::Constant(v) => target.add_component(name, Box::new(Constant::new(v)))?,
            Item::Component(comp) => target.add_component(name, comp)?,
            Item::Reducer(reducer) => target.add_reducer(name, reducer)?,
        }
        self.flat = None;
        tracing::debug!(unit, name, "registered item; flat layout invalidated");
        Ok(())
    }

    /// Register `item` in the first unit.
    pub fn add(&mut self, name: &str, item: impl Into<Item>) -> Result<()> {
        self.add_to(0, name, item)
    }

    pub fn add_component(&mut self, name: &str, comp: impl Component + 'static) -> Result<()> {
        self.add_to(0, name, Item::component(comp))
    }

    pub fn add_component_to(
        &mut self,
        unit: usize,
        name: &str,
        comp: impl Component + 'static,
    ) -> Result<()> {
        self.add_to(unit, name, Item::component(comp))
    }

    pub fn add_reducer(&mut self, name: &str, reducer: Reducer) -> Result<()> {
        self.add_to(0, name, reducer)
    }

    pub fn add_reducer_to(&mut self, unit: usize, name: &str, reducer: Reducer) -> Result<()> {
        self.add_to(unit, name, reducer)
    }

    /// Choose which reducer is `unit`'s output.
    pub fn select(&mut self, unit: usize, name: &str) -> Result<()> {
        self.unit_mut(unit)?.select(name)
    }

    /// Append a patch function. Patch functions run in the order they were added.
    pub fn add_patch(
        &mut self,
        label: &str,
        func: impl Fn(&mut PatchView<'_>) -> Result<()> + 'static,
    ) -> usize {
        self.patches.push(Patch {
            label: label.to_string(),
            func: Box::new(func),
        });
        self.patches.len() - 1
    }

    /// Patch labels in application order.
    pub fn patch_labels(&self) -> impl Iterator<Item = &str> {
        self.patches.iter().map(|p| p.label.as_str())
    }

    fn comp_mut(&mut self, unit: usize, name: &str) -> Result<&mut CompEval> {
        self.unit_mut(unit)?
            .comps_mut()
            .get_mut(name)
            .ok_or_else(|| FitError::config(format!("No component '{name}' in unit {unit}.")))
    }

    fn comp(&self, unit: usize, name: &str) -> Result<&CompEval> {
        self.unit(unit)?
            .comps()
            .get(name)
            .ok_or_else(|| FitError::config(format!("No component '{name}' in unit {unit}.")))
    }

    /// Exclude a component's parameters from fitting. Nested freezes count.
    pub fn freeze(&mut self, unit: usize, name: &str) -> Result<()> {
        self.comp_mut(unit, name)?.freeze();
        Ok(())
    }

    /// Undo one `freeze`.
    pub fn thaw(&mut self, unit: usize, name: &str) -> Result<()> {
        self.comp_mut(unit, name)?.thaw();
        Ok(())
    }

    pub fn is_frozen(&self, unit: usize, name: &str) -> Result<bool> {
        Ok(self.comp(unit, name)?.is_frozen())
    }

    /// Outstanding `freeze` calls on a component.
    pub fn freeze_count(&self, unit: usize, name: &str) -> Result<usize> {
        Ok(self.comp(unit, name)?.freeze_count())
    }

    pub fn param(&self, id: &CompParamId) -> Result<&Parameter> {
        self.comp(id.comp.unit, &id.comp.name)?
            .params()
            .get(&id.param)
            .ok_or_else(|| FitError::config(format!("No parameter {id}.")))
    }

    /// Mutable access to a stored parameter.
    ///
    /// Value edits reach the flattened vector on the next [`Model::evaluate`].
    pub fn param_mut(&mut self, id: &CompParamId) -> Result<&mut Parameter> {
        self.comp_mut(id.comp.unit, &id.comp.name)?
            .params_mut()
            .get_mut(&id.param)
            .ok_or_else(|| FitError::config(format!("No parameter {id}.")))
    }

    pub fn component_params(&self, unit: usize, name: &str) -> Result<&IndexMap<ParamId, Parameter>> {
        Ok(self.comp(unit, name)?.params())
    }

    /// Rebuild the flattened layout and vectors from the current structure.
    pub fn rebuild(&mut self) -> Result<()> {
        let mut slots = Vec::with_capacity(self.units.len());
        let mut ids = Vec::new();
        let mut values = Vec::new();

        for (u, unit) in self.units.iter_mut().enumerate() {
            unit.prepare_output()?;
            let mut comps = IndexMap::new();
            for (name, ce) in unit.comps() {
                comps.insert(
                    name.clone(),
                    CompSlot {
                        offset: values.len(),
                        params: ce.params().keys().cloned().collect(),
                    },
                );
                for (id, p) in ce.params() {
                    ids.push(CompParamId {
                        comp: CompId::new(u, name),
                        param: id.clone(),
                    });
                    values.push(p.value);
                }
            }
            slots.push(UnitSlots { comps });
        }

        tracing::debug!(
            units = self.units.len(),
            params = values.len(),
            "rebuilt flattened parameter layout"
        );
        let patched = values.clone();
        self.flat = Some(Flat {
            slots,
            ids,
            values,
            patched,
        });
        Ok(())
    }

    /// Full evaluation: rebuild if the structure changed, refresh the raw
    /// vector from the stored parameters, then [`Model::quick_evaluate`].
    pub fn evaluate(&mut self) -> Result<()> {
        if let Some(flat) = self.flat.as_mut() {
            let stored = self
                .units
                .iter()
                .flat_map(|u| u.comps().values())
                .flat_map(|ce| ce.params().values());
            for (slot, p) in flat.values.iter_mut().zip(stored) {
                *slot = p.value;
            }
        } else {
            self.rebuild()?;
        }
        self.quick_evaluate()
    }

    /// Per-iteration evaluation from the current raw vector; no structural work.
    pub fn quick_evaluate(&mut self) -> Result<()> {
        if self.flat.is_none() {
            self.rebuild()?;
        }
        let Some(flat) = self.flat.as_mut() else {
            return Err(FitError::numeric("Flattened parameter layout is missing."));
        };

        flat.patched.copy_from_slice(&flat.values);
        {
            let mut view = PatchView::new(&flat.slots, &mut flat.patched);
            for patch in &self.patches {
                (patch.func)(&mut view)?;
            }
        }

        for (unit, unit_slots) in self.units.iter_mut().zip(&flat.slots) {
            let (comps, domain) = unit.comps_and_domain();
            for (ce, slot) in comps.values_mut().zip(unit_slots.comps.values()) {
                ce.evaluate_cached(domain, &flat.patched[slot.range()])?;
            }
        }
        for unit in &mut self.units {
            unit.reduce()?;
        }
        Ok(())
    }

    /// Output buffer of `unit` as of the last evaluation.
    pub fn output(&self, unit: usize) -> Result<&[f64]> {
        Ok(self.unit(unit)?.output())
    }

    /// Buffer of a named component or reducer.
    pub fn buffer(&self, unit: usize, name: &str) -> Result<&[f64]> {
        self.unit(unit)?
            .buffer(name)
            .ok_or_else(|| FitError::config(format!("No component or reducer '{name}' in unit {unit}.")))
    }

    /// How many times a component has actually been evaluated.
    pub fn eval_count(&self, unit: usize, name: &str) -> Result<usize> {
        Ok(self.comp(unit, name)?.counter())
    }

    /// Total number of parameters across all units.
    pub fn param_count(&self) -> usize {
        self.units
            .iter()
            .flat_map(|u| u.comps().values())
            .map(CompEval::param_count)
            .sum()
    }

    /// Flat-index → parameter key. Empty until the first rebuild.
    pub fn flat_ids(&self) -> &[CompParamId] {
        self.flat.as_ref().map(|f| f.ids.as_slice()).unwrap_or(&[])
    }

    pub fn flat_values(&self) -> &[f64] {
        self.flat.as_ref().map(|f| f.values.as_slice()).unwrap_or(&[])
    }

    pub fn patched_values(&self) -> &[f64] {
        self.flat.as_ref().map(|f| f.patched.as_slice()).unwrap_or(&[])
    }

    /// Patched value of one parameter as of the last evaluation.
    pub fn patched(&self, id: &CompParamId) -> Result<f64> {
        let flat = self
            .flat
            .as_ref()
            .ok_or_else(|| FitError::config("Model has not been evaluated yet."))?;
        flat.ids
            .iter()
            .position(|k| k == id)
            .map(|i| flat.patched[i])
            .ok_or_else(|| FitError::config(format!("No parameter {id}.")))
    }

    /// Free parameters: not fixed and owned by a non-frozen component.
    pub fn free_param_count(&self) -> usize {
        self.units
            .iter()
            .flat_map(|u| u.comps().values())
            .filter(|ce| !ce.is_frozen())
            .flat_map(|ce| ce.params().values())
            .filter(|p| !p.fixed)
            .count()
    }

    /// Fails on the first stored parameter outside its own bounds.
    pub fn check_bounds(&self) -> Result<()> {
        for (u, unit) in self.units.iter().enumerate() {
            for (name, ce) in unit.comps() {
                for (id, p) in ce.params() {
                    p.check_bounds(&CompParamId::new(u, name, id.clone()))?;
                }
            }
        }
        Ok(())
    }

    /// Parameters in flat order with their owning unit and freeze state.
    pub(crate) fn flat_params(&self) -> Vec<FlatParam> {
        let mut out = Vec::with_capacity(self.param_count());
        for (u, unit) in self.units.iter().enumerate() {
            for ce in unit.comps().values() {
                for p in ce.params().values() {
                    out.push(FlatParam {
                        unit: u,
                        param: *p,
                        frozen: ce.is_frozen(),
                    });
                }
            }
        }
        out
    }

    /// Write `values[k]` into flat slot `indices[k]`.
    pub(crate) fn set_flat(&mut self, indices: &[usize], values: &[f64]) -> Result<()> {
        let flat = self
            .flat
            .as_mut()
            .ok_or_else(|| FitError::config("Model has not been evaluated yet."))?;
        for (&i, &v) in indices.iter().zip(values) {
            flat.values[i] = v;
        }
        Ok(())
    }

    /// Copy the raw flat vector back into the stored parameters.
    pub(crate) fn store_flat(&mut self) {
        let Some(flat) = &self.flat else {
            return;
        };
        let stored = self
            .units
            .iter_mut()
            .flat_map(|u| u.comps_mut().values_mut())
            .flat_map(|ce| ce.params_mut().values_mut());
        for (p, &v) in stored.zip(&flat.values) {
            p.value = v;
        }
    }

    /// Freeze every component outside `keep`; returns what to thaw afterwards.
    pub(crate) fn freeze_all_except(&mut self, keep: usize) -> Vec<(usize, String)> {
        let mut frozen = Vec::new();
        for (u, unit) in self.units.iter_mut().enumerate() {
            if u == keep {
                continue;
            }
            for (name, ce) in unit.comps_mut().iter_mut() {
                ce.freeze();
                frozen.push((u, name.clone()));
            }
        }
        frozen
    }

    pub(crate) fn thaw_all(&mut self, comps: &[(usize, String)]) {
        for (u, name) in comps {
            if let Ok(ce) = self.comp_mut(*u, name) {
                ce.thaw();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Gaussian, Linear, Polynomial};

    fn domain() -> Domain {
        Domain::linspace(-2.0, 2.0, 9).unwrap()
    }

    fn build() -> Model {
        let mut m = Model::new(domain());
        m.add_component("bkg", Linear::new(1.0, 0.5)).unwrap();
        m.add_component("peak", Gaussian::new(2.0, 0.0, 0.7)).unwrap();
        m.add_component("poly", Polynomial::new([0.0, 0.1])).unwrap();
        m.add_reducer("main", Reducer::sum_all()).unwrap();
        m
    }

    fn id(comp: &str, param: &str) -> CompParamId {
        CompParamId::parse(0, comp, param).unwrap()
    }

    #[test]
    fn flattening_is_deterministic() {
        let mut a = build();
        let mut b = build();
        a.rebuild().unwrap();
        b.rebuild().unwrap();
        assert_eq!(a.flat_ids(), b.flat_ids());
        assert_eq!(a.patched_values(), b.patched_values());

        let names: Vec<String> = a.flat_ids().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            [
                "[0]bkg.offset",
                "[0]bkg.slope",
                "[0]peak.norm",
                "[0]peak.center",
                "[0]peak.sigma",
                "[0]poly.coeff[1]",
                "[0]poly.coeff[2]",
            ]
        );
        assert_eq!(a.flat_values().len(), a.param_count());
        assert_eq!(a.patched_values().len(), a.param_count());
    }

    #[test]
    fn only_changed_components_are_re_evaluated() {
        let mut m = build();
        m.evaluate().unwrap();
        m.evaluate().unwrap();
        assert_eq!(m.eval_count(0, "bkg").unwrap(), 1);
        assert_eq!(m.eval_count(0, "peak").unwrap(), 1);

        m.param_mut(&id("peak", "center")).unwrap().value = 0.25;
        m.evaluate().unwrap();
        assert_eq!(m.eval_count(0, "bkg").unwrap(), 1);
        assert_eq!(m.eval_count(0, "peak").unwrap(), 2);
        assert_eq!(m.eval_count(0, "poly").unwrap(), 1);
    }

    #[test]
    fn patches_apply_in_registration_order() {
        let mut m = Model::new(domain());
        m.add_component("a", Constant::new(0.0)).unwrap();
        m.add_patch("set", |v| {
            v.set(0, "a", "value", 1.0);
            Ok(())
        });
        m.add_patch("increment", |v| {
            let x = v.get(0, "a", "value")?;
            v.set(0, "a", "value", x + 1.0);
            Ok(())
        });
        m.evaluate().unwrap();
        assert_eq!(m.patched(&id("a", "value")).unwrap(), 2.0);
        assert_eq!(m.flat_values(), &[0.0]);
        assert_eq!(m.patch_labels().collect::<Vec<_>>(), ["set", "increment"]);

        let mut r = Model::new(domain());
        r.add_component("a", Constant::new(0.0)).unwrap();
        r.add_patch("increment", |v| {
            let x = v.get(0, "a", "value")?;
            v.set(0, "a", "value", x + 1.0);
            Ok(())
        });
        r.add_patch("set", |v| {
            v.set(0, "a", "value", 1.0);
            Ok(())
        });
        r.evaluate().unwrap();
        assert_eq!(r.patched(&id("a", "value")).unwrap(), 1.0);
    }

    #[test]
    fn patch_reading_unknown_name_aborts_evaluation() {
        let mut m = Model::new(domain());
        m.add("a", 1.0).unwrap();
        m.add_patch("broken", |v| v.get(0, "missing", "value").map(|_| ()));
        assert!(matches!(m.evaluate(), Err(FitError::Configuration(_))));
    }

    #[test]
    fn patches_couple_units() {
        let mut m = Model::with_units([domain(), domain()]);
        m.add_component_to(0, "peak", Gaussian::new(1.0, 0.3, 0.5)).unwrap();
        m.add_component_to(1, "peak", Gaussian::new(1.0, -1.0, 0.5)).unwrap();
        m.add_patch("shared center", |v| {
            let c = v.get(0, "peak", "center")?;
            v.set(1, "peak", "center", c);
            Ok(())
        });
        m.evaluate().unwrap();
        assert_eq!(m.output(0).unwrap(), m.output(1).unwrap());
        let center1 = CompParamId::parse(1, "peak", "center").unwrap();
        assert_eq!(m.patched(&center1).unwrap(), 0.3);
        assert_eq!(m.param(&center1).unwrap().value, -1.0);
    }

    #[test]
    fn structural_change_triggers_rebuild() {
        let mut m = build();
        m.evaluate().unwrap();
        let before = m.flat_ids().len();
        m.add("extra", 3.0).unwrap();
        assert!(m.flat_ids().is_empty());
        m.evaluate().unwrap();
        assert_eq!(m.flat_ids().len(), before + 1);
        // `main` was wired before `extra` existed.
        let main = m.buffer(0, "main").unwrap().to_vec();
        let bkg = m.buffer(0, "bkg").unwrap();
        let peak = m.buffer(0, "peak").unwrap();
        let poly = m.buffer(0, "poly").unwrap();
        for i in 0..main.len() {
            assert!((main[i] - (bkg[i] + peak[i] + poly[i])).abs() < 1e-12);
        }
    }

    #[test]
    fn nan_parameter_is_a_numeric_error() {
        let mut m = build();
        m.param_mut(&id("bkg", "slope")).unwrap().value = f64::NAN;
        assert!(matches!(m.evaluate(), Err(FitError::Numeric(_))));
    }

    #[test]
    fn freeze_nests_and_counts_free_parameters() {
        let mut m = build();
        assert_eq!(m.free_param_count(), 7);
        m.freeze(0, "peak").unwrap();
        m.freeze(0, "peak").unwrap();
        m.thaw(0, "peak").unwrap();
        assert!(m.is_frozen(0, "peak").unwrap());
        assert_eq!(m.free_param_count(), 4);
        m.thaw(0, "peak").unwrap();
        assert_eq!(m.free_param_count(), 7);
        m.param_mut(&id("bkg", "slope")).unwrap().fixed = true;
        assert_eq!(m.free_param_count(), 6);
    }
}
