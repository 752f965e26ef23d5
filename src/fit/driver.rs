//! Fit driver: bounds gate, free-parameter selection, residual function,
//! write-back and result assembly.
//!
//! Stages: `Idle → Evaluating → Minimizing → Reassembling → Done`, or
//! `Failed` when any step returns an error.

use std::time::Instant;

use indexmap::IndexMap;

use crate::domain::Measures;
use crate::error::{FitError, Result};
use crate::eval::Model;
use crate::fit::minimizer::{Minimizer, MinimizerOutcome, Residuals};
use crate::fit::result::{BestFitParam, BestFitResult, CompFit, log_probability};

/// Where a [`Fitter`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    Idle,
    Evaluating,
    Minimizing,
    Reassembling,
    Done,
    Failed,
}

/// Normalised residuals `(prediction - observed) / uncertainty` over the
/// targeted units, in unit order.
struct ResidualProblem<'a> {
    model: &'a mut Model,
    targets: &'a [(usize, &'a Measures)],
    free: &'a [usize],
    observations: usize,
}

impl Residuals for ResidualProblem<'_> {
    fn residual_count(&self) -> usize {
        self.observations
    }

    fn eval(&mut self, params: &[f64], out: &mut [f64]) -> Result<()> {
        self.model.set_flat(self.free, params)?;
        self.model.quick_evaluate()?;
        write_residuals(self.model, self.targets, out)
    }
}

fn write_residuals(model: &Model, targets: &[(usize, &Measures)], out: &mut [f64]) -> Result<()> {
    let mut k = 0;
    for &(unit, data) in targets {
        let prediction = model.output(unit)?;
        for ((p, y), s) in prediction
            .iter()
            .zip(data.values())
            .zip(data.uncertainties())
        {
            out[k] = (p - y) / s;
            k += 1;
        }
    }
    Ok(())
}

/// Runs fits with one minimizer backend.
pub struct Fitter<'m> {
    minimizer: &'m dyn Minimizer,
    stage: FitStage,
}

impl<'m> Fitter<'m> {
    pub fn new(minimizer: &'m dyn Minimizer) -> Self {
        Self {
            minimizer,
            stage: FitStage::Idle,
        }
    }

    pub fn stage(&self) -> FitStage {
        self.stage
    }

    fn enter(&mut self, stage: FitStage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "fit stage");
        self.stage = stage;
    }

    /// Fit every unit against its dataset (`data[i]` belongs to unit `i`).
    pub fn fit(&mut self, model: &mut Model, data: &[Measures]) -> Result<BestFitResult> {
        self.stage = FitStage::Idle;
        if data.len() != model.unit_count() {
            self.enter(FitStage::Failed);
            return Err(FitError::config(format!(
                "Model has {} prediction units but {} datasets were given.",
                model.unit_count(),
                data.len()
            )));
        }
        let targets: Vec<(usize, &Measures)> = data.iter().enumerate().collect();
        let result = self.run(model, &targets);
        if result.is_err() {
            self.enter(FitStage::Failed);
        }
        result
    }

    /// Fit only `unit` against `data`; every other unit is held frozen for
    /// the duration and restored afterwards.
    pub fn fit_unit(&mut self, model: &mut Model, unit: usize, data: &Measures) -> Result<BestFitResult> {
        self.stage = FitStage::Idle;
        if let Err(err) = model.unit(unit) {
            self.enter(FitStage::Failed);
            return Err(err);
        }
        let frozen = model.freeze_all_except(unit);
        let result = self.run(model, &[(unit, data)]);
        model.thaw_all(&frozen);
        if result.is_err() {
            self.enter(FitStage::Failed);
        }
        result
    }

    fn run(&mut self, model: &mut Model, targets: &[(usize, &Measures)]) -> Result<BestFitResult> {
        let started = Instant::now();
        self.enter(FitStage::Evaluating);

        model.check_bounds()?;
        model.evaluate()?;

        let params = model.flat_params();
        let free: Vec<usize> = params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.param.fixed && !p.frozen)
            .filter(|(_, p)| targets.iter().any(|&(u, _)| u == p.unit))
            .map(|(i, _)| i)
            .collect();
        if free.is_empty() {
            return Err(FitError::config("No free parameter in the model."));
        }

        let mut observations = 0;
        for &(unit, data) in targets {
            let len = model.output(unit)?.len();
            if len != data.len() {
                return Err(FitError::config(format!(
                    "Dataset for unit {unit} has {} points but the unit predicts {len}.",
                    data.len()
                )));
            }
            observations += len;
        }

        let start: Vec<f64> = free.iter().map(|&i| params[i].param.value).collect();
        let lower: Vec<f64> = free.iter().map(|&i| params[i].param.low).collect();
        let upper: Vec<f64> = free.iter().map(|&i| params[i].param.high).collect();

        self.enter(FitStage::Minimizing);
        let outcome = {
            let mut problem = ResidualProblem {
                model: &mut *model,
                targets,
                free: &free,
                observations,
            };
            self.minimizer.minimize(&mut problem, &start, &lower, &upper)
        };
        let outcome = match outcome.and_then(|o| self.check_outcome(o, free.len())) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Candidates only ever reach the flat vector; the stored
                // parameters still hold the pre-fit values.
                if let Err(resync) = model.evaluate() {
                    tracing::warn!(error = %resync, "could not restore the model after a failed fit");
                }
                return Err(err);
            }
        };

        self.enter(FitStage::Reassembling);
        model.set_flat(&free, &outcome.best)?;
        model.store_flat();
        model.quick_evaluate()?;

        let mut residuals = vec![0.0; observations];
        write_residuals(model, targets, &mut residuals)?;
        let cost: f64 = residuals.iter().map(|r| r * r).sum();
        let dof = observations as i64 - free.len() as i64;

        let result = BestFitResult {
            units: assemble(model, &free, &outcome),
            observations,
            free_params: free.len(),
            dof,
            cost,
            status: outcome.status,
            log_probability: log_probability(cost, dof),
            elapsed: started.elapsed(),
            minimizer: self.minimizer.name().to_string(),
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
            message: outcome.message,
        };
        self.enter(FitStage::Done);
        tracing::info!(
            minimizer = %result.minimizer,
            status = %result.status,
            cost = result.cost,
            dof = result.dof,
            evaluations = result.evaluations,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "fit finished"
        );
        Ok(result)
    }
}

impl Fitter<'_> {
    fn check_outcome(&self, outcome: MinimizerOutcome, free: usize) -> Result<MinimizerOutcome> {
        if outcome.best.len() != free || outcome.uncertainties.len() != free {
            return Err(FitError::minimizer(format!(
                "{} returned {} values and {} uncertainties for {free} free parameters.",
                self.minimizer.name(),
                outcome.best.len(),
                outcome.uncertainties.len(),
            )));
        }
        Ok(outcome)
    }
}

/// Group the flat vectors back into per-unit, per-component snapshots.
fn assemble(model: &Model, free: &[usize], outcome: &MinimizerOutcome) -> Vec<IndexMap<String, CompFit>> {
    let mut position = vec![None; model.flat_ids().len()];
    for (pos, &i) in free.iter().enumerate() {
        position[i] = Some(pos);
    }

    let mut units: Vec<IndexMap<String, CompFit>> = (0..model.unit_count())
        .map(|u| {
            model
                .unit(u)
                .map(|unit| unit.comps().keys().map(|n| (n.clone(), CompFit::new())).collect())
                .unwrap_or_default()
        })
        .collect();

    let values = model.flat_values();
    let patched = model.patched_values();
    for (k, id) in model.flat_ids().iter().enumerate() {
        let snapshot = BestFitParam {
            value: values[k],
            uncertainty: position[k].map_or(f64::NAN, |pos| outcome.uncertainties[pos]),
            fixed: position[k].is_none(),
            patched: patched[k],
        };
        units[id.comp.unit]
            .entry(id.comp.name.clone())
            .or_default()
            .insert(id.param.clone(), snapshot);
    }
    units
}

/// Fit all units of `model`; see [`Fitter::fit`].
pub fn fit(model: &mut Model, data: &[Measures], minimizer: &dyn Minimizer) -> Result<BestFitResult> {
    Fitter::new(minimizer).fit(model, data)
}

/// Restricted fit of a single unit; see [`Fitter::fit_unit`].
pub fn fit_unit(
    model: &mut Model,
    unit: usize,
    data: &Measures,
    minimizer: &dyn Minimizer,
) -> Result<BestFitResult> {
    Fitter::new(minimizer).fit_unit(model, unit, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Constant, Linear};
    use crate::domain::Domain;
    use crate::fit::minimizer::LbfgsMinimizer;
    use crate::fit::result::FitStatus;
    use crate::params::CompParamId;

    /// Returns the start point unchanged and never converges.
    struct Stubborn;

    impl Minimizer for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn minimize(
            &self,
            problem: &mut dyn Residuals,
            start: &[f64],
            _lower: &[f64],
            _upper: &[f64],
        ) -> Result<MinimizerOutcome> {
            let mut out = vec![0.0; problem.residual_count()];
            problem.eval(start, &mut out)?;
            Ok(MinimizerOutcome {
                status: FitStatus::Error,
                best: start.to_vec(),
                uncertainties: vec![f64::NAN; start.len()],
                iterations: 0,
                evaluations: 1,
                message: "gave up".to_string(),
            })
        }
    }

    /// Evaluates one far-off candidate, then gives up with an error.
    struct Aborting;

    impl Minimizer for Aborting {
        fn name(&self) -> &str {
            "aborting"
        }

        fn minimize(
            &self,
            problem: &mut dyn Residuals,
            start: &[f64],
            _lower: &[f64],
            _upper: &[f64],
        ) -> Result<MinimizerOutcome> {
            let mut out = vec![0.0; problem.residual_count()];
            problem.eval(&vec![9.0; start.len()], &mut out)?;
            Err(FitError::minimizer("backend crashed"))
        }
    }

    fn constant_model(value: f64) -> Model {
        let mut m = Model::new(Domain::linspace(0.0, 9.0, 10).unwrap());
        m.add("c", value).unwrap();
        m
    }

    #[test]
    fn non_convergence_still_yields_a_full_result() {
        let mut m = constant_model(4.0);
        let data = Measures::with_constant_uncertainty(vec![5.0; 10], 1.0).unwrap();
        let mut fitter = Fitter::new(&Stubborn);
        let result = fitter.fit(&mut m, &[data]).unwrap();
        assert_eq!(fitter.stage(), FitStage::Done);
        assert_eq!(result.status, FitStatus::Error);
        assert!((result.cost - 10.0).abs() < 1e-12);
        assert_eq!(result.param(0, "c", "value").unwrap().value, 4.0);
        assert_eq!(result.message, "gave up");
    }

    #[test]
    fn failed_fit_leaves_the_model_at_its_stored_values() {
        let mut m = constant_model(1.0);
        let data = Measures::with_constant_uncertainty(vec![5.0; 10], 1.0).unwrap();
        let mut fitter = Fitter::new(&Aborting);
        let err = fitter.fit(&mut m, &[data]).unwrap_err();
        assert_eq!(err, FitError::minimizer("backend crashed"));
        assert_eq!(fitter.stage(), FitStage::Failed);

        let id = CompParamId::parse(0, "c", "value").unwrap();
        assert_eq!(m.param(&id).unwrap().value, 1.0);
        assert_eq!(m.flat_values(), &[1.0]);
        assert_eq!(m.output(0).unwrap(), &[1.0; 10]);
        m.quick_evaluate().unwrap();
        assert_eq!(m.output(0).unwrap(), &[1.0; 10]);
    }

    #[test]
    fn dataset_length_mismatch_fails() {
        let mut m = constant_model(4.0);
        let data = Measures::with_constant_uncertainty(vec![5.0; 3], 1.0).unwrap();
        let mut fitter = Fitter::new(&Stubborn);
        let err = fitter.fit(&mut m, &[data]).unwrap_err();
        assert!(matches!(err, FitError::Configuration(_)));
        assert_eq!(fitter.stage(), FitStage::Failed);
    }

    #[test]
    fn dataset_count_must_match_units() {
        let mut m = constant_model(4.0);
        let err = fit(&mut m, &[], &Stubborn).unwrap_err();
        assert!(matches!(err, FitError::Configuration(_)));
    }

    #[test]
    fn fixed_parameters_keep_their_value_and_get_nan_uncertainty() {
        let mut m = Model::new(Domain::linspace(0.0, 4.0, 5).unwrap());
        m.add_component("line", Linear::new(0.0, 2.0)).unwrap();
        m.param_mut(&CompParamId::parse(0, "line", "slope").unwrap())
            .unwrap()
            .fixed = true;
        let y: Vec<f64> = (0..5).map(|x| 1.0 + 2.0 * f64::from(x)).collect();
        let data = Measures::with_constant_uncertainty(y, 0.5).unwrap();

        let result = fit(&mut m, &[data], &LbfgsMinimizer::default()).unwrap();
        assert_eq!(result.free_params, 1);
        assert_eq!(result.dof, 4);
        let slope = result.param(0, "line", "slope").unwrap();
        assert!(slope.fixed);
        assert!(slope.uncertainty.is_nan());
        assert_eq!(slope.value, 2.0);
        let offset = result.param(0, "line", "offset").unwrap();
        assert!((offset.value - 1.0).abs() < 1e-4);
        assert!(!offset.fixed);
    }

    #[test]
    fn restricted_fit_restores_freeze_counts() {
        let d = Domain::linspace(0.0, 1.0, 4).unwrap();
        let mut m = Model::with_units([d.clone(), d]);
        m.add_component_to(0, "a", Constant::new(1.0)).unwrap();
        m.add_component_to(1, "b", Constant::new(1.0)).unwrap();
        m.freeze(1, "b").unwrap();

        let data = Measures::with_constant_uncertainty(vec![3.0; 4], 1.0).unwrap();
        let result = fit_unit(&mut m, 0, &data, &LbfgsMinimizer::default()).unwrap();
        assert_eq!(result.observations, 4);
        assert!(result.param(1, "b", "value").unwrap().fixed);
        assert!((result.param(0, "a", "value").unwrap().value - 3.0).abs() < 1e-5);
        assert_eq!(m.freeze_count(1, "b").unwrap(), 1);
        assert_eq!(m.freeze_count(0, "a").unwrap(), 0);

        // Restored even when the fit fails.
        let bad = Measures::with_constant_uncertainty(vec![3.0; 2], 1.0).unwrap();
        assert!(fit_unit(&mut m, 0, &bad, &LbfgsMinimizer::default()).is_err());
        assert_eq!(m.freeze_count(1, "b").unwrap(), 1);
    }
}
