//! Bounded Levenberg-Marquardt backend on the `levenberg-marquardt` crate.
//!
//! Bounds are enforced by projection: every candidate handed to
//! `set_params` is clamped onto the box before the residuals see it, the same
//! way the L-BFGS backend clamps its line-search points.

use std::cell::Cell;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::Result;
use crate::fit::minimizer::{
    Minimizer, MinimizerConfig, MinimizerOutcome, Objective, Residuals, check_bounds,
};
use crate::fit::result::FitStatus;

/// Adapter between [`Objective`] and `LeastSquaresProblem`.
struct LmProblem<'o, 'r> {
    objective: &'o Objective<'r>,
    params: Vec<f64>,
    jacobians: Cell<u64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmProblem<'_, '_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params = self.objective.clamp(x.as_slice());
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.params)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut out = vec![0.0; self.objective.residual_count()];
        match self.objective.residuals_into(&self.params, &mut out) {
            Ok(()) => {
                let cost: f64 = out.iter().map(|r| r * r).sum();
                self.objective.track(cost, &self.params);
                Some(DVector::from_vec(out))
            }
            Err(err) => {
                self.objective.record(err);
                None
            }
        }
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        self.jacobians.set(self.jacobians.get() + 1);
        match self.objective.jacobian(&self.params) {
            Ok(jac) => Some(DMatrix::from_row_slice(
                self.objective.residual_count(),
                self.params.len(),
                &jac,
            )),
            Err(err) => {
                self.objective.record(err);
                None
            }
        }
    }
}

/// Levenberg-Marquardt with box constraints by projection.
#[derive(Debug, Clone, Default)]
pub struct LmMinimizer {
    config: MinimizerConfig,
}

impl LmMinimizer {
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }
}

impl Minimizer for LmMinimizer {
    fn name(&self) -> &str {
        "levmar"
    }

    fn minimize(
        &self,
        problem: &mut dyn Residuals,
        start: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<MinimizerOutcome> {
        check_bounds(start, lower, upper)?;
        let objective = Objective::new(problem, lower, upper, self.config.fd_step);

        let solver = LevenbergMarquardt::new()
            .with_ftol(self.config.tol_cost)
            .with_gtol(self.config.tol_grad)
            .with_patience(usize::try_from(self.config.max_iter).unwrap_or(usize::MAX));
        let (solved, report) = solver.minimize(LmProblem {
            objective: &objective,
            params: objective.clamp(start),
            jacobians: Cell::new(0),
        });

        if let Some(err) = objective.take_failure() {
            return Err(err);
        }

        let converged = report.termination.was_successful();
        let iterations = solved.jacobians.get();
        let best = if converged {
            solved.params
        } else {
            tracing::warn!(
                termination = ?report.termination,
                "Levenberg-Marquardt did not converge; keeping the best point evaluated"
            );
            objective.take_best().unwrap_or(solved.params)
        };

        let uncertainties = objective.uncertainties(&best)?;
        Ok(MinimizerOutcome {
            status: if converged { FitStatus::Ok } else { FitStatus::Error },
            best,
            uncertainties,
            iterations,
            evaluations: objective.evaluations(),
            message: format!("{:?}", report.termination),
        })
    }
}
