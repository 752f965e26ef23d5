//! Minimizer capability and the L-BFGS backend.
//!
//! The fit driver only sees the [`Minimizer`] trait: given a residual function
//! over bounded free parameters, return best-fit values, standard errors and a
//! convergence status. [`LbfgsMinimizer`] implements it on top of `argmin`;
//! the Levenberg-Marquardt backend lives in [`crate::fit::levmar`] and shares
//! the bounded `Objective` defined here.

use std::cell::{Cell, RefCell};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use clap::ValueEnum;

use crate::error::{FitError, Result};
use crate::fit::result::FitStatus;

/// Vector-valued objective: normalised residuals for a candidate parameter vector.
pub trait Residuals {
    /// Number of residuals written by [`Residuals::eval`].
    fn residual_count(&self) -> usize;

    /// Fill `out` (length `residual_count()`) with the residuals at `params`.
    fn eval(&mut self, params: &[f64], out: &mut [f64]) -> Result<()>;
}

/// What a minimizer hands back to the fit driver.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerOutcome {
    pub status: FitStatus,
    pub best: Vec<f64>,
    pub uncertainties: Vec<f64>,
    pub iterations: u64,
    pub evaluations: usize,
    pub message: String,
}

/// Black-box bounded least-squares minimizer.
pub trait Minimizer {
    fn name(&self) -> &str;

    /// Minimize `Σ r²` over `start`, keeping every value within `[lower, upper]`.
    ///
    /// Errors are reserved for setup problems and objective failures.
    /// Non-convergence is reported through [`MinimizerOutcome::status`].
    fn minimize(
        &self,
        problem: &mut dyn Residuals,
        start: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<MinimizerOutcome>;
}

/// Available minimizer backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MinimizerKind {
    /// Bounded L-BFGS (argmin).
    #[default]
    Lbfgs,
    /// Bounded Levenberg-Marquardt.
    Levmar,
}

impl MinimizerKind {
    pub fn build(self, config: MinimizerConfig) -> Box<dyn Minimizer> {
        match self {
            MinimizerKind::Lbfgs => Box::new(LbfgsMinimizer::new(config)),
            MinimizerKind::Levmar => Box::new(crate::fit::levmar::LmMinimizer::new(config)),
        }
    }
}

/// Configuration shared by both backends.
///
/// Levenberg-Marquardt maps `tol_cost` to its `ftol`, `tol_grad` to its
/// `gtol` and ignores `memory`.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm
    pub tol_grad: f64,
    /// Convergence tolerance for the change in cost
    pub tol_cost: f64,
    /// Number of corrections kept for the inverse Hessian estimate
    pub memory: usize,
    /// Relative finite-difference step
    pub fd_step: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol_grad: 1e-8,
            tol_cost: 1e-12,
            memory: 10,
            fd_step: 1e-7,
        }
    }
}

/// Bounded evaluation state shared by the backends.
pub(crate) struct Objective<'r> {
    residuals: RefCell<&'r mut dyn Residuals>,
    scratch: RefCell<Vec<f64>>,
    shifted: RefCell<Vec<f64>>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    fd_step: f64,
    evaluations: Cell<usize>,
    failure: RefCell<Option<FitError>>,
    /// Lowest finite cost seen so far and where it was evaluated.
    best: RefCell<Option<(f64, Vec<f64>)>>,
}

impl<'r> Objective<'r> {
    pub(crate) fn new(residuals: &'r mut dyn Residuals, lower: &[f64], upper: &[f64], fd_step: f64) -> Self {
        let n = residuals.residual_count();
        Self {
            residuals: RefCell::new(residuals),
            scratch: RefCell::new(vec![0.0; n]),
            shifted: RefCell::new(vec![0.0; n]),
            lower: lower.to_vec(),
            upper: upper.to_vec(),
            fd_step,
            evaluations: Cell::new(0),
            failure: RefCell::new(None),
            best: RefCell::new(None),
        }
    }

    pub(crate) fn clamp(&self, params: &[f64]) -> Vec<f64> {
        clamp_params(params, &self.lower, &self.upper)
    }

    fn step(&self, x: f64) -> f64 {
        self.fd_step * x.abs().max(1.0)
    }

    pub(crate) fn residual_count(&self) -> usize {
        self.scratch.borrow().len()
    }

    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations.get()
    }

    /// Residuals at `params` (already inside the bounds) into `out`.
    ///
    /// A NaN candidate never reaches the residual function.
    pub(crate) fn residuals_into(&self, params: &[f64], out: &mut [f64]) -> Result<()> {
        if let Some(i) = params.iter().position(|v| v.is_nan()) {
            return Err(FitError::numeric(format!(
                "Minimizer proposed NaN for free parameter {i}."
            )));
        }
        self.evaluations.set(self.evaluations.get() + 1);
        self.residuals.borrow_mut().eval(params, out)
    }

    /// Remember `params` if `cost` is the lowest finite cost seen so far.
    pub(crate) fn track(&self, cost: f64, params: &[f64]) {
        let mut best = self.best.borrow_mut();
        let improved = best.as_ref().is_none_or(|(c, _)| cost < *c);
        if cost.is_finite() && improved {
            *best = Some((cost, params.to_vec()));
        }
    }

    pub(crate) fn take_best(&self) -> Option<Vec<f64>> {
        self.best.borrow_mut().take().map(|(_, p)| p)
    }

    pub(crate) fn chi2(&self, params: &[f64]) -> Result<f64> {
        let clamped = self.clamp(params);
        let mut buf = self.scratch.borrow_mut();
        self.residuals_into(&clamped, &mut buf)?;
        let cost: f64 = buf.iter().map(|r| r * r).sum();
        self.track(cost, &clamped);
        Ok(cost)
    }

    /// Finite-difference gradient of `Σ r²` with the projected-gradient
    /// correction at active bounds. Central in the interior, one-sided away
    /// from a bound the parameter sits on.
    pub(crate) fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let x = self.clamp(params);
        let mut grad = vec![0.0; x.len()];
        let mut point = x.clone();
        for i in 0..x.len() {
            let h = self.step(x[i]);
            let up = (x[i] + h).min(self.upper[i]);
            let down = (x[i] - h).max(self.lower[i]);
            if up <= down {
                continue;
            }
            point[i] = up;
            let plus = self.chi2(&point)?;
            point[i] = down;
            let minus = self.chi2(&point)?;
            point[i] = x[i];
            grad[i] = (plus - minus) / (up - down);
        }

        const EPS: f64 = 1e-12;
        for (i, g) in grad.iter_mut().enumerate() {
            if x[i] <= self.lower[i] + EPS && *g > 0.0 {
                *g = 0.0;
            }
            if x[i] >= self.upper[i] - EPS && *g < 0.0 {
                *g = 0.0;
            }
        }
        Ok(grad)
    }

    /// Row-major Jacobian of the residuals (one-sided differences, stepping
    /// away from an upper bound).
    pub(crate) fn jacobian(&self, params: &[f64]) -> Result<Vec<f64>> {
        let x = self.clamp(params);
        let cols = x.len();
        let mut base = self.scratch.borrow_mut();
        self.residuals_into(&x, &mut base)?;
        let rows = base.len();

        let mut jac = vec![0.0; rows * cols];
        let mut shifted = self.shifted.borrow_mut();
        let mut point = x.clone();
        for j in 0..cols {
            let mut h = self.step(x[j]);
            if x[j] + h > self.upper[j] {
                h = -h;
            }
            point[j] = x[j] + h;
            self.residuals_into(&point, &mut shifted)?;
            point[j] = x[j];
            for i in 0..rows {
                jac[i * cols + j] = (shifted[i] - base[i]) / h;
            }
        }
        Ok(jac)
    }

    /// Keep the first objective failure.
    pub(crate) fn record(&self, err: FitError) {
        self.failure.borrow_mut().get_or_insert(err);
    }

    pub(crate) fn take_failure(&self) -> Option<FitError> {
        self.failure.borrow_mut().take()
    }

    /// Keep the first objective failure and hand argmin an opaque error.
    fn fail(&self, err: FitError) -> argmin::core::Error {
        let message = err.to_string();
        self.record(err);
        argmin::core::Error::msg(message)
    }

    /// Standard errors at `best`, NaN when the covariance is unavailable.
    pub(crate) fn uncertainties(&self, best: &[f64]) -> Result<Vec<f64>> {
        let jac = self.jacobian(best)?;
        match crate::math::standard_errors(&jac, self.residual_count(), best.len()) {
            Some(errors) => {
                if errors.iter().any(|e| !e.is_finite()) {
                    tracing::warn!("covariance has non-finite diagonal entries; reporting NaN");
                }
                Ok(errors)
            }
            None => {
                tracing::warn!("covariance matrix could not be computed; reporting NaN");
                Ok(vec![f64::NAN; best.len()])
            }
        }
    }
}

/// Project onto the box; NaN stays NaN so the objective can reject it.
pub(crate) fn clamp_params(params: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    params
        .iter()
        .zip(lower.iter().zip(upper))
        .map(|(&v, (&lo, &hi))| if v.is_nan() { v } else { v.max(lo).min(hi) })
        .collect()
}

/// Lengths agree and every `lower <= upper`.
pub(crate) fn check_bounds(start: &[f64], lower: &[f64], upper: &[f64]) -> Result<()> {
    let n = start.len();
    if lower.len() != n || upper.len() != n {
        return Err(FitError::minimizer(format!(
            "Parameter and bounds length mismatch: {n} values, {} lower, {} upper.",
            lower.len(),
            upper.len()
        )));
    }
    if let Some(i) = (0..n).find(|&i| lower[i].is_nan() || upper[i].is_nan() || lower[i] > upper[i]) {
        return Err(FitError::minimizer(format!(
            "Invalid bounds for parameter {i}: [{}, {}].",
            lower[i], upper[i]
        )));
    }
    Ok(())
}

/// Wrapper to make [`Objective`] compatible with argmin.
struct ArgminProblem<'o, 'r> {
    objective: &'o Objective<'r>,
}

impl CostFunction for ArgminProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.objective
            .chi2(params)
            .map_err(|e| self.objective.fail(e))
    }
}

impl Gradient for ArgminProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.objective
            .gradient(params)
            .map_err(|e| self.objective.fail(e))
    }
}

/// Bounded L-BFGS with More-Thuente line search.
#[derive(Debug, Clone, Default)]
pub struct LbfgsMinimizer {
    config: MinimizerConfig,
}

impl LbfgsMinimizer {
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }
}

impl Minimizer for LbfgsMinimizer {
    fn name(&self) -> &str {
        "lbfgs"
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
        let init = objective.clamp(start);

        let g0 = objective.gradient(&init)?;
        if g0.iter().map(|g| g * g).sum::<f64>().sqrt() <= self.config.tol_grad {
            let uncertainties = objective.uncertainties(&init)?;
            return Ok(MinimizerOutcome {
                status: FitStatus::Ok,
                best: init,
                uncertainties,
                iterations: 0,
                evaluations: objective.evaluations.get(),
                message: "Start point is already stationary".to_string(),
            });
        }

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.config.memory)
            .with_tolerance_grad(self.config.tol_grad)
            .map_err(|e| FitError::minimizer(format!("Invalid configuration (tol_grad): {e}")))?
            .with_tolerance_cost(self.config.tol_cost)
            .map_err(|e| FitError::minimizer(format!("Invalid configuration (tol_cost): {e}")))?;

        let max_iter = self.config.max_iter;
        let run = Executor::new(ArgminProblem { objective: &objective }, solver)
            .configure(|state| state.param(init.clone()).max_iters(max_iter))
            .run();

        if let Some(err) = objective.take_failure() {
            return Err(err);
        }

        let (status, best, iterations, message) = match run {
            Ok(res) => {
                let state = res.state();
                let best = state
                    .get_best_param()
                    .map(|p| clamp_params(p, lower, upper))
                    .unwrap_or_else(|| init.clone());
                let termination = state.get_termination_status();
                let converged = matches!(
                    termination,
                    TerminationStatus::Terminated(TerminationReason::SolverConverged)
                        | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
                );
                let status = if converged { FitStatus::Ok } else { FitStatus::Error };
                (status, best, state.get_iter(), termination.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "L-BFGS run failed; keeping the best point evaluated");
                let best = objective.take_best().unwrap_or_else(|| init.clone());
                (FitStatus::Error, best, 0, e.to_string())
            }
        };

        let uncertainties = objective.uncertainties(&best)?;
        Ok(MinimizerOutcome {
            status,
            best,
            uncertainties,
            iterations,
            evaluations: objective.evaluations.get(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// r = (x - 2, y - 3) / σ
    struct Shifted {
        sigma: f64,
        calls: usize,
    }

    impl Residuals for Shifted {
        fn residual_count(&self) -> usize {
            2
        }

        fn eval(&mut self, params: &[f64], out: &mut [f64]) -> Result<()> {
            self.calls += 1;
            out[0] = (params[0] - 2.0) / self.sigma;
            out[1] = (params[1] - 3.0) / self.sigma;
            Ok(())
        }
    }

    /// Straight line y = a + b x through noisy-free points.
    struct Line {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl Residuals for Line {
        fn residual_count(&self) -> usize {
            self.x.len()
        }

        fn eval(&mut self, params: &[f64], out: &mut [f64]) -> Result<()> {
            for i in 0..self.x.len() {
                out[i] = params[0] + params[1] * self.x[i] - self.y[i];
            }
            Ok(())
        }
    }

    struct Failing;

    impl Residuals for Failing {
        fn residual_count(&self) -> usize {
            1
        }

        fn eval(&mut self, _params: &[f64], _out: &mut [f64]) -> Result<()> {
            Err(FitError::numeric("bad candidate"))
        }
    }

    const UNBOUNDED: f64 = f64::INFINITY;

    #[test]
    fn converges_on_quadratic() {
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        let out = LbfgsMinimizer::default()
            .minimize(&mut problem, &[0.0, 0.0], &[-UNBOUNDED; 2], &[UNBOUNDED; 2])
            .unwrap();
        assert_eq!(out.status, FitStatus::Ok, "{}", out.message);
        assert_relative_eq!(out.best[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(out.best[1], 3.0, epsilon = 1e-5);
        assert!(problem.calls > 0);
        assert!(out.evaluations > 0);
    }

    #[test]
    fn respects_bounds() {
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        let out = LbfgsMinimizer::default()
            .minimize(&mut problem, &[4.0, 1.5], &[3.0, 1.0], &[5.0, 2.0])
            .unwrap();
        assert_relative_eq!(out.best[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(out.best[1], 2.0, epsilon = 1e-4);
        assert!(out.best[0] >= 3.0 && out.best[1] <= 2.0);
    }

    #[test]
    fn stationary_start_returns_immediately() {
        let mut problem = Shifted { sigma: 0.5, calls: 0 };
        let out = LbfgsMinimizer::default()
            .minimize(&mut problem, &[2.0, 3.0], &[-UNBOUNDED; 2], &[UNBOUNDED; 2])
            .unwrap();
        assert_eq!(out.status, FitStatus::Ok);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.best, vec![2.0, 3.0]);
        // dr/dx = 1/σ = 2 → σ_x = 0.5
        assert_relative_eq!(out.uncertainties[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out.uncertainties[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn fits_a_line_with_standard_errors() {
        let x: Vec<f64> = (0..5).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|x| 1.0 + 2.0 * x).collect();
        let mut problem = Line { x, y };
        let out = LbfgsMinimizer::default()
            .minimize(&mut problem, &[0.0, 0.0], &[-UNBOUNDED; 2], &[UNBOUNDED; 2])
            .unwrap();
        assert_relative_eq!(out.best[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(out.best[1], 2.0, epsilon = 1e-4);
        assert!(out.uncertainties.iter().all(|e| e.is_finite() && *e > 0.0));
    }

    #[test]
    fn objective_failure_is_propagated() {
        let err = LbfgsMinimizer::default()
            .minimize(&mut Failing, &[1.0], &[-UNBOUNDED], &[UNBOUNDED])
            .unwrap_err();
        assert_eq!(err, FitError::numeric("bad candidate"));
    }

    #[test]
    fn mismatched_bounds_are_rejected() {
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        let err = LbfgsMinimizer::default()
            .minimize(&mut problem, &[0.0, 0.0], &[0.0], &[1.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, FitError::Minimizer(_)));
        assert_eq!(problem.calls, 0);
    }

    #[test]
    fn nan_candidate_is_a_numeric_error() {
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        {
            let objective = Objective::new(&mut problem, &[-UNBOUNDED; 2], &[UNBOUNDED; 2], 1e-7);
            let err = objective.chi2(&[f64::NAN, 0.0]).unwrap_err();
            assert!(matches!(err, FitError::Numeric(_)));
            assert!(matches!(objective.gradient(&[0.0, f64::NAN]), Err(FitError::Numeric(_))));
            assert!(matches!(objective.jacobian(&[f64::NAN, 0.0]), Err(FitError::Numeric(_))));
            assert_eq!(objective.evaluations(), 0);
        }
        assert_eq!(problem.calls, 0);
    }

    #[test]
    fn nan_start_is_rejected() {
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        let err = LbfgsMinimizer::default()
            .minimize(&mut problem, &[f64::NAN, 0.0], &[-UNBOUNDED; 2], &[UNBOUNDED; 2])
            .unwrap_err();
        assert!(matches!(err, FitError::Numeric(_)));
        assert_eq!(problem.calls, 0);
    }

    #[test]
    fn gradient_at_a_bound_is_one_sided() {
        // cost = (x - 2)² + (y - 3)², x sits on its upper bound 3, y on its lower bound 1.
        let mut problem = Shifted { sigma: 1.0, calls: 0 };
        let objective = Objective::new(&mut problem, &[0.0, 1.0], &[3.0, 5.0], 1e-7);
        let grad = objective.gradient(&[3.0, 1.0]).unwrap();
        assert_relative_eq!(grad[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(grad[1], -4.0, epsilon = 1e-5);

        let interior = objective.gradient(&[2.5, 2.0]).unwrap();
        assert_relative_eq!(interior[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(interior[1], -2.0, epsilon = 1e-6);
    }
}
