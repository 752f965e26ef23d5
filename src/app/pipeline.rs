//! The demo pipeline: synthetic data → model → fit → pulls.
//!
//! Both CLI commands share this so the workflow lives in one place:
//! sample generation -> initial estimates -> model assembly -> fit -> residuals.

use nalgebra::{DMatrix, DVector};

use crate::components::{Gaussian, Linear};
use crate::data::{PeakTruth, SampleConfig, SampleData, generate_sample};
use crate::error::{FitError, Result};
use crate::eval::{Model, Reducer};
use crate::fit::{BestFitResult, MinimizerConfig, MinimizerKind, fit};
use crate::math::solve_least_squares;
use crate::params::CompParamId;
use crate::report::Pulls;

/// Everything the demo needs to know.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub sample: SampleConfig,
    pub truth: PeakTruth,
    /// 1 or 2 prediction units.
    pub units: usize,
    pub freeze_background: bool,
    pub backend: MinimizerKind,
    pub minimizer: MinimizerConfig,
    pub top_n: usize,
}

/// All computed outputs of a single demo run.
#[derive(Debug)]
pub struct DemoOutput {
    pub model: Model,
    pub samples: Vec<SampleData>,
    pub result: BestFitResult,
    pub pulls: Vec<Pulls>,
}

/// Truth of unit `u`: the second unit shares the peak centre but has its own
/// background and amplitude.
fn unit_truth(base: &PeakTruth, u: usize) -> PeakTruth {
    if u == 0 {
        *base
    } else {
        PeakTruth {
            offset: base.offset * 0.5,
            slope: -base.slope,
            norm: base.norm * 0.6,
            sigma: base.sigma * 1.5,
            ..*base
        }
    }
}

/// One seeded dataset per unit.
pub fn generate_samples(config: &DemoConfig) -> Result<Vec<SampleData>> {
    if !(1..=2).contains(&config.units) {
        return Err(FitError::config(format!(
            "The demo supports 1 or 2 units, got {}.",
            config.units
        )));
    }
    (0..config.units)
        .map(|u| {
            let sample = SampleConfig {
                seed: config.sample.seed.wrapping_add(u as u64),
                ..config.sample.clone()
            };
            generate_sample(&unit_truth(&config.truth, u), &sample)
        })
        .collect()
}

/// Assemble the model, seeding every unit from its own data.
pub fn build_model(config: &DemoConfig, samples: &[SampleData]) -> Result<Model> {
    let mut model = Model::with_units(samples.iter().map(|s| s.domain.clone()));

    for (u, sample) in samples.iter().enumerate() {
        let guess = initial_guess(sample)?;
        model.add_component_to(u, "background", Linear::new(guess.offset, guess.slope))?;

        let mut peak = Gaussian::new(guess.norm, guess.center, guess.sigma);
        peak.norm = peak.norm.with_bounds(0.0, f64::INFINITY);
        peak.center = peak.center.with_bounds(sample.stats.x_min, sample.stats.x_max);
        peak.sigma = peak.sigma.with_bounds(0.05, sample.stats.x_max - sample.stats.x_min);
        model.add_component_to(u, "peak", peak)?;
        model.add_reducer_to(u, "total", Reducer::sum_all())?;

        if config.freeze_background {
            model.freeze(u, "background")?;
        }
    }

    if samples.len() == 2 {
        // The second centre is overwritten on every evaluation, so it is not free.
        model
            .param_mut(&CompParamId::parse(1, "peak", "center")?)?
            .fixed = true;
        model.add_patch("shared peak centre", |view| {
            let center = view.get(0, "peak", "center")?;
            view.set(1, "peak", "center", center);
            Ok(())
        });
    }
    Ok(model)
}

/// Execute the full demo pipeline.
pub fn run_demo(config: &DemoConfig) -> Result<DemoOutput> {
    let samples = generate_samples(config)?;
    let mut model = build_model(config, &samples)?;

    let minimizer = config.backend.build(config.minimizer.clone());
    let data: Vec<_> = samples.iter().map(|s| s.measures.clone()).collect();
    let result = fit(&mut model, &data, minimizer.as_ref())?;

    let pulls = samples
        .iter()
        .enumerate()
        .map(|(u, s)| {
            let residuals = crate::report::compute_residuals(&model, u, &s.measures)?;
            Ok(crate::report::largest_pulls(&residuals, config.top_n))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DemoOutput {
        model,
        samples,
        result,
        pulls,
    })
}

/// Starting values: a straight line by SVD least squares, then the peak from
/// the largest excess above it.
fn initial_guess(sample: &SampleData) -> Result<PeakTruth> {
    let x = sample.domain.coords_1d()?;
    let y = sample.measures.values();
    let n = x.len();

    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
    let beta = solve_least_squares(&design, &DVector::from_column_slice(y))
        .ok_or_else(|| FitError::numeric("Could not estimate the background line."))?;
    let (offset, slope) = (beta[0], beta[1]);

    let (imax, excess) = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi - (offset + slope * xi))
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, e)| if e > best.1 { (i, e) } else { best });

    let sigma = ((sample.stats.x_max - sample.stats.x_min) / 10.0).max(0.05);
    let norm = excess.max(0.0) * (2.0 * std::f64::consts::PI).sqrt() * sigma;
    Ok(PeakTruth {
        offset,
        slope,
        norm,
        center: x[imax],
        sigma,
    })
}
