//! Command-line parsing for the `compfit` binary.
//!
//! Argument parsing and command dispatch stay separate from the evaluation
//! and fitting code.

use clap::{Parser, Subcommand};

use crate::fit::MinimizerKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "compfit", version, about = "Composable model evaluation and fitting")]
pub struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a peak-on-background model to seeded synthetic data and print the result.
    Demo(DemoArgs),
    /// Build the demo model and print its structure without fitting.
    Describe(DemoArgs),
}

/// Options for the demo pipeline.
#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Number of points per dataset.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub points: usize,

    /// Random seed for the synthetic data.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of the additive noise.
    #[arg(long, default_value_t = 0.2)]
    pub noise: f64,

    /// Number of prediction units (2 ties the peak centres with a patch).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub units: u8,

    /// Hold the linear background at its initial estimate.
    #[arg(long)]
    pub freeze_background: bool,

    /// Minimizer backend.
    #[arg(short = 'm', long, value_enum, default_value_t = MinimizerKind::Lbfgs)]
    pub minimizer: MinimizerKind,

    /// Maximum minimizer iterations.
    #[arg(long, default_value_t = 1000)]
    pub max_iter: u64,

    /// Show the N largest pulls on each side.
    #[arg(long, default_value_t = 5)]
    pub top: usize,
}
