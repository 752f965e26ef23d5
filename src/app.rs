//! Top-level application orchestration.
//!
//! `src/main.rs` only maps the result of [`run`] onto an exit code; this
//! module parses arguments, installs logging and dispatches commands.

use clap::Parser;

use crate::cli::{Cli, Command, DemoArgs};
use crate::data::{PeakTruth, SampleConfig};
use crate::error::Result;
use crate::fit::MinimizerConfig;

pub mod pipeline;

pub use pipeline::DemoConfig;

/// Entry point for the `compfit` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Demo(args) => handle_demo(&args),
        Command::Describe(args) => handle_describe(&args),
    }
}

fn handle_demo(args: &DemoArgs) -> Result<()> {
    let config = demo_config_from_args(args);
    let run = pipeline::run_demo(&config)?;

    println!("{}", crate::report::format_model(&run.model));
    println!("{}", crate::report::format_fit_summary(&run.result));
    for (u, pulls) in run.pulls.iter().enumerate() {
        println!("Unit [{u}] largest pulls");
        println!("{}", crate::report::format_pulls(pulls));
    }
    Ok(())
}

fn handle_describe(args: &DemoArgs) -> Result<()> {
    let config = demo_config_from_args(args);
    let samples = pipeline::generate_samples(&config)?;
    let mut model = pipeline::build_model(&config, &samples)?;
    model.evaluate()?;
    println!("{}", crate::report::format_model(&model));
    Ok(())
}

pub fn demo_config_from_args(args: &DemoArgs) -> DemoConfig {
    DemoConfig {
        sample: SampleConfig {
            points: args.points,
            noise: args.noise,
            seed: args.seed,
            ..SampleConfig::default()
        },
        truth: PeakTruth::default(),
        units: usize::from(args.units),
        freeze_background: args.freeze_background,
        backend: args.minimizer,
        minimizer: MinimizerConfig {
            max_iter: args.max_iter,
            ..MinimizerConfig::default()
        },
        top_n: args.top,
    }
}
