//! `compfit` library crate.
//!
//! A composable model-evaluation and fitting engine. Models are assembled
//! from named components and reducers inside one or more prediction units;
//! patch functions couple parameters across them; the fit driver hands the
//! flattened free parameters to a minimizer backend.
//!
//! The binary (`compfit`) is a thin wrapper around this library so the core
//! logic is testable without spawning processes.

pub mod app;
pub mod cli;
pub mod components;
pub mod data;
pub mod domain;
pub mod error;
pub mod eval;
pub mod fit;
pub mod math;
pub mod params;
pub mod report;
