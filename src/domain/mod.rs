//! Domain and dataset types consumed by the evaluation engine.
//!
//! This module defines:
//!
//! - the evaluation domain (`Domain`): a point count plus per-axis coordinates
//! - empirical data (`Measures`): one value and one uncertainty per domain point

pub mod types;

pub use types::*;
