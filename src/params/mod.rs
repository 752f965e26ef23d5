//! Fit parameters and the identifiers that address them.
//!
//! - `Parameter`: one scalar fit variable with bounds and a fixed flag
//! - `ParamId` / `CompId` / `CompParamId`: keys within a component, a model, and both
//! - `ParamSlots`: the ordered parameter declaration every component provides

pub mod ids;
pub mod parameter;

pub use ids::*;
pub use parameter::*;
