//! Fitting: minimizer capability, driver and result snapshot.
//!
//! Responsibilities:
//!
//! - turn a model plus datasets into a bounded residual problem
//! - delegate minimization to a [`Minimizer`] backend (L-BFGS or
//!   Levenberg-Marquardt)
//! - write best-fit values back and assemble a [`BestFitResult`]

pub mod driver;
pub mod levmar;
pub mod minimizer;
pub mod result;

pub use driver::*;
pub use levmar::*;
pub use minimizer::*;
pub use result::*;
