//! Mathematical utilities: SVD least squares and covariance estimates.

pub mod ols;

pub use ols::*;
