//! Synthetic datasets for the demo command.

pub mod sample;

pub use sample::*;
