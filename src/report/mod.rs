//! Reporting utilities: per-point residuals, largest pulls, and formatted
//! terminal output.

use std::cmp::Ordering;

use crate::domain::Measures;
use crate::error::{FitError, Result};
use crate::eval::Model;

pub mod format;

pub use format::*;

/// One observation compared with the model prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResidual {
    pub index: usize,
    pub observed: f64,
    pub predicted: f64,
    /// `(predicted - observed) / uncertainty`
    pub pull: f64,
}

/// Largest deviations on each side (top-N each).
#[derive(Debug, Clone)]
pub struct Pulls {
    pub above: Vec<PointResidual>,
    pub below: Vec<PointResidual>,
}

/// Compare the current output of `unit` with `data`, point by point.
pub fn compute_residuals(model: &Model, unit: usize, data: &Measures) -> Result<Vec<PointResidual>> {
    let prediction = model.output(unit)?;
    if prediction.len() != data.len() {
        return Err(FitError::config(format!(
            "Dataset has {} points but unit {unit} predicts {}.",
            data.len(),
            prediction.len()
        )));
    }
    Ok(prediction
        .iter()
        .zip(data.values().iter().zip(data.uncertainties()))
        .enumerate()
        .map(|(index, (&predicted, (&observed, &sigma)))| PointResidual {
            index,
            observed,
            predicted,
            pull: (predicted - observed) / sigma,
        })
        .collect())
}

/// Points where the model sits furthest above / below the data.
pub fn largest_pulls(residuals: &[PointResidual], top_n: usize) -> Pulls {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.pull.partial_cmp(&a.pull).unwrap_or(Ordering::Equal));
    let above = sorted.iter().take(top_n).cloned().collect();
    let below = sorted.iter().rev().take(top_n).cloned().collect();
    Pulls { above, below }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;

    #[test]
    fn residuals_and_pulls() {
        let mut model = Model::new(Domain::linspace(0.0, 2.0, 3).unwrap());
        model.add("c", 1.0).unwrap();
        model.evaluate().unwrap();
        let data = Measures::new(vec![1.0, 3.0, 0.0], vec![1.0, 0.5, 2.0]).unwrap();

        let residuals = compute_residuals(&model, 0, &data).unwrap();
        let pulls: Vec<f64> = residuals.iter().map(|r| r.pull).collect();
        assert_eq!(pulls, vec![0.0, -4.0, 0.5]);

        let ranked = largest_pulls(&residuals, 1);
        assert_eq!(ranked.above[0].index, 2);
        assert_eq!(ranked.below[0].index, 1);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut model = Model::new(Domain::linspace(0.0, 2.0, 3).unwrap());
        model.add("c", 1.0).unwrap();
        model.evaluate().unwrap();
        let data = Measures::with_constant_uncertainty(vec![1.0], 1.0).unwrap();
        assert!(compute_residuals(&model, 0, &data).is_err());
    }
}
