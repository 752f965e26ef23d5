//! Linear least squares and covariance helpers built on SVD.
//!
//! Two uses in this crate:
//!
//! - seeding linear parameters (e.g. a background line) before a non-linear fit
//! - turning a residual Jacobian `J` into parameter uncertainties through
//!   `cov = pinv(Jᵀ J)`
//!
//! SVD is used in both places because the systems are tall or possibly
//! rank-deficient. (Nalgebra's `QR::solve` is for square systems only.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Progressively looser tolerances for nearly collinear columns.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Moore-Penrose pseudo-inverse of the normal matrix `Jᵀ J`.
///
/// `jacobian` is row-major with `rows` residuals and `cols` parameters.
/// Returns `None` when the decomposition does not produce finite entries.
pub fn normal_pseudo_inverse(jacobian: &[f64], rows: usize, cols: usize) -> Option<DMatrix<f64>> {
    if cols == 0 || jacobian.len() != rows * cols {
        return None;
    }
    let j = DMatrix::from_row_slice(rows, cols, jacobian);
    let normal = j.transpose() * &j;
    let pinv = normal.pseudo_inverse(1e-12).ok()?;
    pinv.iter().all(|v| v.is_finite()).then_some(pinv)
}

/// Standard errors `sqrt(diag(pinv(Jᵀ J)))`.
///
/// Entries whose variance is negative or non-finite come back as NaN.
pub fn standard_errors(jacobian: &[f64], rows: usize, cols: usize) -> Option<Vec<f64>> {
    let cov = normal_pseudo_inverse(jacobian, rows, cols)?;
    Some(
        (0..cols)
            .map(|i| {
                let var = cov[(i, i)];
                if var.is_finite() && var >= 0.0 {
                    var.sqrt()
                } else {
                    f64::NAN
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn standard_error_of_a_mean() {
        // Residuals (c - y_i) / σ with σ = 2 over 4 points: dr/dc = 1/2.
        let jac = vec![0.5; 4];
        let err = standard_errors(&jac, 4, 1).unwrap();
        // sqrt(1 / (4 * 0.25)) = 1 = σ / sqrt(n)
        assert!((err[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rank_deficient_jacobian_still_yields_errors() {
        // Two identical columns: JᵀJ is singular, pinv splits the variance.
        let jac = vec![1.0, 1.0, 1.0, 1.0];
        let err = standard_errors(&jac, 2, 2).unwrap();
        assert!(err.iter().all(|e| e.is_finite()));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        assert!(normal_pseudo_inverse(&[1.0, 2.0, 3.0], 2, 2).is_none());
        assert!(standard_errors(&[], 0, 0).is_none());
    }
}
