//! # Covariance Matrix Calculations
//!
//! Covariance matrices from the curvature of the objective, computed in the
//! minimizer's internal coordinates and carried to external parameter
//! values through the bounds transform.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

use crate::error::{MusrFitError, Result};

fn to_nalgebra(matrix: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = matrix.dim();
    DMatrix::from_fn(rows, cols, |i, j| matrix[[i, j]])
}

fn to_ndarray(matrix: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(i, j)| matrix[(i, j)])
}

/// Invert a symmetric positive-definite matrix.
///
/// Cholesky is tried first; a matrix that is not positive definite is
/// reported as [`MusrFitError::SingularMatrix`], since a covariance derived
/// from it would have negative variances.
pub fn invert_symmetric(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(MusrFitError::DimensionMismatch(format!(
            "Expected a square matrix, got {}x{}",
            rows, cols
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(MusrFitError::SingularMatrix);
    }
    let cholesky = to_nalgebra(matrix)
        .cholesky()
        .ok_or(MusrFitError::SingularMatrix)?;
    if cholesky.l_dirty().diagonal().iter().any(|d| *d <= 0.0) {
        return Err(MusrFitError::SingularMatrix);
    }
    let inverse = cholesky.inverse();
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(MusrFitError::SingularMatrix);
    }
    Ok(to_ndarray(&inverse))
}

/// Covariance from the Hessian of the objective: `2·up·H⁻¹`.
///
/// # Arguments
///
/// * `hessian` - Second derivatives of the objective
/// * `up` - Objective change defining one standard deviation
///   (1 for χ², 0.5 for the negative log-likelihood)
pub fn covariance_from_hessian(hessian: &Array2<f64>, up: f64) -> Result<Array2<f64>> {
    Ok(invert_symmetric(hessian)? * (2.0 * up))
}

/// Covariance from the residual Jacobian: `(JᵀJ)⁻¹`.
///
/// Residuals are normalised so that Σr² changes by 1 at one standard
/// deviation, for χ² and likelihood fits alike.
pub fn covariance_from_jacobian(jacobian: &Array2<f64>) -> Result<Array2<f64>> {
    invert_symmetric(&jacobian.t().dot(jacobian))
}

/// Carry a covariance matrix from internal to external coordinates.
///
/// `derivatives[i]` is d(external)/d(internal) for parameter `i`.
pub fn to_external(covariance: &Array2<f64>, derivatives: &[f64]) -> Array2<f64> {
    let mut external = covariance.clone();
    for ((i, j), value) in external.indexed_iter_mut() {
        *value *= derivatives[i] * derivatives[j];
    }
    external
}

/// Calculate correlation matrix from covariance matrix.
///
/// correl[i,j] = covar[i,j] / sqrt(covar[i,i] * covar[j,j])
pub fn calculate_correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            return 1.0;
        }
        let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
        if denom > 0.0 {
            covar[[i, j]] / denom
        } else {
            0.0
        }
    })
}

/// Standard errors: square roots of the diagonal.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar
        .diag()
        .mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}
