//! # Uncertainty Calculation
//!
//! Parameter errors from the local curvature of the objective at the
//! minimum:
//!
//! - the quick estimate `(JᵀJ)⁻¹` from the last Levenberg-Marquardt Jacobian
//! - the full numerical Hessian (`Hesse` command), `2·up·H⁻¹`
//!
//! Asymmetric MINOS errors are stored on the parameters themselves; see
//! [`crate::fitter::minos`].

mod covariance;

pub use covariance::{
    calculate_correlation, covariance_from_hessian, covariance_from_jacobian, invert_symmetric,
    standard_errors_from_covariance, to_external,
};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How an error estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMethod {
    /// `(JᵀJ)⁻¹` from the minimizer's last Jacobian
    Curvature,
    /// Numerical Hessian of the objective
    Hesse,
}

/// Covariance of the free parameters in external coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEstimate {
    pub method: ErrorMethod,
    /// Names of the free parameters, in covariance order
    pub parameters: Vec<String>,
    pub errors: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub correlation: Vec<Vec<f64>>,
}

impl ErrorEstimate {
    pub fn from_covariance(method: ErrorMethod, parameters: Vec<String>, covariance: &Array2<f64>) -> Self {
        let rows = |m: &Array2<f64>| -> Vec<Vec<f64>> { m.outer_iter().map(|row| row.to_vec()).collect() };
        Self {
            method,
            parameters,
            errors: standard_errors_from_covariance(covariance).to_vec(),
            covariance: rows(covariance),
            correlation: rows(&calculate_correlation(covariance)),
        }
    }

    /// Error of a free parameter by name.
    pub fn error_of(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .position(|p| p.eq_ignore_ascii_case(name))
            .map(|i| self.errors[i])
    }
}
