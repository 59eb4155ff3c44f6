//! Problem definition trait.
//!
//! This module defines the `Problem` trait, the residual-vector view of a fit
//! that the Levenberg-Marquardt minimizer works on. The global µSR objective
//! implements it through [`crate::fitter::FitProblem`]; tests implement it
//! directly for small analytic models.

use ndarray::{Array1, Array2};

use crate::error::Result;

/// A nonlinear least-squares problem.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the residuals
    ///
    /// # Returns
    ///
    /// * A vector of residuals, or an error if the evaluation fails. An
    ///   `Evaluation` error marks the point as unusable; minimizers treat it
    ///   as a rejected trial rather than a fatal failure.
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Finite-difference step for each parameter at `params`.
    ///
    /// The default scales with the parameter magnitude.
    fn difference_steps(&self, params: &Array1<f64>) -> Array1<f64> {
        params.mapv(|x| f64::EPSILON.sqrt() * x.abs().max(1.0))
    }

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The default implementation uses forward finite differences with the
    /// steps from [`Problem::difference_steps`].
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>>
    where
        Self: Sized,
    {
        let steps = self.difference_steps(params);
        crate::utils::finite_difference::jacobian(self, params, Some(&steps))
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}
