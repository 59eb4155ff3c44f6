//! Finite difference methods for numerical differentiation.
//!
//! The objective is only known through evaluation, so the minimizers build
//! Jacobians and Hessians here. Steps are supplied per parameter because the
//! parameters of a µSR fit span many orders of magnitude (asymmetries of
//! 0.2 next to fields of 10⁴ G).

use ndarray::{Array1, Array2};

use crate::error::{MusrFitError, Result};
use crate::problem::Problem;

/// Default relative step size for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

fn default_step(x: f64) -> f64 {
    if x.abs() > DEFAULT_EPSILON {
        x.abs() * DEFAULT_EPSILON
    } else {
        DEFAULT_EPSILON
    }
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// J[i,j] = ∂residual[i]/∂param[j].
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `steps` - Step for each parameter (optional; relative 1e-8 otherwise)
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The Jacobian matrix
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    steps: Option<&Array1<f64>>,
) -> Result<Array2<f64>> {
    let residuals = problem.eval(params)?;
    jacobian_at(problem, params, &residuals, steps)
}

/// Jacobian at a point whose residuals are already known.
///
/// When the forward point cannot be evaluated (for example it produces a
/// non-finite prediction) the backward difference is used for that column.
pub fn jacobian_at(
    problem: &dyn Problem,
    params: &Array1<f64>,
    residuals: &Array1<f64>,
    steps: Option<&Array1<f64>>,
) -> Result<Array2<f64>> {
    let n_params = params.len();
    let n_residuals = problem.residual_count();
    if residuals.len() != n_residuals {
        return Err(MusrFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }
    if let Some(steps) = steps {
        if steps.len() != n_params {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} steps, got {}",
                n_params,
                steps.len()
            )));
        }
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    for j in 0..n_params {
        let h = match steps {
            Some(steps) if steps[j] > 0.0 && steps[j].is_finite() => steps[j],
            _ => default_step(params[j]),
        };

        let mut perturbed = params.clone();
        perturbed[j] += h;
        let (shifted, signed_h) = match problem.eval(&perturbed) {
            Ok(r) => (r, h),
            Err(MusrFitError::Evaluation(_)) => {
                perturbed[j] = params[j] - h;
                (problem.eval(&perturbed)?, -h)
            }
            Err(e) => return Err(e),
        };

        for i in 0..n_residuals {
            jac[[i, j]] = (shifted[i] - residuals[i]) / signed_h;
        }
    }

    Ok(jac)
}

/// Compute the Hessian matrix of a scalar function using central differences.
///
/// H[i,j] = ∂²f/∂param[i]∂param[j], with `f0 = f(params)` supplied by the
/// caller.
///
/// # Arguments
///
/// * `f` - The function to differentiate
/// * `params` - The parameter values at which to evaluate the Hessian
/// * `f0` - The function value at `params`
/// * `steps` - Step for each parameter
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The symmetric Hessian matrix
pub fn hessian<F>(f: F, params: &Array1<f64>, f0: f64, steps: &Array1<f64>) -> Result<Array2<f64>>
where
    F: Fn(&Array1<f64>) -> Result<f64>,
{
    let n = params.len();
    if steps.len() != n {
        return Err(MusrFitError::DimensionMismatch(format!(
            "Expected {} steps, got {}",
            n,
            steps.len()
        )));
    }

    let shifted = |moves: &[(usize, f64)]| -> Result<f64> {
        let mut p = params.clone();
        for &(k, d) in moves {
            p[k] += d;
        }
        f(&p)
    };

    let mut hess = Array2::zeros((n, n));
    for i in 0..n {
        let hi = steps[i];
        let f_p = shifted(&[(i, hi)])?;
        let f_m = shifted(&[(i, -hi)])?;
        hess[[i, i]] = (f_p - 2.0 * f0 + f_m) / (hi * hi);

        for j in 0..i {
            let hj = steps[j];
            let f_pp = shifted(&[(i, hi), (j, hj)])?;
            let f_pm = shifted(&[(i, hi), (j, -hj)])?;
            let f_mp = shifted(&[(i, -hi), (j, hj)])?;
            let f_mm = shifted(&[(i, -hi), (j, -hj)])?;
            let value = (f_pp - f_pm - f_mp + f_mm) / (4.0 * hi * hj);
            hess[[i, j]] = value;
            hess[[j, i]] = value;
        }
    }

    Ok(hess)
}
