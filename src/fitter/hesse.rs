//! Numerical Hessian error estimate (the `Hesse` command).

use log::debug;
use ndarray::{Array1, Array2};

use crate::error::{MusrFitError, Result};
use crate::fitter::problem::FitProblem;
use crate::uncertainty::{covariance_from_hessian, to_external};
use crate::utils::finite_difference::hessian;

/// Second-difference target, in units of "up". Large enough to beat
/// rounding, small enough to stay in the parabolic region.
const TARGET_D2: f64 = 0.1;
const MAX_STEP_ADJUSTMENTS: usize = 8;

/// Covariance of the free parameters at a minimum.
#[derive(Debug, Clone)]
pub struct HesseResult {
    /// Hessian of the objective in internal coordinates
    pub hessian: Array2<f64>,
    /// Covariance in external coordinates
    pub covariance: Array2<f64>,
    pub steps: Array1<f64>,
    pub func_evals: usize,
}

/// Estimate the covariance at `internal` from the curvature of the
/// objective.
///
/// # Arguments
///
/// * `problem` - Free-parameter view of the objective
/// * `internal` - The minimum, in internal coordinates
///
/// # Errors
///
/// `SingularMatrix` when the Hessian is not positive definite, or the
/// evaluation error of a point the differences could not avoid.
pub fn hesse(problem: &FitProblem<'_>, internal: &Array1<f64>) -> Result<HesseResult> {
    let up = problem.objective().up();
    let f = |x: &Array1<f64>| problem.value(x);
    let f0 = f(internal)?;
    let mut func_evals = 1;

    let n = internal.len();
    let mut steps = Array1::zeros(n);
    for i in 0..n {
        let floor = 1e-8 * internal[i].abs().max(1.0);
        let mut h = problem.internal_steps()[i].max(floor);
        for _ in 0..MAX_STEP_ADJUSTMENTS {
            let mut plus = internal.clone();
            let mut minus = internal.clone();
            plus[i] += h;
            minus[i] -= h;
            func_evals += 2;
            let d2 = match (f(&plus), f(&minus)) {
                (Ok(fp), Ok(fm)) => fp + fm - 2.0 * f0,
                (Err(MusrFitError::Evaluation(_)), _) | (_, Err(MusrFitError::Evaluation(_))) => {
                    h *= 0.5;
                    continue;
                }
                (Err(e), _) | (_, Err(e)) => return Err(e),
            };
            if !(d2 > 0.0) {
                h *= 10.0;
                continue;
            }
            let ratio = TARGET_D2 * up / d2;
            if (0.5..=2.0).contains(&ratio) {
                break;
            }
            h = (h * ratio.sqrt().clamp(0.1, 10.0)).max(floor);
        }
        steps[i] = h;
    }
    debug!("hesse steps: {:?}", steps);

    let hess = hessian(f, internal, f0, &steps)?;
    func_evals += 2 * n * n;
    let internal_cov = covariance_from_hessian(&hess, up)?;
    let covariance = to_external(&internal_cov, &problem.derivatives(internal));

    Ok(HesseResult {
        hessian: hess,
        covariance,
        steps,
        func_evals,
    })
}
