//! Levenberg-Marquardt minimization (the `Migrad` command).
//!
//! Works on any [`Problem`]: each iteration builds the finite-difference
//! Jacobian J at the current point, then solves
//! `(JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr` for increasing λ until a step lowers
//! Σr². A trial point that cannot be evaluated (non-finite prediction,
//! failing FUNCTIONS entry) is treated like an uphill step.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::error::{MusrFitError, Result};
use crate::fitter::config::FitConfig;
use crate::fitter::convergence::{ConvergenceCriteria, ConvergenceStatus};
use crate::fitter::state::RunControl;
use crate::fitter::MinimizerResult;
use crate::problem::Problem;
use crate::utils::finite_difference::jacobian_at;

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    criteria: ConvergenceCriteria,
    initial_lambda: f64,
    lambda_up_factor: f64,
    lambda_down_factor: f64,
    min_lambda: f64,
    max_lambda: f64,
    max_eval_failures: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::from_config(&FitConfig::default())
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            criteria: config.criteria(),
            initial_lambda: config.initial_lambda,
            lambda_up_factor: config.lambda_up_factor,
            lambda_down_factor: config.lambda_down_factor,
            min_lambda: config.min_lambda,
            max_lambda: config.max_lambda,
            max_eval_failures: config.max_eval_failures,
        }
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.criteria.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for change in residual norm.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.criteria.ftol = ftol;
        self
    }

    /// Set the tolerance for change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.criteria.xtol = xtol;
        self
    }

    /// Set the tolerance for gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.criteria.gtol = gtol;
        self
    }

    pub fn criteria(&self) -> &ConvergenceCriteria {
        &self.criteria
    }

    /// Minimize Σr² starting from `initial_params`.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    /// * `control` - Cancellation and deadline, checked every iteration
    ///
    /// # Returns
    ///
    /// * The last accepted point with its status. Evaluation failures,
    ///   cancellation and exhausted budgets are reported in the status;
    ///   `Err` is returned only for structural problems such as a
    ///   dimension mismatch.
    pub fn minimize<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        control: &RunControl,
    ) -> Result<MinimizerResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        let mut func_evals = 1;
        let mut residuals = match problem.eval(&params) {
            Ok(r) => r,
            Err(MusrFitError::Evaluation(e)) => {
                return Ok(MinimizerResult::stopped(
                    params,
                    f64::NAN,
                    0,
                    func_evals,
                    ConvergenceStatus::NumericalError,
                    format!("start point cannot be evaluated: {}", e),
                ));
            }
            Err(e) => return Err(e),
        };
        let mut cost = sum_of_squares(&residuals);

        if n_params == 0 {
            return Ok(MinimizerResult::stopped(
                params,
                cost,
                0,
                func_evals,
                ConvergenceStatus::GradientConvergence,
                "no free parameters".to_string(),
            ));
        }

        let mut lambda = self.initial_lambda;
        let mut iterations = 0;
        let mut failures = 0;

        loop {
            if let Err(abort) = control.check() {
                return Ok(MinimizerResult::stopped(
                    params,
                    cost,
                    iterations,
                    func_evals,
                    abort.into(),
                    abort.to_string(),
                ));
            }
            if self.criteria.iterations_exhausted(iterations) {
                return Ok(MinimizerResult::stopped(
                    params,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::MaxIterationsReached,
                    format!("Maximum iterations ({}) reached", self.criteria.max_iterations),
                ));
            }

            let steps = problem.difference_steps(&params);
            let jacobian = match jacobian_at(problem, &params, &residuals, Some(&steps)) {
                Ok(j) => j,
                Err(MusrFitError::Evaluation(e)) => {
                    return Ok(MinimizerResult::stopped(
                        params,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::NumericalError,
                        format!("Jacobian cannot be evaluated: {}", e),
                    ));
                }
                Err(e) => return Err(e),
            };
            func_evals += n_params;

            let gradient = jacobian.t().dot(&residuals);
            let jtj = jacobian.t().dot(&jacobian);
            let gradient_max = gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if self.criteria.gradient_converged(gradient_max) {
                return Ok(MinimizerResult::converged(
                    params,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::GradientConvergence,
                    format!(
                        "Gradient convergence: ||g|| = {:.2e} <= {:.2e}",
                        gradient_max, self.criteria.gtol
                    ),
                    jacobian,
                ));
            }
            iterations += 1;

            // Inner loop: raise the damping until a step goes downhill.
            loop {
                let step = match solve_damped(&jtj, &gradient, lambda) {
                    Some(step) => step,
                    None => {
                        lambda *= self.lambda_up_factor;
                        if lambda > self.max_lambda {
                            return Ok(self.stalled(params, cost, iterations, func_evals));
                        }
                        continue;
                    }
                };
                let predicted = -(2.0 * step.dot(&gradient) + step.dot(&jtj.dot(&step)));
                let step_norm = norm(&step);
                let params_norm = norm(&params);
                let trial = &params + &step;
                func_evals += 1;

                let trial_residuals = match problem.eval(&trial) {
                    Ok(r) if r.iter().all(|v| v.is_finite()) => Some(r),
                    Ok(_) => None,
                    Err(MusrFitError::Evaluation(e)) => {
                        debug!("trial point rejected: {}", e);
                        None
                    }
                    Err(e) => return Err(e),
                };

                let Some(trial_residuals) = trial_residuals else {
                    failures += 1;
                    if failures > self.max_eval_failures {
                        warn!("{} consecutive trial evaluations failed", failures);
                        return Ok(MinimizerResult::stopped(
                            params,
                            cost,
                            iterations,
                            func_evals,
                            ConvergenceStatus::NumericalError,
                            format!("{} consecutive trial evaluations failed", failures),
                        ));
                    }
                    lambda *= self.lambda_up_factor;
                    if lambda > self.max_lambda {
                        return Ok(self.stalled(params, cost, iterations, func_evals));
                    }
                    continue;
                };
                failures = 0;

                let new_cost = sum_of_squares(&trial_residuals);
                if new_cost < cost {
                    let actual = cost - new_cost;
                    let status = if self.criteria.cost_converged(actual, predicted, cost) {
                        ConvergenceStatus::FunctionValueConvergence
                    } else if self.criteria.step_converged(step_norm, params_norm) {
                        ConvergenceStatus::ParameterConvergence
                    } else {
                        ConvergenceStatus::Running
                    };

                    params = trial;
                    residuals = trial_residuals;
                    cost = new_cost;
                    lambda = (lambda * self.lambda_down_factor).max(self.min_lambda);
                    debug!(
                        "iteration {}: cost = {:.6e}, lambda = {:.1e}, |step| = {:.2e}",
                        iterations, cost, lambda, step_norm
                    );

                    if status.is_converged() {
                        return self.finish(problem, params, residuals, cost, iterations, func_evals, status);
                    }
                    break;
                }

                // Uphill. Stop if the model says nothing is left to gain.
                if predicted <= self.criteria.ftol * cost {
                    return self.finish(
                        problem,
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::FunctionValueConvergence,
                    );
                }
                if self.criteria.step_converged(step_norm, params_norm) {
                    return self.finish(
                        problem,
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::ParameterConvergence,
                    );
                }
                lambda *= self.lambda_up_factor;
                if lambda > self.max_lambda {
                    return Ok(self.stalled(params, cost, iterations, func_evals));
                }
            }
        }
    }

    fn stalled(&self, params: Array1<f64>, cost: f64, iterations: usize, func_evals: usize) -> MinimizerResult {
        MinimizerResult::stopped(
            params,
            cost,
            iterations,
            func_evals,
            ConvergenceStatus::Stalled,
            "Failed to decrease cost, and lambda reached maximum".to_string(),
        )
    }

    /// Converged result with the Jacobian at the final point.
    #[allow(clippy::too_many_arguments)]
    fn finish<P: Problem>(
        &self,
        problem: &P,
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        status: ConvergenceStatus,
    ) -> Result<MinimizerResult> {
        let steps = problem.difference_steps(&params);
        let message = format!("{} after {} iterations", status.description(), iterations);
        match jacobian_at(problem, &params, &residuals, Some(&steps)) {
            Ok(jacobian) => Ok(MinimizerResult::converged(
                params,
                cost,
                iterations,
                func_evals + problem.parameter_count(),
                status,
                message,
                jacobian,
            )),
            Err(MusrFitError::Evaluation(e)) => {
                warn!("final Jacobian unavailable: {}", e);
                Ok(MinimizerResult::stopped(params, cost, iterations, func_evals, status, message))
            }
            Err(e) => Err(e),
        }
    }
}

fn sum_of_squares(residuals: &Array1<f64>) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

fn norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Solve `(A + λ·diag(A)) δ = −g`.
///
/// Returns `None` when the damped matrix is singular.
fn solve_damped(a: &Array2<f64>, g: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
    let n = g.len();
    let max_diag = (0..n).fold(0.0_f64, |m, i| m.max(a[[i, i]]));
    let floor = (f64::EPSILON * max_diag).max(f64::MIN_POSITIVE);
    let m = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            a[[i, i]] + lambda * a[[i, i]].max(floor)
        } else {
            a[[i, j]]
        }
    });
    let rhs = DVector::from_iterator(n, g.iter().map(|v| -v));

    let solution = match m.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => m.lu().solve(&rhs)?,
    };
    if solution.iter().all(|v| v.is_finite()) {
        Some(Array1::from_iter(solution.iter().copied()))
    } else {
        None
    }
}
