//! Nelder-Mead simplex minimization (the `Simplex` command).
//!
//! Slower than Levenberg-Marquardt but needs no derivatives, which makes it
//! the fallback of `Minimize` when the Jacobian is unusable. It minimizes
//! the scalar objective in internal coordinates; a trial point that cannot
//! be evaluated counts as +∞, so the simplex contracts away from it.

use std::cell::Cell;

use log::{debug, warn};
use ndarray::Array1;

use crate::error::{MusrFitError, Result};
use crate::fitter::convergence::ConvergenceStatus;
use crate::fitter::state::RunControl;
use crate::fitter::MinimizerResult;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Nelder-Mead minimizer.
#[derive(Debug, Clone)]
pub struct Simplex {
    /// Stop when all vertex values agree within this absolute spread
    pub tolerance: f64,
    pub max_iterations: usize,
    pub max_eval_failures: usize,
}

impl Default for Simplex {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iterations: 500,
            max_eval_failures: 10,
        }
    }
}

impl Simplex {
    pub fn new(tolerance: f64, max_iterations: usize, max_eval_failures: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            max_eval_failures,
        }
    }

    /// Minimize `f` starting from `start`, with initial vertex offsets `steps`.
    ///
    /// # Arguments
    ///
    /// * `f` - Objective; `Err(Evaluation)` marks an unusable point
    /// * `start` - First vertex
    /// * `steps` - Offset of vertex `i+1` along coordinate `i`
    /// * `control` - Cancellation and deadline, checked every iteration
    pub fn minimize<F>(
        &self,
        f: F,
        start: Array1<f64>,
        steps: &[f64],
        control: &RunControl,
    ) -> Result<MinimizerResult>
    where
        F: Fn(&Array1<f64>) -> Result<f64>,
    {
        let n = start.len();
        if steps.len() != n {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} steps, got {}",
                n,
                steps.len()
            )));
        }

        let func_evals = Cell::new(0_usize);
        let mut failures = 0;
        let eval = |x: &Array1<f64>| -> Result<f64> {
            func_evals.set(func_evals.get() + 1);
            match f(x) {
                Ok(v) if v.is_finite() => Ok(v),
                Ok(_) => Ok(f64::INFINITY),
                Err(MusrFitError::Evaluation(e)) => {
                    debug!("simplex vertex rejected: {}", e);
                    Ok(f64::INFINITY)
                }
                Err(e) => Err(e),
            }
        };

        let f0 = eval(&start)?;
        if !f0.is_finite() {
            return Ok(MinimizerResult::stopped(
                start,
                f64::NAN,
                0,
                1,
                ConvergenceStatus::NumericalError,
                "start point cannot be evaluated".to_string(),
            ));
        }
        if n == 0 {
            return Ok(MinimizerResult::stopped(
                start,
                f0,
                0,
                1,
                ConvergenceStatus::SimplexConvergence,
                "no free parameters".to_string(),
            ));
        }

        let mut vertices: Vec<(Array1<f64>, f64)> = Vec::with_capacity(n + 1);
        vertices.push((start.clone(), f0));
        for (i, &step) in steps.iter().enumerate() {
            let mut v = start.clone();
            v[i] += if step != 0.0 { step } else { 0.1 };
            let fv = eval(&v)?;
            vertices.push((v, fv));
        }

        let mut iterations = 0;
        loop {
            vertices.sort_by(|a, b| a.1.total_cmp(&b.1));
            let (best_x, best_f) = (vertices[0].0.clone(), vertices[0].1);
            let worst_f = vertices[n].1;

            if worst_f - best_f <= self.tolerance {
                return Ok(MinimizerResult::stopped(
                    best_x,
                    best_f,
                    iterations,
                    func_evals.get(),
                    ConvergenceStatus::SimplexConvergence,
                    format!("Simplex converged after {} iterations", iterations),
                ));
            }
            if let Err(abort) = control.check() {
                return Ok(MinimizerResult::stopped(
                    best_x,
                    best_f,
                    iterations,
                    func_evals.get(),
                    abort.into(),
                    abort.to_string(),
                ));
            }
            if iterations >= self.max_iterations {
                return Ok(MinimizerResult::stopped(
                    best_x,
                    best_f,
                    iterations,
                    func_evals.get(),
                    ConvergenceStatus::MaxIterationsReached,
                    format!("Maximum iterations ({}) reached", self.max_iterations),
                ));
            }
            iterations += 1;

            let centroid = vertices[..n]
                .iter()
                .fold(Array1::zeros(n), |acc: Array1<f64>, (x, _)| acc + x)
                / n as f64;
            let worst = vertices[n].0.clone();
            let toward = |factor: f64| &centroid + &((&centroid - &worst) * factor);

            let reflected = toward(REFLECTION);
            let f_reflected = eval(&reflected)?;
            let accepted = if f_reflected < best_f {
                let expanded = toward(EXPANSION);
                let f_expanded = eval(&expanded)?;
                if f_expanded < f_reflected {
                    Some((expanded, f_expanded))
                } else {
                    Some((reflected, f_reflected))
                }
            } else if f_reflected < vertices[n - 1].1 {
                Some((reflected, f_reflected))
            } else {
                let (contracted, f_contracted) = if f_reflected < worst_f {
                    let x = toward(CONTRACTION);
                    let fx = eval(&x)?;
                    (x, fx)
                } else {
                    let x = toward(-CONTRACTION);
                    let fx = eval(&x)?;
                    (x, fx)
                };
                if f_contracted < worst_f.min(f_reflected) {
                    Some((contracted, f_contracted))
                } else {
                    None
                }
            };

            if f_reflected.is_infinite() {
                failures += 1;
                if failures > self.max_eval_failures {
                    warn!("{} consecutive simplex trials failed", failures);
                    return Ok(MinimizerResult::stopped(
                        best_x,
                        best_f,
                        iterations,
                        func_evals.get(),
                        ConvergenceStatus::NumericalError,
                        format!("{} consecutive trial evaluations failed", failures),
                    ));
                }
            } else {
                failures = 0;
            }

            match accepted {
                Some(vertex) => vertices[n] = vertex,
                None => {
                    for vertex in vertices.iter_mut().skip(1) {
                        let x = &best_x + &((&vertex.0 - &best_x) * SHRINK);
                        let fx = eval(&x)?;
                        *vertex = (x, fx);
                    }
                }
            }
        }
    }
}
