//! Fit orchestration: minimizers, error estimation and the command list.
//!
//! The minimizers ([`LevenbergMarquardt`] for `Migrad`, [`Simplex`]) work on
//! a [`FitProblem`], the free-parameter view of an
//! [`Objective`](crate::objective::Objective) in unbounded internal
//! coordinates. Error estimation is either the curvature from the final
//! Jacobian, the numerical Hessian of [`hesse`], or the profile search of
//! [`Minos`]. The [`StateMachine`] tracks a session through these steps.

pub mod command;
pub mod config;
pub mod convergence;
pub mod hesse;
pub mod migrad;
pub mod minos;
pub mod problem;
pub mod simplex;
pub mod state;

use std::fmt;

use ndarray::{Array1, Array2};

pub use command::{FitCommand, ParamId, RangeCommand, DEFAULT_SCAN_POINTS};
pub use config::FitConfig;
pub use convergence::{ConvergenceCriteria, ConvergenceStatus};
pub use hesse::{hesse, HesseResult};
pub use migrad::LevenbergMarquardt;
pub use minos::{Minos, MinosError};
pub use problem::FitProblem;
pub use simplex::Simplex;
pub use state::{Abort, CancelToken, FitState, FitStatus, RunControl, StateMachine};

/// Outcome of one minimizer run, in internal coordinates.
#[derive(Debug, Clone)]
pub struct MinimizerResult {
    /// Best point found
    pub params: Array1<f64>,

    /// Σr² for Levenberg-Marquardt, the objective for the simplex
    pub cost: f64,

    pub iterations: usize,

    pub func_evals: usize,

    pub status: ConvergenceStatus,

    pub message: String,

    /// Jacobian at `params`; only set when the minimizer converged
    pub jacobian: Option<Array2<f64>>,
}

impl MinimizerResult {
    pub(crate) fn stopped(
        params: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        status: ConvergenceStatus,
        message: String,
    ) -> Self {
        Self {
            params,
            cost,
            iterations,
            func_evals,
            status,
            message,
            jacobian: None,
        }
    }

    pub(crate) fn converged(
        params: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        status: ConvergenceStatus,
        message: String,
        jacobian: Array2<f64>,
    ) -> Self {
        Self {
            jacobian: Some(jacobian),
            ..Self::stopped(params, cost, iterations, func_evals, status, message)
        }
    }

    pub fn success(&self) -> bool {
        self.status.is_converged()
    }
}

impl fmt::Display for MinimizerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Minimizer result:")?;
        writeln!(f, "  Status: {}", self.status)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        Ok(())
    }
}
