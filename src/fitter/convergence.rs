//! Convergence criteria for the minimizers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fitter::state::{Abort, FitState};

/// Possible termination states of a minimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// The algorithm is still running.
    Running,

    /// Converged due to a small parameter step.
    ParameterConvergence,

    /// Converged due to a small (actual and predicted) objective change.
    FunctionValueConvergence,

    /// Converged due to a small gradient.
    GradientConvergence,

    /// Simplex function values agree within tolerance.
    SimplexConvergence,

    /// Iteration budget exhausted.
    MaxIterationsReached,

    /// No downhill step could be found before the damping limit.
    Stalled,

    /// Too many consecutive failed evaluations, or an unusable start point.
    NumericalError,

    Cancelled,

    TimedOut,
}

impl ConvergenceStatus {
    /// Returns true if the optimization has terminated (either converged or failed).
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ConvergenceStatus::Running)
    }

    /// Returns true if the optimization has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::GradientConvergence
                | ConvergenceStatus::SimplexConvergence
        )
    }

    /// Driver state this outcome leads to.
    pub fn fit_state(&self) -> FitState {
        match self {
            s if s.is_converged() => FitState::Converged,
            ConvergenceStatus::MaxIterationsReached => FitState::MaxIterationsExceeded,
            _ => FitState::Failed,
        }
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::Running => "Optimization is still running",
            ConvergenceStatus::ParameterConvergence => "Converged: small parameter change",
            ConvergenceStatus::FunctionValueConvergence => "Converged: small function value change",
            ConvergenceStatus::GradientConvergence => "Converged: small gradient",
            ConvergenceStatus::SimplexConvergence => "Converged: simplex function values agree",
            ConvergenceStatus::MaxIterationsReached => "Terminated: maximum iterations reached",
            ConvergenceStatus::Stalled => "Terminated: no downhill step found",
            ConvergenceStatus::NumericalError => "Terminated: numerical error",
            ConvergenceStatus::Cancelled => "Terminated: cancelled",
            ConvergenceStatus::TimedOut => "Terminated: timed out",
        }
    }
}

impl From<Abort> for ConvergenceStatus {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::Cancelled => ConvergenceStatus::Cancelled,
            Abort::TimedOut => ConvergenceStatus::TimedOut,
        }
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Criteria for determining when a minimizer has converged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceCriteria {
    /// Relative tolerance on the parameter step.
    pub xtol: f64,

    /// Relative tolerance on the objective reduction.
    pub ftol: f64,

    /// Tolerance on the largest gradient component.
    pub gtol: f64,

    /// Maximum number of iterations.
    pub max_iterations: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            xtol: 1e-8,
            ftol: 1e-8,
            gtol: 1e-8,
            max_iterations: 500,
        }
    }
}

impl ConvergenceCriteria {
    /// Creates a new set of convergence criteria with the given tolerances.
    pub fn new(xtol: f64, ftol: f64, gtol: f64, max_iterations: usize) -> Self {
        Self {
            xtol,
            ftol,
            gtol,
            max_iterations,
        }
    }

    /// ‖g‖∞ ≤ gtol.
    pub fn gradient_converged(&self, gradient_max: f64) -> bool {
        gradient_max <= self.gtol
    }

    /// ‖δ‖ ≤ xtol·(‖x‖ + xtol).
    pub fn step_converged(&self, step_norm: f64, params_norm: f64) -> bool {
        step_norm <= self.xtol * (params_norm + self.xtol)
    }

    /// Both the achieved and the predicted reduction are below `ftol`
    /// relative to the current cost.
    ///
    /// # Arguments
    ///
    /// * `actual` - Cost reduction achieved by the step
    /// * `predicted` - Reduction predicted by the linear model
    /// * `cost` - Cost before the step
    pub fn cost_converged(&self, actual: f64, predicted: f64, cost: f64) -> bool {
        let scale = self.ftol * cost.abs();
        actual.abs() <= scale && predicted <= scale
    }

    pub fn iterations_exhausted(&self, iterations: usize) -> bool {
        iterations >= self.max_iterations
    }
}
