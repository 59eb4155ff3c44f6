//! Configuration of a fit session.
//!
//! `FitConfig` collects the convergence criteria of the minimizers, the
//! statistic, the evaluation backend and the command list. It is plain
//! serde data: the host application loads it however it likes and passes
//! it in, or uses [`FitConfig::from_json`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accel::{BackendKind, VerificationPolicy};
use crate::error::{MusrFitError, Result};
use crate::fitter::command::FitCommand;
use crate::fitter::convergence::ConvergenceCriteria;
use crate::objective::FitStatistic;

/// Configuration options for a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Maximum number of iterations per minimization command. Default: 500
    pub max_iterations: usize,

    /// Relative tolerance on the objective reduction. Default: 1e-8
    pub ftol: f64,

    /// Relative tolerance on the parameter step. Default: 1e-8
    pub xtol: f64,

    /// Tolerance on the largest gradient component. Default: 1e-10
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-12
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e12
    pub max_lambda: f64,

    /// Simplex stops when its function values agree within this many
    /// "up" units. Default: 1e-4
    pub simplex_tolerance: f64,

    /// Chi-square or Poisson maximum likelihood. Default: ChiSquare
    pub statistic: FitStatistic,

    /// Per-block evaluation backend. Default: Parallel
    pub backend: BackendKind,

    /// Worker threads of the parallel backend; None uses rayon's default.
    pub threads: Option<usize>,

    /// Relative tolerance for accelerated vs serial block values. Default: 1e-9
    pub accel_tolerance: f64,

    /// Re-verify the accelerated backend every n evaluations. Default: 50
    pub verify_every: usize,

    /// Skip the automatic curvature error estimate after convergence.
    pub skip_error_estimation: bool,

    /// Abort the fit after this many seconds.
    pub timeout_secs: Option<f64>,

    /// Consecutive failed trial evaluations tolerated. Default: 10
    pub max_eval_failures: usize,

    /// Commands executed in order; empty means `[Migrad, Hesse]`.
    pub commands: Vec<FitCommand>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-12,
            max_lambda: 1e12,
            simplex_tolerance: 1e-4,
            statistic: FitStatistic::default(),
            backend: BackendKind::default(),
            threads: None,
            accel_tolerance: 1e-9,
            verify_every: 50,
            skip_error_estimation: false,
            timeout_secs: None,
            max_eval_failures: 10,
            commands: Vec::new(),
        }
    }
}

impl FitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for change in objective value.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    /// Set the tolerance for change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    /// Set the tolerance for gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    pub fn with_simplex_tolerance(mut self, tolerance: f64) -> Self {
        self.simplex_tolerance = tolerance;
        self
    }

    pub fn with_statistic(mut self, statistic: FitStatistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set how strictly and how often the accelerated backend is checked.
    pub fn with_verification(mut self, tolerance: f64, verify_every: usize) -> Self {
        self.accel_tolerance = tolerance;
        self.verify_every = verify_every;
        self
    }

    pub fn with_skip_error_estimation(mut self, skip: bool) -> Self {
        self.skip_error_estimation = skip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_max_eval_failures(mut self, failures: usize) -> Self {
        self.max_eval_failures = failures;
        self
    }

    pub fn with_commands(mut self, commands: Vec<FitCommand>) -> Self {
        self.commands = commands;
        self
    }

    /// Convergence criteria for the minimizers.
    pub fn criteria(&self) -> ConvergenceCriteria {
        ConvergenceCriteria::new(self.xtol, self.ftol, self.gtol, self.max_iterations)
    }

    pub fn verification_policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            tolerance: self.accel_tolerance,
            verify_every: self.verify_every,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    /// The command list to run.
    pub fn effective_commands(&self) -> Vec<FitCommand> {
        if self.commands.is_empty() {
            vec![FitCommand::Migrad, FitCommand::Hesse]
        } else {
            self.commands.clone()
        }
    }

    /// Check the settings before a fit starts.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MusrFitError::InvalidConfig(msg));
        if self.max_iterations == 0 {
            return invalid("max_iterations must be positive".to_string());
        }
        for (name, value) in [
            ("ftol", self.ftol),
            ("xtol", self.xtol),
            ("gtol", self.gtol),
            ("initial_lambda", self.initial_lambda),
            ("min_lambda", self.min_lambda),
            ("max_lambda", self.max_lambda),
            ("simplex_tolerance", self.simplex_tolerance),
            ("accel_tolerance", self.accel_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{} must be positive and finite, got {}", name, value));
            }
        }
        if self.lambda_up_factor <= 1.0 || !(self.lambda_down_factor > 0.0 && self.lambda_down_factor < 1.0) {
            return invalid("lambda factors must satisfy up > 1 and 0 < down < 1".to_string());
        }
        if self.min_lambda > self.max_lambda {
            return invalid("min_lambda exceeds max_lambda".to_string());
        }
        if let Some(t) = self.timeout_secs {
            if !(t.is_finite() && t >= 0.0) {
                return invalid(format!("timeout_secs must be non-negative, got {}", t));
            }
        }
        if self.threads == Some(0) {
            return invalid("threads must be positive".to_string());
        }
        if !self.commands.is_empty() && !self.commands.iter().any(FitCommand::is_minimizer) {
            return invalid("the command list contains no minimization command".to_string());
        }
        Ok(())
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON; missing fields take their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::fitter::{FitCommand, FitConfig};
    /// use musrfit_rs::objective::FitStatistic;
    ///
    /// let config = FitConfig::from_json(
    ///     r#"{ "statistic": "max_likelihood", "commands": ["migrad", "hesse"] }"#,
    /// ).unwrap();
    /// assert_eq!(config.statistic, FitStatistic::MaxLikelihood);
    /// assert_eq!(config.commands, vec![FitCommand::Migrad, FitCommand::Hesse]);
    /// assert_eq!(config.max_iterations, 500);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FitConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
