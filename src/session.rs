//! The fit session: owns the parameter table and the blocks, runs the
//! command list and produces the result record.
//!
//! # Example
//!
//! ```
//! use musrfit_rs::block::DataBlock;
//! use musrfit_rs::fitter::{FitConfig, FitStatus};
//! use musrfit_rs::parameters::{Parameter, ParameterTable};
//! use musrfit_rs::session::FitSession;
//! use musrfit_rs::theory::TheoryExpression;
//!
//! let t: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
//! let y: Vec<f64> = t.iter().map(|&t| 0.25 * (-0.8 * t).exp()).collect();
//! let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2"]).unwrap();
//! let block = DataBlock::new("run 1", theory, t, y, vec![0.005; 50]).unwrap();
//!
//! let table = ParameterTable::from_parameters(vec![
//!     Parameter::new("Asy", 0.2, 0.01),
//!     Parameter::new("Rate", 1.0, 0.05),
//! ]).unwrap();
//!
//! let mut session = FitSession::builder(table)
//!     .block(block)
//!     .config(FitConfig::default())
//!     .build()
//!     .unwrap();
//! let result = session.fit().unwrap();
//! assert_eq!(result.status, FitStatus::Converged);
//! assert!((result.value_of("Rate").unwrap() - 0.8).abs() < 1e-6);
//! ```

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::Array1;
use serde::Serialize;

use crate::accel::{backend_for, BackendKind, Dispatcher, EvaluationBackend};
use crate::binding::FunctionTable;
use crate::block::{DataBlock, FitRange};
use crate::error::{MusrFitError, Result};
use crate::fitter::{
    hesse, Abort, CancelToken, ConvergenceStatus, FitCommand, FitConfig, FitProblem, FitState,
    FitStatus, LevenbergMarquardt, Minos, MinimizerResult, ParamId, RangeCommand, RunControl,
    Simplex, StateMachine, DEFAULT_SCAN_POINTS,
};
use crate::objective::{BlockStatistic, FitStatistic, Objective, ObjectiveValue};
use crate::parameters::ParameterTable;
use crate::theory::{TheoryFunction, TheoryRegistry};
use crate::uncertainty::{covariance_from_jacobian, to_external, ErrorEstimate, ErrorMethod};

/// Scan half-width in units of the parameter error (or step).
const SCAN_SIGMAS: f64 = 2.0;

/// Objective along one parameter, all others held at their current values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub parameter: String,
    pub values: Vec<f64>,
    /// NaN where the objective could not be evaluated
    pub objective: Vec<f64>,
}

impl ScanResult {
    /// The scanned value with the lowest objective.
    pub fn best(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .zip(&self.objective)
            .filter(|(_, f)| f.is_finite())
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&v, &f)| (v, f))
    }
}

/// Parameter values recorded by a `Save` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Zero-based position of the `Save` in the command list
    pub command: usize,
    pub values: Vec<f64>,
    pub objective: Option<f64>,
}

/// Outcome of [`FitSession::fit`].
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    /// Final table, including errors and MINOS errors
    pub parameters: ParameterTable,
    /// Symmetric error per parameter, in table order
    pub errors: Vec<Option<f64>>,
    /// χ² or −ln L (up to a constant) at the final parameters
    pub objective: f64,
    pub statistic: FitStatistic,
    /// Unmasked samples minus free parameters
    pub ndf: i64,
    pub per_block: Vec<BlockStatistic>,
    pub status: FitStatus,
    /// Why the fit failed or an error estimate degraded
    pub cause: Option<String>,
    pub error_estimate: Option<ErrorEstimate>,
    pub iterations: usize,
    pub func_evals: usize,
    pub scans: Vec<ScanResult>,
    pub snapshots: Vec<Snapshot>,
    /// Every driver state visited
    pub states: Vec<FitState>,
    /// Backend that evaluated the last objective
    pub backend: String,
    /// Set when the accelerated backend was abandoned
    pub backend_fallback: Option<String>,
}

impl FitResult {
    pub fn is_converged(&self) -> bool {
        self.status == FitStatus::Converged
    }

    /// Objective per degree of freedom; `None` when ndf ≤ 0.
    pub fn reduced_chi_square(&self) -> Option<f64> {
        (self.ndf > 0).then(|| self.objective / self.ndf as f64)
    }

    /// Covariance of the free parameters, when an estimate is available.
    pub fn covariance(&self) -> Option<&Vec<Vec<f64>>> {
        self.error_estimate.as_ref().map(|e| &e.covariance)
    }

    /// Final value of a parameter by name (case-insensitive).
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).map(|p| p.value())
    }

    /// Final error of a parameter by name (case-insensitive).
    pub fn error_of(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|p| p.error)
    }

    /// Serialize to a pretty-printed JSON string. Non-finite numbers are
    /// written as `null`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit result: {}", self.status)?;
        if let Some(cause) = &self.cause {
            writeln!(f, "  Cause: {}", cause)?;
        }
        let label = match self.statistic {
            FitStatistic::ChiSquare => "chisq",
            FitStatistic::MaxLikelihood => "maxLH",
        };
        write!(f, "  {} = {:.6}, NDF = {}", label, self.objective, self.ndf)?;
        if let Some(reduced) = self.reduced_chi_square() {
            write!(f, ", {}/NDF = {:.6}", label, reduced)?;
        }
        writeln!(f)?;
        for block in &self.per_block {
            writeln!(f, "  {:<16} {:.6} ({} points)", block.id, block.value, block.n_points)?;
        }
        for (i, param) in self.parameters.iter().enumerate() {
            write!(f, "  {:>3} {:<12} {:>14.6e}", i + 1, param.name, param.value())?;
            match (param.asymmetric_error, param.error) {
                (Some((neg, pos)), _) => write!(f, "  {:+.4e} {:+.4e}", neg, pos)?,
                (None, Some(err)) => write!(f, "  ± {:.4e}", err)?,
                (None, None) if param.fixed => write!(f, "  fixed")?,
                (None, None) => {}
            }
            writeln!(f)?;
        }
        writeln!(f, "  Iterations: {}, function evaluations: {}", self.iterations, self.func_evals)
    }
}

/// Assembles a [`FitSession`].
pub struct FitSessionBuilder {
    table: ParameterTable,
    blocks: Vec<DataBlock>,
    functions: FunctionTable,
    registry: TheoryRegistry,
    config: FitConfig,
    backend: Option<Arc<dyn EvaluationBackend>>,
}

impl FitSessionBuilder {
    pub fn new(table: ParameterTable) -> Self {
        Self {
            table,
            blocks: Vec::new(),
            functions: FunctionTable::new(),
            registry: TheoryRegistry::with_builtins(),
            config: FitConfig::default(),
            backend: None,
        }
    }

    pub fn block(mut self, block: DataBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn blocks(mut self, blocks: impl IntoIterator<Item = DataBlock>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    /// FUNCTIONS-block entries shared by all blocks.
    pub fn functions(mut self, functions: FunctionTable) -> Self {
        self.functions = functions;
        self
    }

    /// Replace the theory registry (the built-ins are registered by default).
    pub fn registry(mut self, registry: TheoryRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a user theory function.
    pub fn register(mut self, function: Arc<dyn TheoryFunction>) -> Result<Self> {
        self.registry.register(function)?;
        Ok(self)
    }

    pub fn config(mut self, config: FitConfig) -> Self {
        self.config = config;
        self
    }

    /// Evaluate blocks with a custom backend instead of `config.backend`.
    pub fn backend(mut self, backend: Arc<dyn EvaluationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validate the configuration and bind every block.
    ///
    /// # Errors
    ///
    /// Binding errors, invalid parameters (non-finite or out-of-bounds
    /// values, free parameters without a step) and command lists that
    /// reference unknown parameters or the wrong number of blocks.
    pub fn build(self) -> Result<FitSession> {
        self.config.validate()?;
        self.table.validate()?;
        if self.blocks.is_empty() {
            return Err(MusrFitError::InvalidConfig("no data blocks".to_string()));
        }
        validate_commands(&self.config.effective_commands(), &self.table, self.blocks.len())?;

        let dispatcher = match self.backend {
            Some(backend) => Dispatcher::new(backend, self.config.verification_policy()),
            None => dispatcher_for(&self.config),
        };
        let original_ranges = self.blocks.iter().map(|b| b.fit_range).collect();
        let objective = Objective::new(
            self.blocks,
            self.functions,
            &self.registry,
            self.table.len(),
            self.config.statistic,
            dispatcher,
        )?;

        Ok(FitSession {
            table: self.table,
            objective,
            config: self.config,
            original_ranges,
            cancel: CancelToken::new(),
        })
    }
}

fn dispatcher_for(config: &FitConfig) -> Dispatcher {
    let policy = config.verification_policy();
    match (config.backend, config.threads) {
        (BackendKind::Serial, _) => Dispatcher::serial(),
        #[cfg(feature = "parallel")]
        (BackendKind::Parallel, Some(threads)) => match crate::accel::RayonBackend::with_threads(threads) {
            Ok(backend) => Dispatcher::new(Arc::new(backend), policy),
            Err(e) => {
                warn!("{}; evaluating serially", e);
                Dispatcher::serial()
            }
        },
        (kind, _) => Dispatcher::new(backend_for(kind), policy),
    }
}

fn validate_commands(commands: &[FitCommand], table: &ParameterTable, n_blocks: usize) -> Result<()> {
    for command in commands {
        match command {
            FitCommand::Fix(ids) | FitCommand::Release(ids) => {
                for id in ids {
                    id.resolve(table)?;
                }
            }
            FitCommand::Scan { param, points, low, high } => {
                if let Some(id) = param {
                    id.resolve(table)?;
                }
                if *points < 2 {
                    return Err(MusrFitError::InvalidConfig(format!(
                        "SCAN needs at least 2 points, got {}",
                        points
                    )));
                }
                if let (Some(low), Some(high)) = (low, high) {
                    if !(low < high) {
                        return Err(MusrFitError::InvalidConfig(format!(
                            "SCAN range [{}, {}] is empty",
                            low, high
                        )));
                    }
                }
            }
            FitCommand::FitRange(RangeCommand::PerBlock(ranges)) if ranges.len() != n_blocks => {
                return Err(MusrFitError::InvalidConfig(format!(
                    "FIT_RANGE gives {} ranges for {} blocks",
                    ranges.len(),
                    n_blocks
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Accumulated state of one `fit()` call.
struct Run {
    machine: StateMachine,
    control: RunControl,
    iterations: usize,
    func_evals: usize,
    cause: Option<String>,
    error_estimate: Option<ErrorEstimate>,
    scans: Vec<ScanResult>,
    snapshots: Vec<Snapshot>,
    /// Stop processing further commands
    stop: bool,
}

impl Run {
    fn fail(&mut self, cause: String) -> Result<()> {
        warn!("fit failed: {}", cause);
        self.cause = Some(cause);
        self.stop = true;
        self.machine.transition(FitState::Failed)
    }
}

/// One fit request: parameter table, bound blocks and configuration.
pub struct FitSession {
    table: ParameterTable,
    objective: Objective,
    config: FitConfig,
    original_ranges: Vec<FitRange>,
    cancel: CancelToken,
}

impl FitSession {
    pub fn builder(table: ParameterTable) -> FitSessionBuilder {
        FitSessionBuilder::new(table)
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Token that aborts a running [`fit`](Self::fit) between iterations.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Unmasked samples minus free parameters.
    pub fn ndf(&self) -> i64 {
        self.objective.n_points() as i64 - self.table.n_free() as i64
    }

    /// Objective and per-block breakdown for an arbitrary full parameter
    /// vector (table order). The table is not modified.
    pub fn evaluate(&self, params: &[f64]) -> Result<ObjectiveValue> {
        self.objective.evaluate(params)
    }

    /// Prediction of block `block` at positions `xs`.
    pub fn theory_curve(&self, block: usize, params: &[f64], xs: &[f64]) -> Result<Vec<f64>> {
        self.objective.theory_curve(block, params, xs)
    }

    /// Run the command list.
    ///
    /// Runtime failures (non-convergence, evaluation failures, cancellation,
    /// timeout, a FIT_RANGE over invalid data) are reported in the result's
    /// status and cause; the last
    /// accepted parameters are kept in the table. `Err` is returned only
    /// for inconsistencies that should have been caught at setup.
    pub fn fit(&mut self) -> Result<FitResult> {
        let commands = self.config.effective_commands();
        info!(
            "starting fit: {} blocks, {} parameters ({} free), {:?}, {} commands",
            self.objective.n_blocks(),
            self.table.len(),
            self.table.n_free(),
            self.config.statistic,
            commands.len()
        );
        let mut run = Run {
            machine: StateMachine::new(),
            control: RunControl::new(self.cancel.clone(), self.config.timeout()),
            iterations: 0,
            func_evals: 0,
            cause: None,
            error_estimate: None,
            scans: Vec::new(),
            snapshots: Vec::new(),
            stop: false,
        };

        for (position, command) in commands.iter().enumerate() {
            if run.stop {
                break;
            }
            info!("command {}: {}", position + 1, command);
            match command {
                FitCommand::Migrad | FitCommand::Simplex | FitCommand::Minimize => {
                    minimize(&self.objective, &mut self.table, &self.config, command, &mut run)?;
                }
                FitCommand::Hesse => run_hesse(&self.objective, &mut self.table, &mut run)?,
                FitCommand::Minos => run_minos(&self.objective, &mut self.table, &self.config, &mut run)?,
                FitCommand::Fix(ids) => {
                    for id in ids {
                        let number = id.resolve(&self.table)?;
                        self.table.fix(number)?;
                    }
                    debug!("ndf = {}", self.ndf());
                }
                FitCommand::Release(ids) => {
                    for id in ids {
                        let number = id.resolve(&self.table)?;
                        self.table.release(number)?;
                    }
                    debug!("ndf = {}", self.ndf());
                }
                FitCommand::Restore => {
                    let released = self.table.restore_all();
                    debug!("released {} parameters, ndf = {}", released, self.ndf());
                }
                FitCommand::FitRange(range) => match self.apply_fit_range(range) {
                    Ok(()) => debug!("ndf = {}", self.ndf()),
                    Err(e) => run.fail(format!("FIT_RANGE failed: {}", e))?,
                },
                FitCommand::Scan { param, points, low, high } => {
                    self.scan(param.as_ref(), *points, *low, *high, &mut run)?;
                }
                FitCommand::Save => {
                    let values = self.table.snapshot();
                    let objective = self.objective.value(&values).ok();
                    run.snapshots.push(Snapshot {
                        command: position,
                        values,
                        objective,
                    });
                }
            }
        }

        if run.machine.state() == FitState::Initialized {
            run.machine.transition(FitState::Failed)?;
        }
        run.machine.transition(FitState::Done)?;
        Ok(self.result(run))
    }

    /// Re-range every block at once; a window over invalid data leaves all
    /// blocks as they were.
    fn apply_fit_range(&mut self, range: &RangeCommand) -> Result<()> {
        let ranges = match range {
            RangeCommand::Reset => self.original_ranges.clone(),
            RangeCommand::All(range) => vec![*range; self.objective.n_blocks()],
            RangeCommand::PerBlock(ranges) => ranges.clone(),
        };
        self.objective.set_fit_ranges(&ranges)
    }

    fn scan(
        &self,
        param: Option<&ParamId>,
        points: usize,
        low: Option<f64>,
        high: Option<f64>,
        run: &mut Run,
    ) -> Result<()> {
        let indices = match param {
            Some(id) => vec![id.resolve(&self.table)? - 1],
            None => self.table.free_indices(),
        };
        let points = if points < 2 { DEFAULT_SCAN_POINTS } else { points };
        let base = self.table.snapshot();
        for index in indices {
            let param = &self.table.parameters()[index];
            let width = SCAN_SIGMAS * param.error.unwrap_or(param.step).abs();
            let bounds = param.bounds();
            let low = low.unwrap_or_else(|| bounds.clamp(param.value() - width));
            let high = high.unwrap_or_else(|| bounds.clamp(param.value() + width));
            let mut values = Vec::with_capacity(points);
            let mut objective = Vec::with_capacity(points);
            for k in 0..points {
                if let Err(abort) = run.control.check() {
                    warn!("scan of {} aborted: {}", param.name, abort);
                    run.cause = Some(abort.to_string());
                    run.stop = true;
                    break;
                }
                let v = low + (high - low) * k as f64 / (points - 1) as f64;
                let mut trial = base.clone();
                trial[index] = v;
                let f = match self.objective.value(&trial) {
                    Ok(f) => f,
                    Err(MusrFitError::Evaluation(e)) => {
                        debug!("scan point {} = {} not evaluable: {}", param.name, v, e);
                        f64::NAN
                    }
                    Err(e) => return Err(e),
                };
                values.push(v);
                objective.push(f);
            }
            run.func_evals += values.len();
            run.scans.push(ScanResult {
                parameter: param.name.clone(),
                values,
                objective,
            });
            if run.stop {
                break;
            }
        }
        Ok(())
    }

    fn result(&self, run: Run) -> FitResult {
        let snapshot = self.table.snapshot();
        let (objective, per_block, mut cause) = match self.objective.evaluate(&snapshot) {
            Ok(value) => (value.total, value.per_block, run.cause),
            Err(e) => {
                warn!("final parameters cannot be evaluated: {}", e);
                (f64::NAN, Vec::new(), run.cause.or(Some(e.to_string())))
            }
        };
        let dispatcher = self.objective.dispatcher();
        let backend_fallback = dispatcher.last_error().map(|e| e.to_string());
        if cause.is_none() && run.machine.status() == FitStatus::Failed {
            cause = Some("no minimization completed".to_string());
        }
        let result = FitResult {
            errors: self.table.iter().map(|p| p.error).collect(),
            parameters: self.table.clone(),
            objective,
            statistic: self.objective.statistic(),
            ndf: self.ndf(),
            per_block,
            status: run.machine.status(),
            cause,
            error_estimate: run.error_estimate,
            iterations: run.iterations,
            func_evals: run.func_evals,
            scans: run.scans,
            snapshots: run.snapshots,
            states: run.machine.history().to_vec(),
            backend: dispatcher.active_backend().to_string(),
            backend_fallback,
        };
        info!(
            "fit finished: {}, objective = {:.6}, ndf = {}",
            result.status, result.objective, result.ndf
        );
        result
    }
}

/// Run one minimization command and, after convergence, the automatic
/// error estimate.
fn minimize(
    objective: &Objective,
    table: &mut ParameterTable,
    config: &FitConfig,
    command: &FitCommand,
    run: &mut Run,
) -> Result<()> {
    run.machine.transition(FitState::Iterating)?;
    let problem = FitProblem::new(objective, table)?;
    let lm = LevenbergMarquardt::from_config(config);
    let simplex = Simplex::new(
        config.simplex_tolerance * objective.up(),
        config.max_iterations,
        config.max_eval_failures,
    );
    let run_simplex = |start: Array1<f64>| {
        simplex.minimize(|x| problem.value(x), start, problem.internal_steps(), &run.control)
    };

    let result: MinimizerResult = match command {
        FitCommand::Simplex => run_simplex(problem.start().clone())?,
        FitCommand::Minimize => {
            let first = lm.minimize(&problem, problem.start().clone(), &run.control)?;
            if first.status.is_converged()
                || matches!(first.status, ConvergenceStatus::Cancelled | ConvergenceStatus::TimedOut)
            {
                first
            } else {
                warn!("migrad did not converge ({}), trying simplex", first.message);
                let start = if first.cost.is_finite() {
                    first.params.clone()
                } else {
                    problem.start().clone()
                };
                let mut second = run_simplex(start)?;
                second.iterations += first.iterations;
                second.func_evals += first.func_evals;
                second
            }
        }
        _ => lm.minimize(&problem, problem.start().clone(), &run.control)?,
    };
    run.iterations += result.iterations;
    run.func_evals += result.func_evals;
    info!("{}: {}", command.name(), result.message);

    if result.cost.is_finite() {
        table.update_free(problem.free(), &problem.free_values(&result.params))?;
    }

    let state = result.status.fit_state();
    if state == FitState::Failed {
        let cause = match result.status {
            ConvergenceStatus::Cancelled => Abort::Cancelled.to_string(),
            ConvergenceStatus::TimedOut => Abort::TimedOut.to_string(),
            _ => result.message.clone(),
        };
        return run.fail(cause);
    }
    run.machine.transition(state)?;
    if state == FitState::MaxIterationsExceeded {
        warn!("{}", result.message);
        run.cause = Some(result.message.clone());
        return Ok(());
    }
    run.cause = None;

    if config.skip_error_estimation {
        return Ok(());
    }
    let estimate = match &result.jacobian {
        Some(jacobian) => covariance_from_jacobian(jacobian).map(|cov| {
            let cov = to_external(&cov, &problem.derivatives(&result.params));
            ErrorEstimate::from_covariance(ErrorMethod::Curvature, problem.names().to_vec(), &cov)
        }),
        None => hesse(&problem, &result.params).map(|h| {
            run.func_evals += h.func_evals;
            ErrorEstimate::from_covariance(ErrorMethod::Hesse, problem.names().to_vec(), &h.covariance)
        }),
    };
    store_estimate(table, problem.free(), estimate, run)
}

/// Record an error estimate (or why it is unavailable) and enter
/// `ErrorEstimation`.
fn store_estimate(
    table: &mut ParameterTable,
    free: &[usize],
    estimate: Result<ErrorEstimate>,
    run: &mut Run,
) -> Result<()> {
    match estimate {
        Ok(estimate) => {
            let mut errors = vec![None; table.len()];
            for (&i, &e) in free.iter().zip(&estimate.errors) {
                errors[i] = e.is_finite().then_some(e);
            }
            table.set_errors(&errors);
            debug!("{:?} errors: {:?}", estimate.method, estimate.errors);
            run.error_estimate = Some(estimate);
        }
        Err(e) => {
            warn!("error estimation failed, errors unavailable: {}", e);
            run.cause = Some(format!("error estimation failed: {}", e));
        }
    }
    run.machine.transition(FitState::ErrorEstimation)
}

fn run_hesse(objective: &Objective, table: &mut ParameterTable, run: &mut Run) -> Result<()> {
    if !run.machine.at_minimum() {
        warn!("HESSE skipped: no converged minimum ({})", run.machine.state());
        return Ok(());
    }
    let problem = FitProblem::new(objective, table)?;
    let estimate = hesse(&problem, problem.start()).map(|h| {
        run.func_evals += h.func_evals;
        ErrorEstimate::from_covariance(ErrorMethod::Hesse, problem.names().to_vec(), &h.covariance)
    });
    let free = problem.free().to_vec();
    store_estimate(table, &free, estimate, run)
}

fn run_minos(
    objective: &Objective,
    table: &mut ParameterTable,
    config: &FitConfig,
    run: &mut Run,
) -> Result<()> {
    if !run.machine.at_minimum() {
        warn!("MINOS skipped: no converged minimum ({})", run.machine.state());
        return Ok(());
    }
    let f_min = match objective.value(&table.snapshot()) {
        Ok(f) => f,
        Err(e) => {
            warn!("MINOS skipped: {}", e);
            return Ok(());
        }
    };
    let lm = LevenbergMarquardt::from_config(config);
    let mut minos = Minos::new(objective, table, f_min, &lm, &run.control);
    let outcome = minos.run();
    run.func_evals += minos.func_evals();
    match outcome {
        Ok(errors) => {
            for (index, error) in errors {
                table.set_asymmetric_error(index, error.map(|e| (e.lower, e.upper)));
            }
        }
        Err(MusrFitError::Cancelled) => {
            let cause = run
                .control
                .check()
                .err()
                .unwrap_or(Abort::Cancelled)
                .to_string();
            warn!("MINOS aborted: {}", cause);
            run.cause = Some(cause);
            run.stop = true;
            return Ok(());
        }
        Err(e) => {
            warn!("MINOS failed: {}", e);
            run.cause = Some(format!("MINOS failed: {}", e));
        }
    }
    run.machine.transition(FitState::ErrorEstimation)
}
