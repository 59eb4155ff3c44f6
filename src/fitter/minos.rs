//! Asymmetric errors by profiling the objective (the `Minos` command).
//!
//! For each free parameter the objective is minimized over all other free
//! parameters with that one held at trial values, and the two values where
//! the profile crosses `F_min + up` are located. Parameter bounds cap the
//! search; a crossing beyond a bound is reported as the distance to it.

use log::{debug, warn};

use crate::error::{MusrFitError, Result};
use crate::fitter::convergence::ConvergenceStatus;
use crate::fitter::migrad::LevenbergMarquardt;
use crate::fitter::problem::FitProblem;
use crate::fitter::state::RunControl;
use crate::objective::Objective;
use crate::parameters::ParameterTable;

const MAX_EXPANSIONS: usize = 8;
const MAX_REFINEMENTS: usize = 20;
/// Crossing accuracy, in units of "up".
const CROSSING_TOLERANCE: f64 = 0.01;

/// MINOS errors of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MinosError {
    /// Zero-based table index
    pub index: usize,
    pub name: String,
    /// Negative error (≤ 0)
    pub lower: f64,
    /// Positive error (≥ 0)
    pub upper: f64,
    pub lower_at_limit: bool,
    pub upper_at_limit: bool,
}

/// Profile-likelihood error search over every free parameter.
pub struct Minos<'a> {
    objective: &'a Objective,
    table: &'a ParameterTable,
    f_min: f64,
    minimizer: &'a LevenbergMarquardt,
    control: &'a RunControl,
    func_evals: usize,
}

impl<'a> Minos<'a> {
    /// `table` must hold the minimum (values and symmetric errors) and
    /// `f_min` the objective there.
    pub fn new(
        objective: &'a Objective,
        table: &'a ParameterTable,
        f_min: f64,
        minimizer: &'a LevenbergMarquardt,
        control: &'a RunControl,
    ) -> Self {
        Self {
            objective,
            table,
            f_min,
            minimizer,
            control,
            func_evals: 0,
        }
    }

    pub fn func_evals(&self) -> usize {
        self.func_evals
    }

    /// Errors of all free parameters; `None` where no crossing was found.
    pub fn run(&mut self) -> Result<Vec<(usize, Option<MinosError>)>> {
        self.table
            .free_indices()
            .into_iter()
            .map(|index| Ok((index, self.errors_of(index)?)))
            .collect()
    }

    /// Objective minimized over the other free parameters with parameter
    /// `index` held at `value`.
    fn profile(&mut self, index: usize, value: f64) -> Result<f64> {
        let mut table = self.table.clone();
        let name = table.parameters()[index].name.clone();
        if let Some(param) = table.get_mut(&name) {
            param.set_value(value)?;
            param.fixed = true;
        }
        let problem = FitProblem::new(self.objective, &table)?;
        let result = self
            .minimizer
            .minimize(&problem, problem.start().clone(), self.control)?;
        self.func_evals += result.func_evals;
        if matches!(
            result.status,
            ConvergenceStatus::Cancelled | ConvergenceStatus::TimedOut
        ) {
            return Err(MusrFitError::Cancelled);
        }
        problem.value(&result.params)
    }

    /// Offset from the minimum where the profile reaches `F_min + up`,
    /// searching in `direction` (±1). The flag is set when the search
    /// stopped at a bound.
    fn crossing(&mut self, index: usize, direction: f64) -> Result<Option<(f64, bool)>> {
        let table = self.table;
        let param = &table.parameters()[index];
        let (v0, bounds) = (param.value(), param.bounds());
        let sigma = param
            .error
            .filter(|e| *e > 0.0 && e.is_finite())
            .unwrap_or(param.step.abs());
        if !(sigma > 0.0) {
            return Ok(None);
        }
        let up = self.objective.up();
        let f_min = self.f_min;
        let g = |minos: &mut Self, v: f64| -> Result<f64> {
            Ok(minos.profile(index, v)? - f_min - up)
        };

        // Bracket the crossing.
        let mut lo = (v0, -up);
        let mut hi = None;
        let mut offset = sigma;
        for _ in 0..MAX_EXPANSIONS {
            let v = bounds.clamp(v0 + direction * offset);
            let gv = g(self, v)?;
            if gv >= 0.0 {
                hi = Some((v, gv));
                break;
            }
            lo = (v, gv);
            if v != v0 + direction * offset {
                debug!("minos: parameter {} reached its limit at {}", param.name, v);
                return Ok(Some((v - v0, true)));
            }
            offset *= 2.0;
        }
        let Some(mut hi) = hi else {
            return Ok(None);
        };

        // Illinois regula falsi inside the bracket.
        let mut side = 0;
        for _ in 0..MAX_REFINEMENTS {
            let v = lo.0 - lo.1 * (hi.0 - lo.0) / (hi.1 - lo.1);
            let gv = g(self, v)?;
            if gv.abs() < CROSSING_TOLERANCE * up {
                return Ok(Some((v - v0, false)));
            }
            if gv < 0.0 {
                lo = (v, gv);
                if side == -1 {
                    hi.1 *= 0.5;
                }
                side = -1;
            } else {
                hi = (v, gv);
                if side == 1 {
                    lo.1 *= 0.5;
                }
                side = 1;
            }
        }
        let v = lo.0 - lo.1 * (hi.0 - lo.0) / (hi.1 - lo.1);
        Ok(Some((v - v0, false)))
    }

    fn errors_of(&mut self, index: usize) -> Result<Option<MinosError>> {
        let name = self.table.parameters()[index].name.clone();
        let lower = self.crossing(index, -1.0)?;
        let upper = self.crossing(index, 1.0)?;
        match (lower, upper) {
            (Some((lower, lower_at_limit)), Some((upper, upper_at_limit))) => {
                debug!("minos {}: {:+.4e} / {:+.4e}", name, lower, upper);
                Ok(Some(MinosError {
                    index,
                    name,
                    lower: lower.min(0.0),
                    upper: upper.max(0.0),
                    lower_at_limit,
                    upper_at_limit,
                }))
            }
            _ => {
                warn!("minos: no crossing found for parameter {}", name);
                Ok(None)
            }
        }
    }
}
