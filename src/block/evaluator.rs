//! Per-block evaluation.
//!
//! A [`PreparedBlock`] is a [`DataBlock`] with its theory compiled against
//! the parameter table, map and FUNCTIONS. Evaluation runs in two phases:
//!
//! 1. [`PreparedBlock::prepare`] (serial): evaluate FUNCTIONS, gather leaf
//!    arguments and refresh the global parts.
//! 2. [`PreparedBlock::evaluate`] (may run concurrently with other blocks):
//!    predict every in-range sample and accumulate the statistic.
//!
//! Phase 2 takes `&self` and the inputs of phase 1 only, so blocks never
//! share mutable state while they are evaluated.

use log::warn;
use statrs::function::gamma::ln_gamma;

use crate::binding::{BindingContext, CompiledTheory, FunctionTable, ParamRef, Source};
use crate::block::{BlockKind, DataBlock, EvaluationError, FitRange};
use crate::error::Result;
use crate::objective::FitStatistic;
use crate::theory::{GlobalPart, GlobalPartCache, TheoryRegistry, MUON_LIFETIME};

/// Floor applied to measured counts in the Poisson likelihood.
const MIN_COUNTS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
enum Scalars {
    None,
    Histogram {
        norm: Source,
        background: Source,
        lifetime: Source,
    },
    Asymmetry {
        alpha: Source,
        beta: Source,
    },
}

impl Scalars {
    fn values(&self, params: &[f64], functions: &[f64]) -> [f64; 3] {
        match self {
            Scalars::None => [0.0; 3],
            Scalars::Histogram {
                norm,
                background,
                lifetime,
            } => [
                norm.value(params, functions),
                background.value(params, functions),
                lifetime.value(params, functions),
            ],
            Scalars::Asymmetry { alpha, beta } => [
                alpha.value(params, functions),
                beta.value(params, functions),
                0.0,
            ],
        }
    }

    fn sources(&self) -> Vec<Source> {
        match *self {
            Scalars::None => Vec::new(),
            Scalars::Histogram {
                norm,
                background,
                lifetime,
            } => vec![norm, background, lifetime],
            Scalars::Asymmetry { alpha, beta } => vec![alpha, beta],
        }
    }
}

/// Values computed serially before a block is evaluated.
#[derive(Debug, Clone)]
pub struct BlockInputs {
    args: Vec<f64>,
    globals: Vec<Option<GlobalPart>>,
    scalars: [f64; 3],
}

impl BlockInputs {
    /// Resolved arguments of all theory leaves, leaf after leaf.
    pub fn args(&self) -> &[f64] {
        &self.args
    }
}

/// Result of evaluating one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutput {
    /// χ² or negative log-likelihood of the block
    pub value: f64,
    /// One entry per sample; zero outside the fit range
    pub residuals: Vec<f64>,
    /// Samples inside the fit range
    pub n_points: usize,
    /// First sample (x, predicted) where the prediction was not finite
    pub non_finite: Option<(f64, f64)>,
}

/// A data block bound to a parameter table and ready for evaluation.
#[derive(Debug)]
pub struct PreparedBlock {
    data: DataBlock,
    theory: CompiledTheory,
    scalars: Scalars,
    functions_used: Vec<usize>,
    statistic: FitStatistic,
    ln_gamma_counts: Vec<f64>,
    cache: GlobalPartCache,
}

impl PreparedBlock {
    /// Bind `data` for a table of `n_params` parameters.
    ///
    /// The maximum-likelihood statistic applies to histogram blocks only;
    /// other kinds fall back to χ² with a warning.
    ///
    /// # Errors
    ///
    /// [`BindingError`](crate::binding::BindingError)s tagged with the block
    /// id, or an [`EvaluationError`] for unusable data in the fit range.
    pub fn new(
        data: DataBlock,
        registry: &TheoryRegistry,
        functions: &FunctionTable,
        n_params: usize,
        statistic: FitStatistic,
    ) -> Result<Self> {
        let ctx = BindingContext::new(n_params, &data.map, functions);
        let theory =
            CompiledTheory::compile(&data.theory, registry, &ctx).map_err(|e| e.in_block(&data.id))?;

        let resolve = |reference: ParamRef, default: Option<f64>, what: &str| {
            ctx.resolve(reference, default, what, 0)
                .map_err(|e| e.in_block(&data.id))
        };
        let scalars = match data.kind {
            BlockKind::Generic => Scalars::None,
            BlockKind::SingleHistogram {
                norm,
                background,
                lifetime,
            } => Scalars::Histogram {
                norm: resolve(norm, None, "norm")?,
                background: resolve(background, Some(0.0), "background")?,
                lifetime: resolve(lifetime, Some(MUON_LIFETIME), "lifetime")?,
            },
            BlockKind::Asymmetry { alpha, beta } => Scalars::Asymmetry {
                alpha: resolve(alpha, Some(1.0), "alpha")?,
                beta: resolve(beta, Some(1.0), "beta")?,
            },
        };

        let statistic = match statistic {
            FitStatistic::MaxLikelihood if !data.kind.is_histogram() => {
                warn!(
                    "block '{}': maximum likelihood needs histogram data, using chi-square",
                    data.id
                );
                FitStatistic::ChiSquare
            }
            other => other,
        };

        let mut functions_used: Vec<usize> = theory.functions_used().to_vec();
        functions_used.extend(scalars.sources().iter().filter_map(|s| match s {
            Source::Function(i) => Some(i + 1),
            _ => None,
        }));
        functions_used.sort_unstable();
        functions_used.dedup();

        let ln_gamma_counts = match statistic {
            FitStatistic::MaxLikelihood => data
                .y
                .iter()
                .map(|&d| ln_gamma(d.max(MIN_COUNTS) + 1.0))
                .collect(),
            FitStatistic::ChiSquare => Vec::new(),
        };

        let cache = GlobalPartCache::new(theory.leaves().len());
        let block = Self {
            data,
            theory,
            scalars,
            functions_used,
            statistic,
            ln_gamma_counts,
            cache,
        };
        block.check_fit_range(&block.data.fit_range)?;
        Ok(block)
    }

    /// Check the data inside `range` without changing the block.
    pub fn check_fit_range(&self, range: &FitRange) -> std::result::Result<(), EvaluationError> {
        let data = &self.data;
        for i in 0..data.len() {
            if !range.contains(data.x[i]) {
                continue;
            }
            let reason = if !data.y[i].is_finite() {
                Some("measured value is not finite")
            } else if self.statistic == FitStatistic::ChiSquare
                && !(data.sigma[i] > 0.0 && data.sigma[i].is_finite())
            {
                Some("sigma must be positive and finite")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(EvaluationError::InvalidData {
                    block: data.id.clone(),
                    index: i,
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn data(&self) -> &DataBlock {
        &self.data
    }

    /// Statistic actually used for this block.
    pub fn statistic(&self) -> FitStatistic {
        self.statistic
    }

    pub fn n_fitted(&self) -> usize {
        self.data.n_in_range()
    }

    pub fn global_part_recomputations(&self) -> usize {
        self.cache.recompute_count()
    }

    /// Change the fit range; the data inside the new range is re-checked.
    pub fn set_fit_range(&mut self, range: FitRange) -> std::result::Result<(), EvaluationError> {
        self.check_fit_range(&range)?;
        self.data.fit_range = range;
        Ok(())
    }

    /// Serial phase: everything that depends on parameters only.
    pub fn prepare(
        &self,
        params: &[f64],
        functions: &FunctionTable,
    ) -> std::result::Result<BlockInputs, EvaluationError> {
        let mut fn_values = Vec::new();
        functions
            .evaluate_into(&self.functions_used, params, &self.data.map, &mut fn_values)
            .map_err(|failure| EvaluationError::Function {
                block: self.data.id.clone(),
                number: failure.number,
                source: failure.source,
            })?;
        let mut args = Vec::new();
        self.theory.resolve_into(params, &fn_values, &mut args);
        let globals = self.theory.refresh_global_parts(&args, &self.cache);
        Ok(BlockInputs {
            args,
            globals,
            scalars: self.scalars.values(params, &fn_values),
        })
    }

    /// Predicted measured value at `x`.
    pub fn predict(&self, x: f64, inputs: &BlockInputs) -> f64 {
        let a = self.theory.evaluate(x, &inputs.args, &inputs.globals);
        match self.scalars {
            Scalars::None => a,
            Scalars::Histogram { .. } => {
                let [n0, background, tau] = inputs.scalars;
                n0 * (-x / tau).exp() * (1.0 + a) + background
            }
            Scalars::Asymmetry { .. } => {
                let [alpha, beta, _] = inputs.scalars;
                corrected_asymmetry(a, alpha, beta)
            }
        }
    }

    /// Parallel-safe phase: predictions, residuals and the block statistic.
    pub fn evaluate(&self, inputs: &BlockInputs) -> BlockOutput {
        let data = &self.data;
        let mut residuals = vec![0.0; data.len()];
        let mut value = 0.0;
        let mut n_points = 0;
        let mut non_finite = None;

        for i in 0..data.len() {
            let x = data.x[i];
            if !data.fit_range.contains(x) {
                continue;
            }
            n_points += 1;
            let predicted = self.predict(x, inputs);
            let (term, residual) = match self.statistic {
                FitStatistic::ChiSquare => {
                    let r = (data.y[i] - predicted) / data.sigma[i];
                    (r * r, r)
                }
                FitStatistic::MaxLikelihood => {
                    let d = data.y[i].max(MIN_COUNTS);
                    let term = predicted - d * predicted.ln() + self.ln_gamma_counts[i];
                    (term, deviance_residual(d, predicted))
                }
            };
            if !(predicted.is_finite() && term.is_finite() && residual.is_finite()) {
                non_finite.get_or_insert((x, predicted));
                residuals[i] = f64::NAN;
                continue;
            }
            value += term;
            residuals[i] = residual;
        }

        BlockOutput {
            value: if non_finite.is_some() { f64::NAN } else { value },
            residuals,
            n_points,
            non_finite,
        }
    }

    /// Predicted values at arbitrary `xs` for the given parameter values.
    pub fn theory_curve(
        &self,
        params: &[f64],
        functions: &FunctionTable,
        xs: &[f64],
    ) -> std::result::Result<Vec<f64>, EvaluationError> {
        let inputs = self.prepare(params, functions)?;
        Ok(xs.iter().map(|&x| self.predict(x, &inputs)).collect())
    }
}

/// Asymmetry corrected for detector efficiency (α) and asymmetry (β) ratios.
pub fn corrected_asymmetry(a: f64, alpha: f64, beta: f64) -> f64 {
    (a * (alpha * beta + 1.0) - (alpha - 1.0)) / ((alpha + 1.0) - a * (alpha * beta - 1.0))
}

/// Signed Poisson deviance residual; its square sums to twice the
/// likelihood-ratio statistic.
fn deviance_residual(d: f64, theta: f64) -> f64 {
    let deviance = 2.0 * (theta - d + d * (d / theta).ln());
    (d - theta).signum() * deviance.max(0.0).sqrt()
}
