//! The global objective: sum of per-block statistics over all blocks.
//!
//! Each evaluation takes an immutable parameter snapshot, prepares every
//! block serially (FUNCTIONS, argument gathering, global parts), evaluates
//! the blocks through the [`Dispatcher`] and sums the block values in block
//! order, so the total does not depend on the backend's scheduling.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::accel::Dispatcher;
use crate::binding::FunctionTable;
use crate::block::{BlockInputs, DataBlock, EvaluationError, FitRange, PreparedBlock};
use crate::error::{MusrFitError, Result};
use crate::theory::TheoryRegistry;

/// Statistic minimized by the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatistic {
    /// Σ((y - f)/σ)²
    #[default]
    ChiSquare,
    /// Poisson negative log-likelihood (histogram blocks)
    MaxLikelihood,
}

impl FitStatistic {
    /// Change of the objective that defines a one-sigma error.
    pub fn up(&self) -> f64 {
        match self {
            FitStatistic::ChiSquare => 1.0,
            FitStatistic::MaxLikelihood => 0.5,
        }
    }
}

/// Contribution of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStatistic {
    pub id: String,
    pub value: f64,
    pub n_points: usize,
}

/// Result of one objective evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveValue {
    /// Sum of the block values, in block order
    pub total: f64,
    pub per_block: Vec<BlockStatistic>,
    /// Samples inside the fit ranges
    pub n_points: usize,
    /// Per-block residuals, full sample length, zero outside the fit range
    pub residuals: Vec<Vec<f64>>,
}

impl ObjectiveValue {
    /// All residuals concatenated in block order.
    pub fn flat_residuals(&self) -> Vec<f64> {
        self.residuals.iter().flatten().copied().collect()
    }
}

/// Objective over a set of blocks sharing one parameter table.
#[derive(Debug)]
pub struct Objective {
    blocks: Vec<PreparedBlock>,
    functions: FunctionTable,
    statistic: FitStatistic,
    dispatcher: Dispatcher,
    n_params: usize,
    evaluations: AtomicUsize,
}

impl Objective {
    /// Bind all blocks. Every reference is resolved here; a failure names
    /// the block and the offending index.
    pub fn new(
        blocks: Vec<DataBlock>,
        functions: FunctionTable,
        registry: &TheoryRegistry,
        n_params: usize,
        statistic: FitStatistic,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        let mut ids = std::collections::HashSet::new();
        for block in &blocks {
            if !ids.insert(block.id.as_str()) {
                return Err(MusrFitError::InvalidConfig(format!(
                    "duplicate block id '{}'",
                    block.id
                )));
            }
        }
        let blocks = blocks
            .into_iter()
            .map(|block| PreparedBlock::new(block, registry, &functions, n_params, statistic))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            blocks,
            functions,
            statistic,
            dispatcher,
            n_params,
            evaluations: AtomicUsize::new(0),
        })
    }

    /// Evaluate at a full parameter vector (fixed and free, table order).
    ///
    /// # Errors
    ///
    /// [`EvaluationError`] when a FUNCTIONS entry fails or a prediction is
    /// not finite; `DimensionMismatch` for a vector of the wrong length.
    pub fn evaluate(&self, params: &[f64]) -> Result<ObjectiveValue> {
        self.check_len(params)?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);

        let inputs = self
            .blocks
            .iter()
            .map(|block| block.prepare(params, &self.functions))
            .collect::<std::result::Result<Vec<BlockInputs>, EvaluationError>>()?;
        let outputs = self.dispatcher.evaluate(&self.blocks, &inputs);

        let mut total = 0.0;
        let mut n_points = 0;
        let mut per_block = Vec::with_capacity(outputs.len());
        let mut residuals = Vec::with_capacity(outputs.len());
        for (block, output) in self.blocks.iter().zip(outputs) {
            if let Some((x, value)) = output.non_finite {
                return Err(EvaluationError::NonFinite {
                    block: block.id().to_string(),
                    x,
                    value,
                }
                .into());
            }
            total += output.value;
            n_points += output.n_points;
            per_block.push(BlockStatistic {
                id: block.id().to_string(),
                value: output.value,
                n_points: output.n_points,
            });
            residuals.push(output.residuals);
        }

        Ok(ObjectiveValue {
            total,
            per_block,
            n_points,
            residuals,
        })
    }

    /// Total objective only.
    pub fn value(&self, params: &[f64]) -> Result<f64> {
        Ok(self.evaluate(params)?.total)
    }

    fn check_len(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.n_params {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} parameter values, got {}",
                self.n_params,
                params.len()
            )));
        }
        Ok(())
    }

    /// Predicted values of block `block` at `xs`.
    pub fn theory_curve(&self, block: usize, params: &[f64], xs: &[f64]) -> Result<Vec<f64>> {
        self.check_len(params)?;
        let prepared = self.blocks.get(block).ok_or_else(|| {
            MusrFitError::InvalidConfig(format!(
                "block index {} out of range ({} blocks)",
                block,
                self.blocks.len()
            ))
        })?;
        Ok(prepared.theory_curve(params, &self.functions, xs)?)
    }

    /// Set the fit range of one block, or of all blocks when `block` is `None`.
    pub fn set_fit_range(&mut self, block: Option<usize>, range: FitRange) -> Result<()> {
        match block {
            Some(i) => {
                let n = self.blocks.len();
                let prepared = self.blocks.get_mut(i).ok_or_else(|| {
                    MusrFitError::InvalidConfig(format!("block index {} out of range ({} blocks)", i, n))
                })?;
                prepared.set_fit_range(range)?;
            }
            None => {
                let ranges = vec![range; self.blocks.len()];
                self.set_fit_ranges(&ranges)?;
            }
        }
        Ok(())
    }

    /// Set the fit range of every block, one range per block in block order.
    ///
    /// All new windows are checked first; on error no block is changed.
    pub fn set_fit_ranges(&mut self, ranges: &[FitRange]) -> Result<()> {
        if ranges.len() != self.blocks.len() {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} fit ranges, got {}",
                self.blocks.len(),
                ranges.len()
            )));
        }
        for (prepared, range) in self.blocks.iter().zip(ranges) {
            prepared.check_fit_range(range)?;
        }
        for (prepared, &range) in self.blocks.iter_mut().zip(ranges) {
            prepared.set_fit_range(range)?;
        }
        Ok(())
    }

    pub fn blocks(&self) -> &[PreparedBlock] {
        &self.blocks
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Samples inside the fit ranges of all blocks.
    pub fn n_points(&self) -> usize {
        self.blocks.iter().map(PreparedBlock::n_fitted).sum()
    }

    /// Length of the concatenated residual vector.
    pub fn n_residuals(&self) -> usize {
        self.blocks.iter().map(|b| b.data().len()).sum()
    }

    pub fn statistic(&self) -> FitStatistic {
        self.statistic
    }

    pub fn up(&self) -> f64 {
        self.statistic.up()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}
