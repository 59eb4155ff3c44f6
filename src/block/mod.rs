//! # Data Blocks
//!
//! A data block is one measured data set (a run, histogram or detector
//! group) together with the theory that describes it and the map that
//! connects the theory's `mapN` references to parameters.
//!
//! ## Block kinds
//!
//! - [`BlockKind::Generic`]: predicted value is the theory itself
//! - [`BlockKind::SingleHistogram`]: `N0·exp(-t/τ)·(1 + A(t)) + B`
//! - [`BlockKind::Asymmetry`]: asymmetry with α/β detector corrections
//!
//! Blocks are immutable during a fit; only the fit range may be changed
//! between minimization commands.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binding::{MapEntry, ParamRef};
use crate::parameters::expression::ExpressionError;
use crate::theory::TheoryExpression;

pub mod evaluator;

pub use evaluator::{BlockInputs, BlockOutput, PreparedBlock};

/// Errors raised while checking block data or evaluating a block
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Block '{block}': theory is not finite at x = {x} (value {value})")]
    NonFinite { block: String, x: f64, value: f64 },

    #[error("Block '{block}': FUNCTIONS entry fun{number} failed: {source}")]
    Function {
        block: String,
        number: usize,
        #[source]
        source: ExpressionError,
    },

    #[error("Block '{block}': x, y and sigma lengths differ ({x}, {y}, {sigma})")]
    LengthMismatch {
        block: String,
        x: usize,
        y: usize,
        sigma: usize,
    },

    #[error("Block '{block}': invalid data at index {index}: {reason}")]
    InvalidData {
        block: String,
        index: usize,
        reason: String,
    },

    #[error("Invalid fit range [{start}, {end}]")]
    InvalidFitRange { start: f64, end: f64 },
}

/// Inclusive x range of the samples that enter the objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRange {
    pub start: f64,
    pub end: f64,
}

impl FitRange {
    pub fn new(start: f64, end: f64) -> Result<Self, EvaluationError> {
        if start.is_nan() || end.is_nan() || start > end {
            return Err(EvaluationError::InvalidFitRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The whole data set.
    pub fn full() -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
        }
    }

    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.start && x <= self.end
    }
}

impl Default for FitRange {
    fn default() -> Self {
        Self::full()
    }
}

/// How the theory value maps to the measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockKind {
    /// Predicted value = A(t)
    Generic,
    /// Positron counts: N0·exp(-t/τ)·(1 + A(t)) + B
    SingleHistogram {
        norm: ParamRef,
        background: ParamRef,
        lifetime: ParamRef,
    },
    /// Asymmetry with detector efficiency (α) and asymmetry (β) corrections
    Asymmetry { alpha: ParamRef, beta: ParamRef },
}

impl BlockKind {
    /// A single histogram using the free muon lifetime.
    pub fn single_histogram(norm: ParamRef, background: ParamRef) -> Self {
        BlockKind::SingleHistogram {
            norm,
            background,
            lifetime: ParamRef::Default,
        }
    }

    /// An asymmetry block with α = β = 1.
    pub fn asymmetry() -> Self {
        BlockKind::Asymmetry {
            alpha: ParamRef::Default,
            beta: ParamRef::Default,
        }
    }

    pub fn is_histogram(&self) -> bool {
        matches!(self, BlockKind::SingleHistogram { .. })
    }
}

/// One data set with its theory and map.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub id: String,
    pub theory: TheoryExpression,
    pub map: Vec<MapEntry>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub sigma: Vec<f64>,
    pub fit_range: FitRange,
    pub kind: BlockKind,
}

impl DataBlock {
    /// Create a generic block over the full data range.
    ///
    /// # Arguments
    ///
    /// * `id` - Name used in diagnostics and results
    /// * `theory` - Theory expression
    /// * `x` - Sample positions (time in µs for µSR data)
    /// * `y` - Measured values
    /// * `sigma` - Standard deviations of `y`
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::block::{BlockKind, DataBlock};
    /// use musrfit_rs::theory::TheoryExpression;
    ///
    /// let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2"]).unwrap();
    /// let block = DataBlock::new("run 2041", theory, vec![0.0, 0.1], vec![0.25, 0.24], vec![0.01, 0.01])
    ///     .unwrap()
    ///     .with_fit_range(0.0, 8.0)
    ///     .unwrap()
    ///     .with_kind(BlockKind::asymmetry());
    /// assert_eq!(block.len(), 2);
    /// ```
    pub fn new(
        id: &str,
        theory: TheoryExpression,
        x: Vec<f64>,
        y: Vec<f64>,
        sigma: Vec<f64>,
    ) -> Result<Self, EvaluationError> {
        if x.len() != y.len() || x.len() != sigma.len() {
            return Err(EvaluationError::LengthMismatch {
                block: id.to_string(),
                x: x.len(),
                y: y.len(),
                sigma: sigma.len(),
            });
        }
        Ok(Self {
            id: id.to_string(),
            theory,
            map: Vec::new(),
            x,
            y,
            sigma,
            fit_range: FitRange::full(),
            kind: BlockKind::Generic,
        })
    }

    pub fn with_map(mut self, map: Vec<MapEntry>) -> Self {
        self.map = map;
        self
    }

    pub fn with_fit_range(mut self, start: f64, end: f64) -> Result<Self, EvaluationError> {
        self.fit_range = FitRange::new(start, end)?;
        Ok(self)
    }

    pub fn with_kind(mut self, kind: BlockKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Samples inside the fit range.
    pub fn n_in_range(&self) -> usize {
        self.x.iter().filter(|&&x| self.fit_range.contains(x)).count()
    }
}
