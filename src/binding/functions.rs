//! FUNCTIONS block: derived values shared by all blocks.
//!
//! Each entry `funN = expression` is evaluated once per block and objective
//! evaluation, against the parameter snapshot and that block's map.

use crate::binding::{BindingContext, BindingError, MapEntry};
use crate::error::Result;
use crate::parameters::expression::{EvaluationContext, Expression, ExpressionError};

/// Numbered FUNCTIONS entries. Numbers may have gaps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionTable {
    entries: Vec<Option<Expression>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse FUNCTIONS lines of the form `funN = expression`. Blank lines
    /// and lines starting with `#` are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::binding::FunctionTable;
    ///
    /// let table = FunctionTable::parse(&[
    ///     "fun1 = gamma_mu * par3",
    ///     "fun2 = par1 * (1 - map2)",
    /// ]).unwrap();
    /// assert_eq!(table.len(), 2);
    /// ```
    pub fn parse(lines: &[&str]) -> Result<Self> {
        let mut table = Self::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (number, expr) = Expression::parse_assignment(line)?;
            table.insert(number, expr)?;
        }
        Ok(table)
    }

    /// Define entry `number` (1-based).
    pub fn insert(&mut self, number: usize, expr: Expression) -> std::result::Result<(), BindingError> {
        if number == 0 {
            return Err(BindingError::UndefinedFunction { number });
        }
        if self.entries.len() < number {
            self.entries.resize(number, None);
        }
        let slot = &mut self.entries[number - 1];
        if slot.is_some() {
            return Err(BindingError::DuplicateDefinition { number });
        }
        *slot = Some(expr);
        Ok(())
    }

    /// Highest entry number, i.e. the length of a value vector.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn get(&self, number: usize) -> Option<&Expression> {
        number
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .and_then(Option::as_ref)
    }

    /// Check that entry `number` exists and that every `PARn`/`MAPn` it
    /// uses resolves within `ctx`.
    pub fn check_usable(&self, number: usize, ctx: &BindingContext<'_>) -> std::result::Result<(), BindingError> {
        let expr = self
            .get(number)
            .ok_or(BindingError::UndefinedFunction { number })?;
        for param in expr.params() {
            if param == 0 || param > ctx.n_params {
                return Err(BindingError::IndexOutOfRange {
                    index: param,
                    len: ctx.n_params,
                });
            }
        }
        for map in expr.maps() {
            ctx.map_entry(map)?;
        }
        Ok(())
    }

    /// Evaluate the entries listed in `used` (1-based numbers) into `out`,
    /// which is resized to [`len`](Self::len). Other slots are left NaN.
    pub fn evaluate_into(
        &self,
        used: &[usize],
        params: &[f64],
        map: &[MapEntry],
        out: &mut Vec<f64>,
    ) -> std::result::Result<(), FunctionFailure> {
        out.clear();
        out.resize(self.entries.len(), f64::NAN);
        let context = BlockContext { params, map };
        for &number in used {
            if let Some(expr) = self.get(number) {
                out[number - 1] = expr
                    .evaluate(&context)
                    .map_err(|source| FunctionFailure { number, source })?;
            }
        }
        Ok(())
    }
}

/// A FUNCTIONS entry failed to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionFailure {
    pub number: usize,
    pub source: ExpressionError,
}

struct BlockContext<'a> {
    params: &'a [f64],
    map: &'a [MapEntry],
}

impl EvaluationContext for BlockContext<'_> {
    fn param(&self, number: usize) -> std::result::Result<f64, ExpressionError> {
        number
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .copied()
            .ok_or(ExpressionError::UndefinedParameter { number })
    }

    fn map(&self, number: usize) -> std::result::Result<f64, ExpressionError> {
        number
            .checked_sub(1)
            .and_then(|i| self.map.get(i))
            .map(|entry| entry.value(self.params))
            .ok_or(ExpressionError::UndefinedMap { number })
    }
}
