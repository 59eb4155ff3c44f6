//! Composite theory expressions.
//!
//! Leaves are function applications as authored (function name plus raw
//! reference tokens). Internal nodes combine two sub-expressions with an
//! arithmetic operator. Trees are built either programmatically with the
//! `+ - * /` operators or from theory-block lines with
//! [`TheoryExpression::from_lines`].

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::binding::{BindingError, ParamRef};

/// Operator joining two sub-expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TheoryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl TheoryOp {
    #[inline]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            TheoryOp::Add => lhs + rhs,
            TheoryOp::Sub => lhs - rhs,
            TheoryOp::Mul => lhs * rhs,
            TheoryOp::Div => lhs / rhs,
        }
    }

    fn symbol(self) -> char {
        match self {
            TheoryOp::Add => '+',
            TheoryOp::Sub => '-',
            TheoryOp::Mul => '*',
            TheoryOp::Div => '/',
        }
    }
}

/// One function application.
#[derive(Debug, Clone, PartialEq)]
pub struct TheoryCall {
    /// Function name or abbreviation, resolved against a registry at setup
    pub function: String,
    /// Unresolved argument references
    pub args: Vec<ParamRef>,
}

/// A theory expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TheoryExpression {
    Leaf(TheoryCall),
    Binary(TheoryOp, Box<TheoryExpression>, Box<TheoryExpression>),
}

impl TheoryExpression {
    /// A single function application.
    pub fn call(function: &str, args: Vec<ParamRef>) -> Self {
        TheoryExpression::Leaf(TheoryCall {
            function: function.to_string(),
            args,
        })
    }

    /// Parse one theory line, e.g. `"simplExpo 4"` or `"TFieldCos map1 fun2"`.
    ///
    /// Anything from a `(` or `#` onward is a comment. For `userFcn`
    /// lines (`userFcn <library> <name> args...`) the library token is
    /// skipped and the function is looked up by `<name>`.
    pub fn parse_line(line: &str) -> Result<Self, BindingError> {
        let content = line
            .split(|c: char| c == '(' || c == '#')
            .next()
            .unwrap_or("")
            .trim();
        let mut tokens = content.split_whitespace();
        let head = tokens.next().ok_or_else(|| BindingError::InvalidLine {
            line: line.to_string(),
            reason: "missing function name".to_string(),
        })?;

        let function = if head.eq_ignore_ascii_case("userFcn") || head.eq_ignore_ascii_case("u") {
            let _library = tokens.next();
            tokens.next().ok_or_else(|| BindingError::InvalidLine {
                line: line.to_string(),
                reason: "userFcn needs a library and a function name".to_string(),
            })?
        } else {
            head
        };

        let args = tokens
            .map(str::parse::<ParamRef>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::call(function, args))
    }

    /// Build a tree from theory-block lines. Consecutive lines multiply; a
    /// line consisting of `+` starts a new additive group.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::theory::TheoryExpression;
    ///
    /// let theory = TheoryExpression::from_lines(&[
    ///     "asymmetry 1",
    ///     "simplExpo 2",
    ///     "+",
    ///     "asymmetry 3",
    ///     "simpleGss 4",
    /// ]).unwrap();
    /// assert_eq!(theory.to_string(), "((asymmetry 1 * simplExpo 2) + (asymmetry 3 * simpleGss 4))");
    /// ```
    pub fn from_lines(lines: &[&str]) -> Result<Self, BindingError> {
        let mut sum: Option<TheoryExpression> = None;
        let mut product: Option<TheoryExpression> = None;

        let close_group = |sum: Option<TheoryExpression>,
                           product: Option<TheoryExpression>|
         -> Result<Option<TheoryExpression>, BindingError> {
            let product = product.ok_or(BindingError::InvalidLine {
                line: "+".to_string(),
                reason: "empty additive group".to_string(),
            })?;
            Ok(Some(match sum {
                Some(sum) => sum + product,
                None => product,
            }))
        };

        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed == "+" {
                sum = close_group(sum, product.take())?;
                continue;
            }
            let leaf = Self::parse_line(trimmed)?;
            product = Some(match product {
                Some(p) => p * leaf,
                None => leaf,
            });
        }

        match (sum, product) {
            (None, None) => Err(BindingError::EmptyTheory),
            (sum, product) => close_group(sum, product)?.ok_or(BindingError::EmptyTheory),
        }
    }

    /// Leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<&TheoryCall> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a TheoryCall>) {
        match self {
            TheoryExpression::Leaf(call) => out.push(call),
            TheoryExpression::Binary(_, lhs, rhs) => {
                lhs.collect_leaves(out);
                rhs.collect_leaves(out);
            }
        }
    }
}

macro_rules! impl_theory_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for TheoryExpression {
            type Output = TheoryExpression;

            fn $method(self, rhs: TheoryExpression) -> TheoryExpression {
                TheoryExpression::Binary($op, Box::new(self), Box::new(rhs))
            }
        }
    };
}

impl_theory_op!(Add, add, TheoryOp::Add);
impl_theory_op!(Sub, sub, TheoryOp::Sub);
impl_theory_op!(Mul, mul, TheoryOp::Mul);
impl_theory_op!(Div, div, TheoryOp::Div);

impl fmt::Display for TheoryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl fmt::Display for TheoryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TheoryExpression::Leaf(call) => write!(f, "{}", call),
            TheoryExpression::Binary(op, lhs, rhs) => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
        }
    }
}
