//! Expression parsing and evaluation for the FUNCTIONS block
//!
//! A FUNCTIONS-block entry is an arithmetic expression over fit parameters
//! (`PAR3`), entries of a block's map (`MAP1`), numeric literals and the
//! constants `PI` and `GAMMA_MU`, e.g.
//!
//! ```text
//! fun1 = PAR3 * GAMMA_MU * cos(MAP2 * PI / 180)
//! ```
//!
//! Identifiers are case-insensitive. `+ - * /` are left-associative and `^`
//! is right-associative.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    number::complete::double,
    IResult, Parser,
};
use thiserror::Error;

/// Muon gyromagnetic ratio γ_µ/2π in MHz/G.
pub const GAMMA_MU: f64 = 0.0135538817;

/// Error that can occur during expression parsing or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Undefined parameter: PAR{number}")]
    UndefinedParameter { number: usize },

    #[error("Undefined map entry: MAP{number}")]
    UndefinedMap { number: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },
}

/// Result type for expression evaluation
type ExprResult<T> = Result<T, ExpressionError>;

type PResult<'a, T> = IResult<&'a str, T, nom::error::Error<&'a str>>;

/// Built-in mathematical functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunction {
    Cos,
    Sin,
    Tan,
    Cosh,
    Sinh,
    Tanh,
    Acos,
    Asin,
    Atan,
    Acosh,
    Asinh,
    Atanh,
    /// Decimal logarithm
    Log,
    /// Natural logarithm
    Ln,
    Exp,
    Sqrt,
    Abs,
    Pow,
    Max,
    Min,
}

impl MathFunction {
    fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "cos" => Self::Cos,
            "sin" => Self::Sin,
            "tan" => Self::Tan,
            "cosh" => Self::Cosh,
            "sinh" => Self::Sinh,
            "tanh" => Self::Tanh,
            "acos" => Self::Acos,
            "asin" => Self::Asin,
            "atan" => Self::Atan,
            "acosh" => Self::Acosh,
            "asinh" => Self::Asinh,
            "atanh" => Self::Atanh,
            "log" => Self::Log,
            "ln" => Self::Ln,
            "exp" => Self::Exp,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "pow" => Self::Pow,
            "max" => Self::Max,
            "min" => Self::Min,
            _ => return None,
        };
        Some(f)
    }

    fn apply(self, args: &[f64]) -> ExprResult<f64> {
        let expect = |n: usize| -> ExprResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(ExpressionError::InvalidOperation {
                    message: format!("{:?}() requires {} argument(s), got {}", self, n, args.len()),
                })
            }
        };
        let unary = |f: fn(f64) -> f64| -> ExprResult<f64> {
            expect(1)?;
            Ok(f(args[0]))
        };
        match self {
            Self::Cos => unary(f64::cos),
            Self::Sin => unary(f64::sin),
            Self::Tan => unary(f64::tan),
            Self::Cosh => unary(f64::cosh),
            Self::Sinh => unary(f64::sinh),
            Self::Tanh => unary(f64::tanh),
            Self::Acos => unary(f64::acos),
            Self::Asin => unary(f64::asin),
            Self::Atan => unary(f64::atan),
            Self::Acosh => unary(f64::acosh),
            Self::Asinh => unary(f64::asinh),
            Self::Atanh => unary(f64::atanh),
            Self::Log => unary(f64::log10),
            Self::Ln => unary(f64::ln),
            Self::Exp => unary(f64::exp),
            Self::Sqrt => unary(f64::sqrt),
            Self::Abs => unary(f64::abs),
            Self::Pow => {
                expect(2)?;
                Ok(args[0].powf(args[1]))
            }
            Self::Max | Self::Min => {
                if args.len() < 2 {
                    return Err(ExpressionError::InvalidOperation {
                        message: format!(
                            "{:?}() requires at least 2 arguments, got {}",
                            self,
                            args.len()
                        ),
                    });
                }
                Ok(if self == Self::Max {
                    args.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                } else {
                    args.iter().copied().fold(f64::INFINITY, f64::min)
                })
            }
        }
    }
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number (literals, `PI`, `GAMMA_MU`)
    Number(f64),

    /// Fit parameter, 1-based (`PARn`)
    Param(usize),

    /// Block map entry, 1-based (`MAPn`)
    Map(usize),

    /// Negation
    Neg(Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(MathFunction, Vec<Expression>),
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Source of parameter and map values during evaluation
pub trait EvaluationContext {
    /// Value of parameter `number` (1-based)
    fn param(&self, number: usize) -> ExprResult<f64>;

    /// Value of map entry `number` (1-based)
    fn map(&self, number: usize) -> ExprResult<f64>;
}

/// Context backed by plain value vectors
#[derive(Debug, Clone, Default)]
pub struct SimpleContext {
    pub params: Vec<f64>,
    pub map: Vec<f64>,
}

impl SimpleContext {
    pub fn new(params: Vec<f64>, map: Vec<f64>) -> Self {
        Self { params, map }
    }
}

impl EvaluationContext for SimpleContext {
    fn param(&self, number: usize) -> ExprResult<f64> {
        number
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .copied()
            .ok_or(ExpressionError::UndefinedParameter { number })
    }

    fn map(&self, number: usize) -> ExprResult<f64> {
        number
            .checked_sub(1)
            .and_then(|i| self.map.get(i))
            .copied()
            .ok_or(ExpressionError::UndefinedMap { number })
    }
}

impl Expression {
    /// Parse an expression from a string
    pub fn parse(input: &str) -> ExprResult<Self> {
        match expr_parser(input.trim()) {
            Ok((remainder, expr)) => {
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::ParseError {
                        message: format!("Unexpected trailing characters: '{}'", remainder),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{:?}", e),
            }),
        }
    }

    /// Parse a FUNCTIONS-block line `funN = expression`, returning `N` and the
    /// expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::expression::{Expression, SimpleContext};
    ///
    /// let (number, expr) = Expression::parse_assignment("fun2 = par1 * map1").unwrap();
    /// assert_eq!(number, 2);
    /// let ctx = SimpleContext::new(vec![3.0], vec![2.0]);
    /// assert_eq!(expr.evaluate(&ctx).unwrap(), 6.0);
    /// ```
    pub fn parse_assignment(line: &str) -> ExprResult<(usize, Self)> {
        let (label, body) = line
            .split_once('=')
            .ok_or_else(|| ExpressionError::ParseError {
                message: format!("Missing '=' in function definition: '{}'", line),
            })?;
        let label = label.trim();
        let number = indexed_identifier(label, "fun").ok_or_else(|| ExpressionError::ParseError {
            message: format!("Invalid function label: '{}'", label),
        })?;
        Ok((number, Self::parse(body)?))
    }

    /// Evaluate the expression with the given context
    pub fn evaluate<C: EvaluationContext + ?Sized>(&self, context: &C) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Param(n) => context.param(*n),
            Self::Map(n) => context.map(*n),
            Self::Neg(expr) => Ok(-expr.evaluate(context)?),
            Self::Binary(op, left, right) => {
                let lhs = left.evaluate(context)?;
                let rhs = right.evaluate(context)?;
                match op {
                    BinaryOp::Add => Ok(lhs + rhs),
                    BinaryOp::Sub => Ok(lhs - rhs),
                    BinaryOp::Mul => Ok(lhs * rhs),
                    BinaryOp::Div => {
                        if rhs == 0.0 {
                            Err(ExpressionError::DivisionByZero)
                        } else {
                            Ok(lhs / rhs)
                        }
                    }
                    BinaryOp::Pow => Ok(lhs.powf(rhs)),
                }
            }
            Self::Function(f, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(context))
                    .collect::<ExprResult<Vec<f64>>>()?;
                f.apply(&values)
            }
        }
    }

    /// Parameter numbers referenced by the expression (sorted, unique)
    pub fn params(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(&mut out, &mut Vec::new());
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Map entry numbers referenced by the expression (sorted, unique)
    pub fn maps(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect(&mut Vec::new(), &mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect(&self, params: &mut Vec<usize>, maps: &mut Vec<usize>) {
        match self {
            Self::Number(_) => {}
            Self::Param(n) => params.push(*n),
            Self::Map(n) => maps.push(*n),
            Self::Neg(expr) => expr.collect(params, maps),
            Self::Binary(_, left, right) => {
                left.collect(params, maps);
                right.collect(params, maps);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.collect(params, maps);
                }
            }
        }
    }
}

/// `prefix` followed by a positive decimal number, case-insensitive.
/// `N` from an identifier of the form `<prefix>N` (prefix case-insensitive).
pub(crate) fn indexed_identifier(ident: &str, prefix: &str) -> Option<usize> {
    let head = ident.get(..prefix.len())?;
    if ident.len() == prefix.len() || !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let digits = &ident[prefix.len()..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// Parser functions using nom

fn ws(input: &str) -> PResult<'_, &str> {
    multispace0(input)
}

/// A single-character token, skipping leading whitespace
fn symbol(input: &str, c: char) -> PResult<'_, char> {
    let (input, _) = ws(input)?;
    char(c).parse(input)
}

/// Parse an identifier (function name, PARn, MAPn or constant)
fn identifier(input: &str) -> PResult<'_, &str> {
    let (input, _) = ws(input)?;
    if !input.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Alpha,
        )));
    }
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

/// Parse a comma-separated list of expressions (for function arguments)
fn args_list(input: &str) -> PResult<'_, Vec<Expression>> {
    let (mut input, first) = expr_parser(input)?;
    let mut args = vec![first];
    while let Ok((rest, _)) = symbol(input, ',') {
        let (rest, arg) = expr_parser(rest)?;
        args.push(arg);
        input = rest;
    }
    Ok((input, args))
}

/// Parse an identifier-led primary: function call, reference or constant
fn named(input: &str) -> PResult<'_, Expression> {
    let (rest, name) = identifier(input)?;

    if let Ok((after_paren, _)) = symbol(rest, '(') {
        let function = MathFunction::from_name(name).ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
        })?;
        let (after_args, args) = args_list(after_paren)?;
        let (after_close, _) = symbol(after_args, ')')?;
        return Ok((after_close, Expression::Function(function, args)));
    }

    let expr = if let Some(n) = indexed_identifier(name, "par") {
        Expression::Param(n)
    } else if let Some(n) = indexed_identifier(name, "map") {
        Expression::Map(n)
    } else if name.eq_ignore_ascii_case("pi") {
        Expression::Number(std::f64::consts::PI)
    } else if name.eq_ignore_ascii_case("gamma_mu") {
        Expression::Number(GAMMA_MU)
    } else {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    };
    Ok((rest, expr))
}

/// Parse an unsigned number
fn number(input: &str) -> PResult<'_, Expression> {
    let (input, _) = ws(input)?;
    if !input.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        )));
    }
    let parsed: PResult<'_, f64> = double(input);
    let (input, value) = parsed?;
    Ok((input, Expression::Number(value)))
}

/// Parse a parenthesized expression
fn parens(input: &str) -> PResult<'_, Expression> {
    let (input, _) = symbol(input, '(')?;
    let (input, expr) = expr_parser(input)?;
    let (input, _) = symbol(input, ')')?;
    Ok((input, expr))
}

/// Parse a primary expression (number, named item or parenthesized expression)
fn primary(input: &str) -> PResult<'_, Expression> {
    if let Ok(result) = number(input) {
        return Ok(result);
    }
    match named(input) {
        Ok(result) => return Ok(result),
        Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
        Err(_) => {}
    }
    parens(input)
}

/// Parse a power expression; `^` binds right and accepts a signed exponent
fn power(input: &str) -> PResult<'_, Expression> {
    let (input, base) = primary(input)?;
    match symbol(input, '^') {
        Ok((rest, _)) => {
            let (rest, exponent) = unary(rest)?;
            Ok((
                rest,
                Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

/// Parse a unary expression (-expr)
fn unary(input: &str) -> PResult<'_, Expression> {
    match symbol(input, '-') {
        Ok((rest, _)) => {
            let (rest, expr) = unary(rest)?;
            Ok((rest, Expression::Neg(Box::new(expr))))
        }
        Err(_) => power(input),
    }
}

/// Parse a multiplicative chain, folding to the left
fn term(input: &str) -> PResult<'_, Expression> {
    let (mut input, mut acc) = unary(input)?;
    loop {
        let op = if let Ok((rest, _)) = symbol(input, '*') {
            (rest, BinaryOp::Mul)
        } else if let Ok((rest, _)) = symbol(input, '/') {
            (rest, BinaryOp::Div)
        } else {
            return Ok((input, acc));
        };
        let (rest, rhs) = unary(op.0)?;
        acc = Expression::Binary(op.1, Box::new(acc), Box::new(rhs));
        input = rest;
    }
}

/// Parse an additive chain, folding to the left
fn expr_parser(input: &str) -> PResult<'_, Expression> {
    let (mut input, mut acc) = term(input)?;
    loop {
        let op = if let Ok((rest, _)) = symbol(input, '+') {
            (rest, BinaryOp::Add)
        } else if let Ok((rest, _)) = symbol(input, '-') {
            (rest, BinaryOp::Sub)
        } else {
            return Ok((input, acc));
        };
        let (rest, rhs) = term(op.0)?;
        acc = Expression::Binary(op.1, Box::new(acc), Box::new(rhs));
        input = rest;
    }
}
