//! # Parameter Binding
//!
//! Theory arguments, block scalars and FUNCTIONS entries refer to values
//! indirectly. This module turns those references into direct
//! [`Source`]s once, at setup, so that evaluation never re-resolves.
//!
//! ## Reference tokens
//!
//! | token | meaning |
//! |---|---|
//! | `N` (integer ≥ 1, leading zeros allowed) | parameter number N |
//! | `-1` | the function's declared default for that slot |
//! | `mapN` | entry N of the block's map |
//! | `funN` | value of FUNCTIONS entry N |
//! | decimal literal (`0.5`, `1e-3`) | constant |
//!
//! A map entry is either a parameter number, a constant or `0` (unused).
//! The same parameter number appearing in several blocks is how global
//! (shared) parameters are expressed.
//!
//! All resolution failures are [`BindingError`]s and occur before the first
//! objective evaluation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parameters::expression::indexed_identifier;

pub mod compiled;
pub mod functions;

pub use compiled::{CompiledLeaf, CompiledTheory};
pub use functions::FunctionTable;

/// Errors raised while resolving references at setup time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    #[error("Invalid reference token '{token}': {reason}")]
    InvalidToken { token: String, reason: String },

    #[error("Parameter number {index} out of range (table has {len} parameters)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Map index {index} out of range (block map has {len} entries)")]
    MapOutOfRange { index: usize, len: usize },

    #[error("Map entry {index} is unused (0) but referenced")]
    UnusedMapEntry { index: usize },

    #[error("FUNCTIONS entry fun{number} is not defined")]
    UndefinedFunction { number: usize },

    #[error("FUNCTIONS entry fun{number} is defined twice")]
    DuplicateDefinition { number: usize },

    #[error("Unknown theory function '{name}'")]
    UnknownFunction { name: String },

    #[error("Theory function '{name}' is already registered")]
    DuplicateFunction { name: String },

    #[error("Theory function '{function}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("'{what}' has no default value for argument {slot}")]
    NoDefault { what: String, slot: usize },

    #[error("Invalid theory line '{line}': {reason}")]
    InvalidLine { line: String, reason: String },

    #[error("Theory expression is empty")]
    EmptyTheory,

    #[error("Block '{block}': {source}")]
    InBlock {
        block: String,
        #[source]
        source: Box<BindingError>,
    },
}

impl BindingError {
    /// Attach the id of the block being bound.
    pub fn in_block(self, block: &str) -> Self {
        match self {
            err @ BindingError::InBlock { .. } => err,
            err => BindingError::InBlock {
                block: block.to_string(),
                source: Box::new(err),
            },
        }
    }
}

/// An authored, unresolved value reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamRef {
    /// Parameter number (1-based)
    Param(usize),
    /// Block map entry (1-based)
    Map(usize),
    /// FUNCTIONS entry (1-based)
    Function(usize),
    /// Literal value
    Constant(f64),
    /// Declared default of the slot
    Default,
}

impl FromStr for ParamRef {
    type Err = BindingError;

    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::binding::ParamRef;
    ///
    /// assert_eq!("007".parse::<ParamRef>().unwrap(), ParamRef::Param(7));
    /// assert_eq!("MAP2".parse::<ParamRef>().unwrap(), ParamRef::Map(2));
    /// assert_eq!("fun1".parse::<ParamRef>().unwrap(), ParamRef::Function(1));
    /// assert_eq!("-1".parse::<ParamRef>().unwrap(), ParamRef::Default);
    /// assert_eq!("0.5".parse::<ParamRef>().unwrap(), ParamRef::Constant(0.5));
    /// assert!("0".parse::<ParamRef>().is_err());
    /// ```
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        let invalid = |reason: &str| BindingError::InvalidToken {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        if let Some(n) = indexed_identifier(token, "map") {
            return match n {
                0 => Err(invalid("map entries are numbered from 1")),
                n => Ok(ParamRef::Map(n)),
            };
        }
        if let Some(n) = indexed_identifier(token, "fun") {
            return match n {
                0 => Err(invalid("functions are numbered from 1")),
                n => Ok(ParamRef::Function(n)),
            };
        }
        if is_integer(token) {
            let value: i64 = token
                .parse()
                .map_err(|_| invalid("integer out of range"))?;
            return match value {
                -1 => Ok(ParamRef::Default),
                n if n >= 1 => Ok(ParamRef::Param(n as usize)),
                0 => Err(invalid("parameters are numbered from 1")),
                _ => Err(invalid("negative parameter numbers other than -1 are not allowed")),
            };
        }
        token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ParamRef::Constant)
            .ok_or_else(|| invalid("expected a parameter number, mapN, funN, -1 or a decimal constant"))
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamRef::Param(n) => write!(f, "{}", n),
            ParamRef::Map(n) => write!(f, "map{}", n),
            ParamRef::Function(n) => write!(f, "fun{}", n),
            ParamRef::Constant(c) if c.fract() == 0.0 => write!(f, "{:.1}", c),
            ParamRef::Constant(c) => write!(f, "{}", c),
            ParamRef::Default => write!(f, "-1"),
        }
    }
}

fn is_integer(token: &str) -> bool {
    let digits = token
        .strip_prefix('-')
        .or_else(|| token.strip_prefix('+'))
        .unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// One entry of a block's map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MapEntry {
    /// Parameter number (1-based)
    Param(usize),
    /// Literal value
    Constant(f64),
    /// Placeholder (`0`); referencing it is an error
    Unused,
}

impl MapEntry {
    /// Parse a whitespace-separated map line, e.g. `"3 4 0 0.5"`.
    pub fn parse_list(line: &str) -> Result<Vec<MapEntry>, BindingError> {
        line.split_whitespace().map(str::parse).collect()
    }

    /// Current value given a parameter snapshot. Unused entries are NaN.
    pub fn value(&self, params: &[f64]) -> f64 {
        match *self {
            MapEntry::Param(n) => n
                .checked_sub(1)
                .and_then(|i| params.get(i))
                .copied()
                .unwrap_or(f64::NAN),
            MapEntry::Constant(c) => c,
            MapEntry::Unused => f64::NAN,
        }
    }
}

impl FromStr for MapEntry {
    type Err = BindingError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if is_integer(token) {
            return match token.parse::<i64>() {
                Ok(0) => Ok(MapEntry::Unused),
                Ok(n) if n > 0 => Ok(MapEntry::Param(n as usize)),
                _ => Err(BindingError::InvalidToken {
                    token: token.to_string(),
                    reason: "map entries must be a parameter number, 0 or a decimal constant"
                        .to_string(),
                }),
            };
        }
        token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(MapEntry::Constant)
            .ok_or_else(|| BindingError::InvalidToken {
                token: token.to_string(),
                reason: "not a number".to_string(),
            })
    }
}

/// Where a resolved value comes from during evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Source {
    /// Zero-based index into the parameter snapshot
    Param(usize),
    /// Zero-based index into the block's FUNCTIONS values
    Function(usize),
    Constant(f64),
}

impl Source {
    #[inline]
    pub fn value(&self, params: &[f64], functions: &[f64]) -> f64 {
        match *self {
            Source::Param(i) => params[i],
            Source::Function(i) => functions[i],
            Source::Constant(c) => c,
        }
    }
}

/// Everything a reference may resolve against within one block.
#[derive(Debug, Clone, Copy)]
pub struct BindingContext<'a> {
    pub n_params: usize,
    pub map: &'a [MapEntry],
    pub functions: &'a FunctionTable,
}

impl<'a> BindingContext<'a> {
    pub fn new(n_params: usize, map: &'a [MapEntry], functions: &'a FunctionTable) -> Self {
        Self {
            n_params,
            map,
            functions,
        }
    }

    fn param(&self, number: usize) -> Result<Source, BindingError> {
        if number == 0 || number > self.n_params {
            return Err(BindingError::IndexOutOfRange {
                index: number,
                len: self.n_params,
            });
        }
        Ok(Source::Param(number - 1))
    }

    /// Resolve a map index to the parameter or constant it names.
    pub fn map_entry(&self, index: usize) -> Result<Source, BindingError> {
        let entry = index
            .checked_sub(1)
            .and_then(|i| self.map.get(i))
            .ok_or(BindingError::MapOutOfRange {
                index,
                len: self.map.len(),
            })?;
        match *entry {
            MapEntry::Param(n) => self.param(n),
            MapEntry::Constant(c) => Ok(Source::Constant(c)),
            MapEntry::Unused => Err(BindingError::UnusedMapEntry { index }),
        }
    }

    /// Resolve a reference. `default` supplies the slot's declared default
    /// for the `-1` token; `what` names the slot owner in errors.
    pub fn resolve(
        &self,
        reference: ParamRef,
        default: Option<f64>,
        what: &str,
        slot: usize,
    ) -> Result<Source, BindingError> {
        match reference {
            ParamRef::Param(n) => self.param(n),
            ParamRef::Map(n) => self.map_entry(n),
            ParamRef::Function(n) => {
                self.functions.check_usable(n, self)?;
                Ok(Source::Function(n - 1))
            }
            ParamRef::Constant(c) => Ok(Source::Constant(c)),
            ParamRef::Default => default.map(Source::Constant).ok_or_else(|| {
                BindingError::NoDefault {
                    what: what.to_string(),
                    slot,
                }
            }),
        }
    }
}
