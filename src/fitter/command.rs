//! Fit commands.
//!
//! A fit runs an ordered list of commands. They can be built in code, read
//! from JSON as part of [`crate::fitter::FitConfig`], or parsed from the
//! text form used in command blocks:
//!
//! ```text
//! FIX 3 field
//! MIGRAD
//! RELEASE field
//! MINIMIZE
//! HESSE
//! SCAN 2 21 0.1 0.3
//! FIT_RANGE 0.05 8.0
//! SAVE
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::block::FitRange;
use crate::error::{MusrFitError, Result};
use crate::parameters::{ParameterError, ParameterTable};

/// Default number of scan points.
pub const DEFAULT_SCAN_POINTS: usize = 41;

/// A parameter selected by 1-based number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamId {
    Number(usize),
    Name(String),
}

impl ParamId {
    /// 1-based parameter number in `table`.
    pub fn resolve(&self, table: &ParameterTable) -> std::result::Result<usize, ParameterError> {
        match self {
            ParamId::Number(n) => table.by_number(*n).map(|_| *n),
            ParamId::Name(name) => table.number_of(name),
        }
    }
}

impl From<usize> for ParamId {
    fn from(number: usize) -> Self {
        ParamId::Number(number)
    }
}

impl From<&str> for ParamId {
    fn from(name: &str) -> Self {
        ParamId::Name(name.to_string())
    }
}

impl FromStr for ParamId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(n) => ParamId::Number(n),
            Err(_) => ParamId::Name(s.to_string()),
        })
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamId::Number(n) => write!(f, "{}", n),
            ParamId::Name(name) => f.write_str(name),
        }
    }
}

/// Fit-range override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeCommand {
    /// Back to each block's own range
    Reset,
    /// The same range for every block
    All(FitRange),
    /// One range per block, in block order
    PerBlock(Vec<FitRange>),
}

/// One step of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitCommand {
    /// Levenberg-Marquardt on the residual vector
    Migrad,
    /// Nelder-Mead on the scalar objective
    Simplex,
    /// Migrad, falling back to Simplex when Migrad fails
    Minimize,
    /// Numerical Hessian error estimate
    Hesse,
    /// Asymmetric errors by profiling
    Minos,
    Fix(Vec<ParamId>),
    Release(Vec<ParamId>),
    /// Release every parameter
    Restore,
    /// Objective along one parameter (all free ones when `param` is None)
    Scan {
        param: Option<ParamId>,
        points: usize,
        low: Option<f64>,
        high: Option<f64>,
    },
    FitRange(RangeCommand),
    /// Record the current parameter values
    Save,
}

impl FitCommand {
    /// Commands that move parameters towards a minimum.
    pub fn is_minimizer(&self) -> bool {
        matches!(
            self,
            FitCommand::Migrad | FitCommand::Simplex | FitCommand::Minimize
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FitCommand::Migrad => "MIGRAD",
            FitCommand::Simplex => "SIMPLEX",
            FitCommand::Minimize => "MINIMIZE",
            FitCommand::Hesse => "HESSE",
            FitCommand::Minos => "MINOS",
            FitCommand::Fix(_) => "FIX",
            FitCommand::Release(_) => "RELEASE",
            FitCommand::Restore => "RESTORE",
            FitCommand::Scan { .. } => "SCAN",
            FitCommand::FitRange(_) => "FIT_RANGE",
            FitCommand::Save => "SAVE",
        }
    }

    /// Parse a block of command lines. Blank lines and `#` comments are
    /// skipped.
    pub fn parse_block(lines: &[&str]) -> Result<Vec<FitCommand>> {
        lines
            .iter()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Scan with default points and range.
    pub fn scan(param: impl Into<ParamId>) -> Self {
        FitCommand::Scan {
            param: Some(param.into()),
            points: DEFAULT_SCAN_POINTS,
            low: None,
            high: None,
        }
    }
}

fn parse_f64(token: &str, line: &str) -> Result<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MusrFitError::InvalidConfig(format!("'{}': '{}' is not a number", line, token)))
}

fn parse_ranges(values: &[f64], line: &str) -> Result<Vec<FitRange>> {
    values
        .chunks(2)
        .map(|pair| {
            FitRange::new(pair[0], pair[1])
                .map_err(|e| MusrFitError::InvalidConfig(format!("'{}': {}", line, e)))
        })
        .collect()
}

impl FromStr for FitCommand {
    type Err = MusrFitError;

    fn from_str(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();
        let keyword = tokens
            .first()
            .ok_or_else(|| MusrFitError::InvalidConfig("empty command line".to_string()))?
            .to_ascii_uppercase();
        let args = &tokens[1..];
        let ids = || -> Vec<ParamId> {
            args.iter()
                .map(|t| match t.parse::<ParamId>() {
                    Ok(id) => id,
                    Err(never) => match never {},
                })
                .collect()
        };
        let no_args = |cmd: FitCommand| -> Result<FitCommand> {
            if args.is_empty() {
                Ok(cmd)
            } else {
                Err(MusrFitError::InvalidConfig(format!(
                    "'{}': {} takes no arguments",
                    line, keyword
                )))
            }
        };

        match keyword.as_str() {
            "MIGRAD" => no_args(FitCommand::Migrad),
            "SIMPLEX" => no_args(FitCommand::Simplex),
            "MINIMIZE" => no_args(FitCommand::Minimize),
            "HESSE" => no_args(FitCommand::Hesse),
            "MINOS" => no_args(FitCommand::Minos),
            "RESTORE" => no_args(FitCommand::Restore),
            "SAVE" => no_args(FitCommand::Save),
            "FIX" | "RELEASE" if args.is_empty() => Err(MusrFitError::InvalidConfig(format!(
                "'{}': {} needs at least one parameter",
                line, keyword
            ))),
            "FIX" => Ok(FitCommand::Fix(ids())),
            "RELEASE" => Ok(FitCommand::Release(ids())),
            "SCAN" => {
                let param = args.first().map(|t| match t.parse::<ParamId>() {
                    Ok(id) => id,
                    Err(never) => match never {},
                });
                let points = match args.get(1) {
                    Some(t) => t.parse::<usize>().ok().filter(|&n| n >= 2).ok_or_else(|| {
                        MusrFitError::InvalidConfig(format!("'{}': invalid number of scan points", line))
                    })?,
                    None => DEFAULT_SCAN_POINTS,
                };
                let (low, high) = match args.len() {
                    0..=2 => (None, None),
                    4 => (Some(parse_f64(args[2], line)?), Some(parse_f64(args[3], line)?)),
                    _ => {
                        return Err(MusrFitError::InvalidConfig(format!(
                            "'{}': syntax is SCAN [parameter [points [low high]]]",
                            line
                        )))
                    }
                };
                Ok(FitCommand::Scan {
                    param,
                    points,
                    low,
                    high,
                })
            }
            "FIT_RANGE" => {
                if args.len() == 1 && args[0].eq_ignore_ascii_case("reset") {
                    return Ok(FitCommand::FitRange(RangeCommand::Reset));
                }
                if args.is_empty() || args.len() % 2 != 0 {
                    return Err(MusrFitError::InvalidConfig(format!(
                        "'{}': syntax is FIT_RANGE RESET | start end | s1 e1 .. sN eN",
                        line
                    )));
                }
                let values = args
                    .iter()
                    .map(|t| parse_f64(t, line))
                    .collect::<Result<Vec<f64>>>()?;
                let mut ranges = parse_ranges(&values, line)?;
                if ranges.len() == 1 {
                    Ok(FitCommand::FitRange(RangeCommand::All(ranges.remove(0))))
                } else {
                    Ok(FitCommand::FitRange(RangeCommand::PerBlock(ranges)))
                }
            }
            _ => Err(MusrFitError::InvalidConfig(format!(
                "unknown fit command '{}'",
                keyword
            ))),
        }
    }
}

impl fmt::Display for FitCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |ids: &[ParamId]| {
            ids.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            FitCommand::Fix(ids) | FitCommand::Release(ids) => {
                write!(f, "{} {}", self.name(), join(ids))
            }
            FitCommand::Scan {
                param,
                points,
                low,
                high,
            } => {
                write!(f, "SCAN")?;
                if let Some(param) = param {
                    write!(f, " {} {}", param, points)?;
                    if let (Some(low), Some(high)) = (low, high) {
                        write!(f, " {} {}", low, high)?;
                    }
                }
                Ok(())
            }
            FitCommand::FitRange(RangeCommand::Reset) => write!(f, "FIT_RANGE RESET"),
            FitCommand::FitRange(RangeCommand::All(r)) => {
                write!(f, "FIT_RANGE {} {}", r.start, r.end)
            }
            FitCommand::FitRange(RangeCommand::PerBlock(ranges)) => {
                write!(f, "FIT_RANGE")?;
                for r in ranges {
                    write!(f, " {} {}", r.start, r.end)?;
                }
                Ok(())
            }
            other => f.write_str(other.name()),
        }
    }
}
