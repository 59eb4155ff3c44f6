//! # musrfit-rs
//!
//! `musrfit-rs` is the global-fit engine of a µSR (muon spin
//! rotation/relaxation) fitting application: it links one parameter table to
//! the theory functions of many data blocks and minimizes the combined
//! χ² or Poisson log-likelihood.
//!
//! The library provides:
//! - A parameter table with bounds, fixed/free flags and JSON load/save
//! - A registry of µSR theory functions, open to user functions
//! - Per-block parameter maps, FUNCTIONS-block expressions and numeric
//!   constants, bound once at setup
//! - Serial and rayon-parallel block evaluation with verified fallback
//! - Levenberg-Marquardt, simplex, HESSE and MINOS driven by a command list
//!
//! ## Basic Usage
//!
//! ```
//! use musrfit_rs::{DataBlock, FitConfig, FitSession, Parameter, ParameterTable, TheoryExpression};
//!
//! let t: Vec<f64> = (0..80).map(|i| i as f64 * 0.05).collect();
//! let y: Vec<f64> = t.iter().map(|&t| 0.21 * (-0.5 * t * t).exp()).collect();
//!
//! let theory = TheoryExpression::from_lines(&["asymmetry 1", "simpleGss 2"]).unwrap();
//! let block = DataBlock::new("run 2716", theory, t, y, vec![0.002; 80]).unwrap();
//! let table = ParameterTable::from_parameters(vec![
//!     Parameter::new("Asy", 0.2, 0.01),
//!     Parameter::with_bounds("Sigma", 0.8, 0.05, 0.0, 10.0).unwrap(),
//! ]).unwrap();
//!
//! let mut session = FitSession::builder(table)
//!     .block(block)
//!     .config(FitConfig::default())
//!     .build()
//!     .unwrap();
//! let result = session.fit().unwrap();
//! assert!(result.is_converged());
//! assert!((result.value_of("Sigma").unwrap() - 1.0).abs() < 1e-6);
//! ```

pub mod accel;
pub mod binding;
pub mod block;
pub mod error;
pub mod fitter;
pub mod objective;
pub mod parameters;
pub mod problem;
pub mod session;
pub mod theory;
pub mod uncertainty;
pub mod utils;

// Re-exports for convenience
pub use block::{BlockKind, DataBlock, FitRange};
pub use error::{MusrFitError, Result};
pub use fitter::{FitCommand, FitConfig, FitStatus};
pub use objective::{FitStatistic, Objective};
pub use parameters::{Parameter, ParameterTable};
pub use problem::Problem;
pub use session::{FitResult, FitSession};
pub use theory::{TheoryExpression, TheoryFunction, TheoryRegistry};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
