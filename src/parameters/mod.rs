//! # Parameter System
//!
//! The parameter table is the single owned store of fit parameters shared by
//! every data block of a (global) fit.
//!
//! ## Core Components
//!
//! - [`Parameter`]: value, step, error(s), bounds and fixed flag
//! - [`ParameterTable`]: ordered, uniquely named parameters addressed by
//!   1-based number or case-insensitive name, with JSON load/save
//! - [`Bounds`] and [`BoundsTransform`]: MINUIT-style limits handling
//! - [`Expression`]: FUNCTIONS-block expressions over `PARn` and `MAPn`
//!
//! ## Example Usage
//!
//! ```rust
//! use musrfit_rs::parameters::{Parameter, ParameterTable};
//!
//! let mut table = ParameterTable::new();
//! table.add(Parameter::new("Asy", 0.22, 0.01)).unwrap();
//! table.add(Parameter::with_bounds("Sigma", 0.35, 0.02, 0.0, 10.0).unwrap()).unwrap();
//! table.add(Parameter::fixed("Field", 100.0)).unwrap();
//!
//! assert_eq!(table.n_free(), 2);
//! assert_eq!(table.snapshot(), vec![0.22, 0.35, 100.0]);
//! ```

pub mod bounds;
pub mod expression;
pub mod parameter;
pub mod table;

// Re-export key types
pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use expression::{EvaluationContext, Expression, ExpressionError, SimpleContext};
pub use parameter::{Parameter, ParameterError};
pub use table::ParameterTable;
