//! # Theory Functions
//!
//! A theory is a composite expression of polarization functions of time
//! (`t` in µs). Each leaf names a function from a [`TheoryRegistry`] and
//! lists where its arguments come from (parameters, map entries, FUNCTIONS
//! values or constants). Leaves combine with `+`, `-`, `*` and `/`.
//!
//! ## Core Components
//!
//! - [`TheoryFunction`]: the contract every built-in or user function fulfils
//! - [`TheoryRegistry`]: case-insensitive lookup by name or abbreviation
//! - [`TheoryExpression`]: the composite tree as authored
//! - [`GlobalPartCache`]: per-leaf storage of expensive parameter-only
//!   precomputations, refreshed serially before each block evaluation
//!
//! ## Example Usage
//!
//! ```rust
//! use musrfit_rs::theory::{TheoryExpression, TheoryRegistry};
//!
//! let registry = TheoryRegistry::with_builtins();
//! let expo = registry.lookup("se").unwrap();
//! assert_eq!(expo.name(), "simplExpo");
//! assert!((expo.evaluate(1.0, &[0.5], None) - (-0.5f64).exp()).abs() < 1e-15);
//!
//! // asymmetry * exp(-λt) * cos(2πνt + φ)
//! let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2", "TFieldCos 3 4"]).unwrap();
//! assert_eq!(theory.leaves().len(), 3);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod expression;
pub mod global;
pub mod registry;
pub mod special;

pub use expression::{TheoryCall, TheoryExpression, TheoryOp};
pub use global::GlobalPartCache;
pub use registry::TheoryRegistry;

/// Muon lifetime in µs.
pub const MUON_LIFETIME: f64 = 2.197019;

/// Opaque, parameter-dependent precomputation shared by all time points of
/// one evaluation (e.g. a tabulated integral).
pub type GlobalPart = Arc<dyn Any + Send + Sync>;

/// Number of arguments a theory function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// At least n arguments
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Arity::Exact(k) => write!(f, "{}", k),
            Arity::Range(lo, hi) => write!(f, "{}..={}", lo, hi),
            Arity::AtLeast(k) => write!(f, "at least {}", k),
        }
    }
}

/// A polarization function of time.
///
/// Implementations must be pure: the same `(t, args, global)` always yields
/// the same value, and no state is mutated during `evaluate`, which may run
/// concurrently for different blocks.
pub trait TheoryFunction: Send + Sync {
    /// Canonical name, e.g. `simplExpo`.
    fn name(&self) -> &str;

    /// Short alias, e.g. `se`.
    fn abbreviation(&self) -> Option<&str> {
        None
    }

    /// Names of the arguments, in order.
    fn parameter_names(&self) -> &[&str];

    /// Name of argument `slot` for diagnostics. Functions taking a variable
    /// number of arguments override this to name the slots past
    /// [`parameter_names`](Self::parameter_names).
    fn argument_name(&self, slot: usize) -> String {
        match self.parameter_names().get(slot) {
            Some(name) => (*name).to_string(),
            None => format!("arg{}", slot + 1),
        }
    }

    /// Accepted argument counts.
    fn arity(&self) -> Arity;

    /// Declared default for argument `slot`, substituted for the `-1` token.
    fn default_value(&self, _slot: usize) -> Option<f64> {
        None
    }

    /// Evaluate at time `t` (µs).
    ///
    /// # Arguments
    ///
    /// * `t` - Time in µs
    /// * `args` - Resolved argument values; length is accepted by [`arity`](Self::arity)
    /// * `global` - The part computed by [`compute_global_part`](Self::compute_global_part)
    ///   for these `args`, if the function uses one
    fn evaluate(&self, t: f64, args: &[f64], global: Option<&GlobalPart>) -> f64;

    /// Whether this function benefits from a per-evaluation precomputation.
    fn needs_global_part(&self) -> bool {
        false
    }

    /// Values the global part depends on. The cached part is reused while
    /// the key is unchanged.
    fn global_part_key(&self, args: &[f64]) -> Vec<f64> {
        args.to_vec()
    }

    /// Compute the global part for `args`.
    fn compute_global_part(&self, _args: &[f64]) -> Option<GlobalPart> {
        None
    }
}

impl fmt::Debug for dyn TheoryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TheoryFunction")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .finish()
    }
}
