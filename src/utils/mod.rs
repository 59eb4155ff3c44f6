//! Numerical helpers shared by the minimizers.

pub mod finite_difference;

pub use finite_difference::{hessian, jacobian, jacobian_at};
