//! Parameter definition and implementation
//!
//! A `Parameter` is one entry of the fit's parameter table: a named value
//! with an initial step size, optional limits and a fixed/free flag. After a
//! fit it also carries the estimated (possibly asymmetric) error.

use crate::parameters::bounds::{Bounds, BoundsError, BoundsTransform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter name '{name}' is already in use (names are case-insensitive)")]
    DuplicateName { name: String },

    #[error("Parameter '{name}' not found")]
    NotFound { name: String },

    #[error("Parameter number {number} out of range (table has {len} parameters)")]
    NumberOutOfRange { number: usize, len: usize },

    #[error("Free parameter '{name}' needs a finite, nonzero step (got {step})")]
    InvalidStep { name: String, step: f64 },

    #[error("Parameter '{name}' has a non-finite value")]
    NonFiniteValue { name: String },

    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),
}

/// A fit parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter, unique within a table (case-insensitive)
    pub name: String,

    /// Current value
    value: f64,

    /// Initial step size used by the minimizers
    pub step: f64,

    /// Symmetric (parabolic) error, set after error estimation
    #[serde(default)]
    pub error: Option<f64>,

    /// Asymmetric (negative, positive) errors, set by MINOS
    #[serde(default)]
    pub asymmetric_error: Option<(f64, f64)>,

    /// Lower and upper limits
    #[serde(default)]
    bounds: Bounds,

    /// A fixed parameter is never written by a minimizer
    #[serde(default)]
    pub fixed: bool,
}

impl Parameter {
    /// Create a free, unbounded parameter.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `value` - Start value
    /// * `step` - Initial step size for the minimizer
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::parameter::Parameter;
    ///
    /// let param = Parameter::new("Asy", 0.25, 0.01);
    /// assert_eq!(param.value(), 0.25);
    /// assert!(param.is_free());
    /// ```
    pub fn new(name: &str, value: f64, step: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            step,
            error: None,
            asymmetric_error: None,
            bounds: Bounds::default(),
            fixed: false,
        }
    }

    /// Create a fixed parameter, i.e. a constant as far as the minimizer is concerned.
    pub fn fixed(name: &str, value: f64) -> Self {
        Self {
            fixed: true,
            ..Self::new(name, value, 0.0)
        }
    }

    /// Create a free parameter limited to `[min, max]`.
    ///
    /// The start value is clamped into the bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::parameter::Parameter;
    ///
    /// let param = Parameter::with_bounds("sigma", 2.0, 0.1, 0.0, 1.0).unwrap();
    /// assert_eq!(param.value(), 1.0);
    /// assert_eq!(param.min(), 0.0);
    /// ```
    pub fn with_bounds(
        name: &str,
        value: f64,
        step: f64,
        min: f64,
        max: f64,
    ) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(min, max)?;
        Ok(Self {
            value: bounds.clamp(value),
            bounds,
            ..Self::new(name, value, step)
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value, rejecting values outside the bounds.
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !value.is_finite() {
            return Err(ParameterError::NonFiniteValue {
                name: self.name.clone(),
            });
        }
        if !self.bounds.contains(value) {
            return Err(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            }
            .into());
        }
        self.value = value;
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    pub fn max(&self) -> f64 {
        self.bounds.max
    }

    /// Replace the bounds; the current value is clamped into the new interval.
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), ParameterError> {
        self.bounds = Bounds::new(min, max)?;
        self.value = self.bounds.clamp(self.value);
        Ok(())
    }

    pub fn is_free(&self) -> bool {
        !self.fixed
    }

    pub fn transform(&self) -> BoundsTransform {
        BoundsTransform::new(self.bounds)
    }

    /// Internal (unbounded) coordinate of the current value.
    pub fn to_internal(&self) -> Result<f64, ParameterError> {
        Ok(self.transform().to_internal(self.value)?)
    }

    /// Set the value from an internal coordinate. The result always lies
    /// within the bounds.
    pub fn set_from_internal(&mut self, internal: f64) {
        self.value = self.bounds.clamp(self.transform().to_external(internal));
    }

    /// Check that a free parameter is usable as a minimizer start point.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if !self.value.is_finite() {
            return Err(ParameterError::NonFiniteValue {
                name: self.name.clone(),
            });
        }
        if !self.bounds.contains(self.value) {
            return Err(BoundsError::ValueOutsideBounds {
                value: self.value,
                min: self.bounds.min,
                max: self.bounds.max,
            }
            .into());
        }
        if self.is_free() && (self.step == 0.0 || !self.step.is_finite()) {
            return Err(ParameterError::InvalidStep {
                name: self.name.clone(),
                step: self.step,
            });
        }
        Ok(())
    }
}
