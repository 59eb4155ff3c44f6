//! Parameter bounds and the Minuit-style internal/external transformation
//!
//! Minimizers work on unbounded "internal" coordinates. A parameter with a
//! lower and/or upper limit is mapped onto its allowed interval with the
//! transformations used by MINUIT:
//!
//! - two-sided: `ext = min + (sin(int) + 1) (max - min) / 2`
//! - lower only: `ext = min - 1 + sqrt(int² + 1)`
//! - upper only: `ext = max + 1 - sqrt(int² + 1)`

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: lower ({min}) must not exceed upper ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Value {value} is outside bounds [{min}, {max}]")]
    ValueOutsideBounds { value: f64, min: f64, max: f64 },

    #[error("Non-finite parameter value is not allowed")]
    NonFiniteValue,
}

/// Lower/upper limits of a parameter. Infinite values mean "no limit" and are
/// written as `null` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(with = "lower_limit", default = "neg_infinity")]
    pub min: f64,

    #[serde(with = "upper_limit", default = "pos_infinity")]
    pub max: f64,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn pos_infinity() -> f64 {
    f64::INFINITY
}

mod lower_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
    }
}

mod upper_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Bounds {
    /// Create bounds `[min, max]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::bounds::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 1.0).unwrap();
    /// assert!(bounds.contains(0.5));
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// No limits in either direction.
    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Only a lower limit.
    pub fn lower(min: f64) -> Self {
        Self {
            min,
            max: f64::INFINITY,
        }
    }

    /// Only an upper limit.
    pub fn upper(max: f64) -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn has_lower(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper(&self) -> bool {
        self.max.is_finite()
    }

    pub fn is_unbounded(&self) -> bool {
        !self.has_lower() && !self.has_upper()
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Which of the three MINUIT transformations applies.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Free,
    Lower(f64),
    Upper(f64),
    Double(f64, f64),
}

/// Maps between the minimizer's unbounded internal coordinate and the
/// bounded external parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsTransform {
    kind: Kind,
}

impl BoundsTransform {
    pub fn new(bounds: Bounds) -> Self {
        let kind = match (bounds.has_lower(), bounds.has_upper()) {
            (false, false) => Kind::Free,
            (true, false) => Kind::Lower(bounds.min),
            (false, true) => Kind::Upper(bounds.max),
            (true, true) => Kind::Double(bounds.min, bounds.max),
        };
        Self { kind }
    }

    /// Internal (unbounded) coordinate to external parameter value.
    pub fn to_external(&self, internal: f64) -> f64 {
        match self.kind {
            Kind::Free => internal,
            Kind::Lower(min) => min - 1.0 + (internal * internal + 1.0).sqrt(),
            Kind::Upper(max) => max + 1.0 - (internal * internal + 1.0).sqrt(),
            Kind::Double(min, max) => min + (internal.sin() + 1.0) * 0.5 * (max - min),
        }
    }

    /// External parameter value to internal coordinate.
    ///
    /// Fails for values outside the bounds or non-finite values.
    pub fn to_internal(&self, external: f64) -> Result<f64, BoundsError> {
        if !external.is_finite() {
            return Err(BoundsError::NonFiniteValue);
        }
        match self.kind {
            Kind::Free => Ok(external),
            Kind::Lower(min) => {
                if external < min {
                    return Err(BoundsError::ValueOutsideBounds {
                        value: external,
                        min,
                        max: f64::INFINITY,
                    });
                }
                Ok(((external - min + 1.0).powi(2) - 1.0).sqrt())
            }
            Kind::Upper(max) => {
                if external > max {
                    return Err(BoundsError::ValueOutsideBounds {
                        value: external,
                        min: f64::NEG_INFINITY,
                        max,
                    });
                }
                Ok(((max - external + 1.0).powi(2) - 1.0).sqrt())
            }
            Kind::Double(min, max) => {
                if external < min || external > max {
                    return Err(BoundsError::ValueOutsideBounds {
                        value: external,
                        min,
                        max,
                    });
                }
                if max == min {
                    return Ok(0.0);
                }
                let scaled = (2.0 * (external - min) / (max - min) - 1.0).clamp(-1.0, 1.0);
                Ok(scaled.asin())
            }
        }
    }

    /// Derivative d(external)/d(internal) at the given internal coordinate.
    ///
    /// Used to carry covariance matrices from internal to external space.
    pub fn derivative(&self, internal: f64) -> f64 {
        match self.kind {
            Kind::Free => 1.0,
            Kind::Lower(_) => internal / (internal * internal + 1.0).sqrt(),
            Kind::Upper(_) => -internal / (internal * internal + 1.0).sqrt(),
            Kind::Double(min, max) => 0.5 * (max - min) * internal.cos(),
        }
    }
}
