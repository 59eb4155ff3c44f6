//! The objective seen from the minimizers.
//!
//! Minimizers work on the free parameters only, in unbounded internal
//! coordinates (see [`BoundsTransform`]). `FitProblem` maps an internal
//! vector back onto a full parameter snapshot, with fixed parameters taken
//! unchanged from the table, and evaluates the [`Objective`] there.

use ndarray::Array1;

use crate::error::{MusrFitError, Result};
use crate::objective::{Objective, ObjectiveValue};
use crate::parameters::{BoundsTransform, ParameterTable};
use crate::problem::Problem;

/// Free-parameter view of an objective.
pub struct FitProblem<'a> {
    objective: &'a Objective,
    /// Snapshot of all parameter values; fixed entries are read from here
    base: Vec<f64>,
    /// Zero-based table indices of the free parameters
    free: Vec<usize>,
    names: Vec<String>,
    transforms: Vec<BoundsTransform>,
    /// Initial steps in internal coordinates
    steps: Vec<f64>,
    start: Array1<f64>,
}

impl<'a> FitProblem<'a> {
    /// Build the view for the current table state.
    ///
    /// # Errors
    ///
    /// A free parameter whose value lies outside its bounds.
    pub fn new(objective: &'a Objective, table: &ParameterTable) -> Result<Self> {
        Self::with_free(objective, table, table.free_indices())
    }

    /// Build the view with an explicit set of free parameters (used by
    /// profiling, which holds one otherwise-free parameter fixed).
    pub fn with_free(objective: &'a Objective, table: &ParameterTable, free: Vec<usize>) -> Result<Self> {
        if table.len() != objective.n_params() {
            return Err(MusrFitError::DimensionMismatch(format!(
                "objective expects {} parameters, table has {}",
                objective.n_params(),
                table.len()
            )));
        }
        let params = table.parameters();
        let mut names = Vec::with_capacity(free.len());
        let mut transforms = Vec::with_capacity(free.len());
        let mut steps = Vec::with_capacity(free.len());
        let mut start = Vec::with_capacity(free.len());
        for &i in &free {
            let param = &params[i];
            let transform = param.transform();
            let internal = param.to_internal()?;
            let slope = transform.derivative(internal).abs();
            let step = if slope > 1e-8 { param.step.abs() / slope } else { param.step.abs() };
            let step = if param.bounds().is_unbounded() { step } else { step.min(1.0) };
            names.push(param.name.clone());
            transforms.push(transform);
            steps.push(step);
            start.push(internal);
        }
        Ok(Self {
            objective,
            base: table.snapshot(),
            free,
            names,
            transforms,
            steps,
            start: Array1::from_vec(start),
        })
    }

    pub fn objective(&self) -> &Objective {
        self.objective
    }

    /// Zero-based table indices of the free parameters.
    pub fn free(&self) -> &[usize] {
        &self.free
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// Internal coordinates of the table's current values.
    pub fn start(&self) -> &Array1<f64> {
        &self.start
    }

    /// Initial step of each free parameter in internal coordinates.
    pub fn internal_steps(&self) -> &[f64] {
        &self.steps
    }

    /// External values of the free parameters.
    pub fn free_values(&self, internal: &Array1<f64>) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(internal.iter())
            .map(|(t, &u)| t.to_external(u))
            .collect()
    }

    /// Full parameter vector (table order) for an internal point.
    pub fn full_values(&self, internal: &Array1<f64>) -> Vec<f64> {
        let mut values = self.base.clone();
        for ((&i, t), &u) in self.free.iter().zip(&self.transforms).zip(internal.iter()) {
            values[i] = t.to_external(u);
        }
        values
    }

    /// d(external)/d(internal) for each free parameter.
    pub fn derivatives(&self, internal: &Array1<f64>) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(internal.iter())
            .map(|(t, &u)| t.derivative(u))
            .collect()
    }

    /// Objective value with per-block breakdown.
    pub fn evaluate(&self, internal: &Array1<f64>) -> Result<ObjectiveValue> {
        self.objective.evaluate(&self.full_values(internal))
    }

    /// Scalar objective (χ² or −ln L up to a constant).
    pub fn value(&self, internal: &Array1<f64>) -> Result<f64> {
        self.objective.value(&self.full_values(internal))
    }
}

impl Problem for FitProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != self.free.len() {
            return Err(MusrFitError::DimensionMismatch(format!(
                "Expected {} free parameters, got {}",
                self.free.len(),
                params.len()
            )));
        }
        Ok(Array1::from_vec(self.evaluate(params)?.flat_residuals()))
    }

    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn residual_count(&self) -> usize {
        self.objective.n_residuals()
    }

    fn difference_steps(&self, params: &Array1<f64>) -> Array1<f64> {
        let scale = f64::EPSILON.sqrt();
        params
            .iter()
            .zip(&self.steps)
            .map(|(&u, &step)| scale * u.abs().max(step).max(scale))
            .collect()
    }
}
