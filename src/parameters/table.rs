//! The parameter table
//!
//! `ParameterTable` is the authoritative, ordered list of fit parameters.
//! Parameters are referenced by their 1-based number (as in the theory and
//! map descriptions) or by name (case-insensitive). Every objective
//! evaluation reads an immutable value snapshot taken from the table; the
//! minimizer writes back only the free entries.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parameters::parameter::{Parameter, ParameterError};

/// Ordered collection of uniquely named parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    parameters: Vec<Parameter>,
}

impl ParameterTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a list of parameters, checking name uniqueness.
    pub fn from_parameters(parameters: Vec<Parameter>) -> std::result::Result<Self, ParameterError> {
        let mut table = Self::new();
        for param in parameters {
            table.add(param)?;
        }
        Ok(table)
    }

    /// Append a parameter and return its 1-based number.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::{Parameter, ParameterTable};
    ///
    /// let mut table = ParameterTable::new();
    /// assert_eq!(table.add(Parameter::new("Asy", 0.2, 0.01)).unwrap(), 1);
    /// assert!(table.add(Parameter::new("ASY", 0.1, 0.01)).is_err());
    /// ```
    pub fn add(&mut self, param: Parameter) -> std::result::Result<usize, ParameterError> {
        if self.position(&param.name).is_some() {
            return Err(ParameterError::DuplicateName { name: param.name });
        }
        self.parameters.push(param);
        Ok(self.parameters.len())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Zero-based index of the parameter with this name (case-insensitive).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// 1-based parameter number for a name.
    pub fn number_of(&self, name: &str) -> std::result::Result<usize, ParameterError> {
        self.position(name)
            .map(|i| i + 1)
            .ok_or_else(|| ParameterError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|i| &self.parameters[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.position(name).map(move |i| &mut self.parameters[i])
    }

    /// Access by 1-based number.
    pub fn by_number(&self, number: usize) -> std::result::Result<&Parameter, ParameterError> {
        number
            .checked_sub(1)
            .and_then(|i| self.parameters.get(i))
            .ok_or(ParameterError::NumberOutOfRange {
                number,
                len: self.parameters.len(),
            })
    }

    fn by_number_mut(&mut self, number: usize) -> std::result::Result<&mut Parameter, ParameterError> {
        let len = self.parameters.len();
        number
            .checked_sub(1)
            .and_then(move |i| self.parameters.get_mut(i))
            .ok_or(ParameterError::NumberOutOfRange { number, len })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Current values of all parameters, in table order.
    pub fn snapshot(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::value).collect()
    }

    /// Zero-based indices of the free parameters, in table order.
    pub fn free_indices(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_free())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn n_free(&self) -> usize {
        self.parameters.iter().filter(|p| p.is_free()).count()
    }

    /// Write values for the free parameters (one value per entry of
    /// `free_indices`, same order). Fixed entries are never touched.
    pub fn update_free(&mut self, free_indices: &[usize], values: &[f64]) -> Result<()> {
        if free_indices.len() != values.len() {
            return Err(crate::error::MusrFitError::DimensionMismatch(format!(
                "Expected {} free values, got {}",
                free_indices.len(),
                values.len()
            )));
        }
        for (&idx, &value) in free_indices.iter().zip(values) {
            let param = &mut self.parameters[idx];
            if param.fixed {
                continue;
            }
            param.set_value(value)?;
        }
        Ok(())
    }

    /// Fix a parameter by 1-based number.
    pub fn fix(&mut self, number: usize) -> std::result::Result<(), ParameterError> {
        self.by_number_mut(number)?.fixed = true;
        Ok(())
    }

    /// Release a parameter by 1-based number.
    ///
    /// Parameters with a zero step stay fixed: they were declared as
    /// constants and have no usable step for the minimizer.
    pub fn release(&mut self, number: usize) -> std::result::Result<bool, ParameterError> {
        let param = self.by_number_mut(number)?;
        if param.step == 0.0 {
            log::warn!(
                "parameter {} ({}) has zero step and stays fixed",
                number,
                param.name
            );
            return Ok(false);
        }
        param.fixed = false;
        Ok(true)
    }

    /// Release every fixed parameter that has a usable step.
    pub fn restore_all(&mut self) -> usize {
        let fixed: Vec<usize> = self
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.fixed)
            .map(|(i, _)| i + 1)
            .collect();
        fixed
            .into_iter()
            .filter(|&number| matches!(self.release(number), Ok(true)))
            .count()
    }

    /// Store symmetric errors, one entry per parameter in table order.
    pub fn set_errors(&mut self, errors: &[Option<f64>]) {
        for (param, error) in self.parameters.iter_mut().zip(errors) {
            param.error = *error;
        }
    }

    pub(crate) fn set_asymmetric_error(&mut self, index: usize, errors: Option<(f64, f64)>) {
        if let Some(param) = self.parameters.get_mut(index) {
            param.asymmetric_error = errors;
        }
    }

    /// Check every parameter is a valid start point.
    pub fn validate(&self) -> std::result::Result<(), ParameterError> {
        self.parameters.iter().try_for_each(Parameter::validate)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a table from JSON. Name uniqueness is re-checked.
    ///
    /// # Examples
    ///
    /// ```
    /// use musrfit_rs::parameters::ParameterTable;
    ///
    /// let json = r#"{
    ///   "parameters": [
    ///     { "name": "Asy", "value": 0.25, "step": 0.01, "bounds": { "min": 0.0, "max": null } },
    ///     { "name": "field", "value": 100.0, "step": 0.0, "fixed": true }
    ///   ]
    /// }"#;
    /// let table = ParameterTable::from_json(json).unwrap();
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.n_free(), 1);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: ParameterTable = serde_json::from_str(json)?;
        Ok(Self::from_parameters(raw.parameters)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_json(&contents)
    }
}
