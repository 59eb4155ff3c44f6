//! Accelerated block evaluation must agree with the serial path

use std::sync::Arc;

use musrfit_rs::accel::{AccelerationError, BackendKind, EvaluationBackend, SerialBackend};
use musrfit_rs::binding::MapEntry;
use musrfit_rs::block::{BlockInputs, BlockOutput, PreparedBlock};
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::{DataBlock, FitConfig, FitResult, FitSession};

use crate::test_helpers::{block_from, rng, times};

/// Eight decay runs sharing the rate, each with its own asymmetry.
fn blocks() -> Vec<DataBlock> {
    let mut rng = rng(3);
    let t = times(250, 0.04);
    (0..8)
        .map(|i| {
            let asy = 0.15 + 0.01 * i as f64;
            block_from(
                &format!("det {}", i),
                &["asymmetry map1", "simplExpo 1"],
                &t,
                |t| asy * (-0.9 * t).exp(),
                0.004,
                Some(&mut rng),
            )
            .with_map(vec![MapEntry::Param(i + 2)])
        })
        .collect()
}

fn table() -> ParameterTable {
    let mut params = vec![Parameter::with_bounds("Lambda", 0.5, 0.05, 0.0, 20.0).unwrap()];
    params.extend((0..8).map(|i| Parameter::new(&format!("Asy_{}", i), 0.2, 0.01)));
    ParameterTable::from_parameters(params).unwrap()
}

fn fit_with(config: FitConfig, backend: Option<Arc<dyn EvaluationBackend>>) -> FitResult {
    let mut builder = FitSession::builder(table()).blocks(blocks()).config(config);
    if let Some(backend) = backend {
        builder = builder.backend(backend);
    }
    builder.build().unwrap().fit().unwrap()
}

/// Serial results with every block value scaled.
struct Skewed(f64);

impl EvaluationBackend for Skewed {
    fn name(&self) -> &str {
        "skewed"
    }

    fn evaluate(
        &self,
        blocks: &[PreparedBlock],
        inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError> {
        let mut outputs = SerialBackend::run(blocks, inputs);
        for output in &mut outputs {
            output.value *= self.0;
        }
        Ok(outputs)
    }
}

/// Correct block values, every residual shifted.
struct ShiftedResiduals;

impl EvaluationBackend for ShiftedResiduals {
    fn name(&self) -> &str {
        "shifted-residuals"
    }

    fn evaluate(
        &self,
        blocks: &[PreparedBlock],
        inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError> {
        let mut outputs = SerialBackend::run(blocks, inputs);
        for output in &mut outputs {
            for r in &mut output.residuals {
                *r += 5.0;
            }
        }
        Ok(outputs)
    }
}

struct Broken;

impl EvaluationBackend for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn evaluate(
        &self,
        _blocks: &[PreparedBlock],
        _inputs: &[BlockInputs],
    ) -> Result<Vec<BlockOutput>, AccelerationError> {
        Err(AccelerationError::Unavailable {
            backend: "broken".to_string(),
            reason: "no device".to_string(),
        })
    }
}

#[test]
fn test_parallel_matches_serial_exactly() {
    let serial = fit_with(FitConfig::default().with_backend(BackendKind::Serial), None);
    let parallel = fit_with(
        FitConfig::default()
            .with_backend(BackendKind::Parallel)
            .with_threads(4)
            .with_verification(1e-12, 1),
        None,
    );

    assert!(serial.is_converged() && parallel.is_converged());
    assert_eq!(serial.backend, "serial");
    assert!(parallel.backend_fallback.is_none());
    assert_eq!(serial.parameters.snapshot(), parallel.parameters.snapshot());
    assert_eq!(serial.objective, parallel.objective);
    assert_eq!(serial.errors, parallel.errors);
    assert_eq!(serial.iterations, parallel.iterations);
}

#[test]
fn test_diverging_backend_falls_back_to_serial() {
    let reference = fit_with(FitConfig::default().with_backend(BackendKind::Serial), None);
    let result = fit_with(FitConfig::default(), Some(Arc::new(Skewed(1.01))));

    assert!(result.is_converged());
    assert_eq!(result.backend, "serial");
    let fallback = result.backend_fallback.as_deref().unwrap();
    assert!(fallback.contains("skewed"), "{}", fallback);
    // the serial values were used from the first evaluation on
    assert_eq!(result.parameters.snapshot(), reference.parameters.snapshot());
    assert_eq!(result.objective, reference.objective);
}

#[test]
fn test_failing_backend_falls_back_to_serial() {
    let reference = fit_with(FitConfig::default().with_backend(BackendKind::Serial), None);
    let result = fit_with(FitConfig::default(), Some(Arc::new(Broken)));

    assert!(result.is_converged());
    assert_eq!(result.backend, "serial");
    assert!(result.backend_fallback.unwrap().contains("no device"));
    assert_eq!(result.parameters.snapshot(), reference.parameters.snapshot());
}

#[test]
fn test_tolerated_difference_keeps_backend() {
    let result = fit_with(
        FitConfig::default().with_verification(1e-6, 1),
        Some(Arc::new(Skewed(1.0 + 1e-9))),
    );
    assert!(result.is_converged());
    assert_eq!(result.backend, "skewed");
    assert!(result.backend_fallback.is_none());
}

#[test]
fn test_diverging_residuals_fall_back_to_serial() {
    let reference = fit_with(FitConfig::default().with_backend(BackendKind::Serial), None);
    let result = fit_with(
        FitConfig::default().with_verification(1e-9, 1),
        Some(Arc::new(ShiftedResiduals)),
    );

    assert!(result.is_converged());
    assert_eq!(result.backend, "serial");
    let fallback = result.backend_fallback.as_deref().unwrap();
    assert!(fallback.contains("shifted-residuals"), "{}", fallback);
    assert!(fallback.contains("residual 0"), "{}", fallback);
    assert_eq!(result.parameters.snapshot(), reference.parameters.snapshot());
    assert_eq!(result.objective, reference.objective);
}
