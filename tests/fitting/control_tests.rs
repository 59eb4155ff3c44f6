//! Cancellation and timeouts end a fit with the last accepted parameters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use approx::assert_relative_eq;
use musrfit_rs::accel::BackendKind;
use musrfit_rs::fitter::{CancelToken, FitCommand, FitState};
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::theory::{Arity, GlobalPart, TheoryFunction};
use musrfit_rs::{DataBlock, FitConfig, FitSession, FitStatus};

use crate::test_helpers::{block_from, times};

fn decay_block(theory: &[&str]) -> DataBlock {
    let t = times(80, 0.05);
    block_from("run", theory, &t, |t| 0.25 * (-0.7 * t).exp(), 0.003, None)
}

fn table() -> ParameterTable {
    ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.2, 0.01),
        Parameter::with_bounds("Lambda", 1.5, 0.05, 0.0, 20.0).unwrap(),
    ])
    .unwrap()
}

/// Bounded values pass through the internal transform, so compare loosely.
fn assert_start_values(table: &ParameterTable) {
    let values = table.snapshot();
    assert_relative_eq!(values[0], 0.2, epsilon = 1e-12);
    assert_relative_eq!(values[1], 1.5, epsilon = 1e-12);
}

fn serial() -> FitConfig {
    FitConfig::default().with_backend(BackendKind::Serial)
}

/// exp(-λt) that pulls the cancel token after a number of calls.
struct CancellingExpo {
    calls: AtomicUsize,
    after: usize,
    token: OnceLock<CancelToken>,
}

impl TheoryFunction for CancellingExpo {
    fn name(&self) -> &str {
        "cancellingExpo"
    }

    fn parameter_names(&self) -> &[&str] {
        &["rate"]
    }

    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn evaluate(&self, t: f64, args: &[f64], _global: Option<&GlobalPart>) -> f64 {
        if self.calls.fetch_add(1, Ordering::Relaxed) + 1 == self.after {
            if let Some(token) = self.token.get() {
                token.cancel();
            }
        }
        (-args[0] * t).exp()
    }
}

#[test]
fn test_cancelled_before_start() {
    let mut session = FitSession::builder(table())
        .block(decay_block(&["asymmetry 1", "simplExpo 2"]))
        .config(serial())
        .build()
        .unwrap();
    session.cancel_token().cancel();
    let result = session.fit().unwrap();

    assert_eq!(result.status, FitStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some("fit cancelled"));
    assert_start_values(&result.parameters);
    assert_eq!(result.states.last(), Some(&FitState::Done));
    assert!(result.states.contains(&FitState::Failed));
    assert!(result.error_estimate.is_none());
}

#[test]
fn test_cancelled_during_minimization() {
    let expo = Arc::new(CancellingExpo {
        calls: AtomicUsize::new(0),
        // during the fifth evaluation of the 80 samples
        after: 80 * 5,
        token: OnceLock::new(),
    });
    let mut session = FitSession::builder(table())
        .register(expo.clone())
        .unwrap()
        .block(decay_block(&["asymmetry 1", "cancellingExpo 2"]))
        .config(serial().with_commands(vec![FitCommand::Migrad, FitCommand::Hesse, FitCommand::Minos]))
        .build()
        .unwrap();
    let _ = expo.token.set(session.cancel_token());
    let result = session.fit().unwrap();

    assert_eq!(result.status, FitStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some("fit cancelled"));
    // later commands are not run
    assert!(!result.states.contains(&FitState::ErrorEstimation));
    let values = result.parameters.snapshot();
    assert!(values.iter().all(|v| v.is_finite()));
    assert!(result.objective.is_finite());
}

#[test]
fn test_timeout() {
    let mut session = FitSession::builder(table())
        .block(decay_block(&["asymmetry 1", "simplExpo 2"]))
        .config(serial().with_timeout(Duration::ZERO))
        .build()
        .unwrap();
    let result = session.fit().unwrap();

    assert_eq!(result.status, FitStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some("fit timed out"));
    assert_start_values(&result.parameters);
}

#[test]
fn test_timeout_in_simplex() {
    let mut session = FitSession::builder(table())
        .block(decay_block(&["asymmetry 1", "simplExpo 2"]))
        .config(
            serial()
                .with_timeout(Duration::ZERO)
                .with_commands(vec![FitCommand::Simplex]),
        )
        .build()
        .unwrap();
    let result = session.fit().unwrap();
    assert_eq!(result.status, FitStatus::Failed);
    assert_eq!(result.cause.as_deref(), Some("fit timed out"));
}
