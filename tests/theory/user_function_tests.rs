//! Functions supplied by the caller next to the built-ins

use std::sync::Arc;

use approx::assert_relative_eq;
use musrfit_rs::binding::BindingError;
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::theory::{Arity, GlobalPart, TheoryFunction};
use musrfit_rs::{FitConfig, FitSession, MusrFitError};

use crate::test_helpers::{block_from, times};

/// Linear background `offset + slope·t`.
struct Ramp;

impl TheoryFunction for Ramp {
    fn name(&self) -> &str {
        "Ramp"
    }

    fn parameter_names(&self) -> &[&str] {
        &["offset", "slope"]
    }

    fn arity(&self) -> Arity {
        Arity::Exact(2)
    }

    fn evaluate(&self, t: f64, args: &[f64], _global: Option<&GlobalPart>) -> f64 {
        args[0] + args[1] * t
    }
}

/// exp(-λt) with λ precomputed into the global part.
struct TabulatedExpo;

struct Rate(f64);

impl TheoryFunction for TabulatedExpo {
    fn name(&self) -> &str {
        "TabulatedExpo"
    }

    fn abbreviation(&self) -> Option<&str> {
        Some("tex")
    }

    fn parameter_names(&self) -> &[&str] {
        &["rate"]
    }

    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn evaluate(&self, t: f64, args: &[f64], global: Option<&GlobalPart>) -> f64 {
        let rate = global
            .and_then(|g| g.downcast_ref::<Rate>())
            .map_or(args[0], |r| r.0);
        (-rate * t).exp()
    }

    fn needs_global_part(&self) -> bool {
        true
    }

    fn compute_global_part(&self, args: &[f64]) -> Option<GlobalPart> {
        Some(Arc::new(Rate(args[0])))
    }
}

#[test]
fn test_fit_with_user_function() {
    let t = times(60, 0.1);
    let block = block_from(
        "background",
        &["userFcn libramp.so Ramp 1 2"],
        &t,
        |t| 0.05 + 0.02 * t,
        0.001,
        None,
    );
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Offset", 0.0, 0.01),
        Parameter::new("Slope", 0.0, 0.01),
    ])
    .unwrap();

    let mut session = FitSession::builder(table)
        .register(Arc::new(Ramp))
        .unwrap()
        .block(block)
        .config(FitConfig::default())
        .build()
        .unwrap();
    let result = session.fit().unwrap();
    assert!(result.is_converged());
    assert_relative_eq!(result.value_of("Offset").unwrap(), 0.05, epsilon = 1e-6);
    assert_relative_eq!(result.value_of("Slope").unwrap(), 0.02, epsilon = 1e-6);
}

#[test]
fn test_user_function_global_part_and_abbreviation() {
    let t = times(80, 0.05);
    let block = block_from("run 5", &["asymmetry 1", "tex 2"], &t, |t| 0.2 * (-1.3 * t).exp(), 0.002, None);
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.15, 0.01),
        Parameter::with_bounds("Lambda", 1.0, 0.1, 0.0, 20.0).unwrap(),
    ])
    .unwrap();

    let mut session = FitSession::builder(table)
        .register(Arc::new(TabulatedExpo))
        .unwrap()
        .block(block)
        .build()
        .unwrap();
    let result = session.fit().unwrap();
    assert!(result.is_converged());
    assert_relative_eq!(result.value_of("Lambda").unwrap(), 1.3, epsilon = 1e-6);
    assert!(session.objective().blocks()[0].global_part_recomputations() > 1);
}

#[test]
fn test_user_function_cannot_shadow_builtin() {
    struct Shadow;
    impl TheoryFunction for Shadow {
        fn name(&self) -> &str {
            "SimplExpo"
        }
        fn parameter_names(&self) -> &[&str] {
            &["rate"]
        }
        fn arity(&self) -> Arity {
            Arity::Exact(1)
        }
        fn evaluate(&self, _t: f64, _args: &[f64], _global: Option<&GlobalPart>) -> f64 {
            0.0
        }
    }

    let table = ParameterTable::from_parameters(vec![Parameter::new("Rate", 1.0, 0.1)]).unwrap();
    let result = FitSession::builder(table).register(Arc::new(Shadow));
    assert!(matches!(
        result,
        Err(MusrFitError::Binding(BindingError::DuplicateFunction { .. }))
    ));
}

#[test]
fn test_unregistered_user_function_fails_at_setup() {
    let t = times(10, 0.1);
    let block = block_from("run 6", &["userFcn libramp.so Ramp 1 2"], &t, |_| 0.0, 0.01, None);
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Offset", 0.0, 0.01),
        Parameter::new("Slope", 0.0, 0.01),
    ])
    .unwrap();
    let result = FitSession::builder(table).block(block).build();
    match result {
        Err(MusrFitError::Binding(BindingError::InBlock { block, source })) => {
            assert_eq!(block, "run 6");
            assert!(matches!(*source, BindingError::UnknownFunction { .. }));
        }
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("setup should fail"),
    }
}
