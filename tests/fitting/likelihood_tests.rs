//! Poisson maximum likelihood on single-histogram blocks

use approx::assert_relative_eq;
use musrfit_rs::accel::BackendKind;
use musrfit_rs::binding::ParamRef;
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::theory::{TheoryExpression, MUON_LIFETIME};
use musrfit_rs::{BlockKind, DataBlock, FitConfig, FitSession, FitStatistic};
use statrs::function::gamma::ln_gamma;

use crate::test_helpers::{poisson_counts, rng, times};

const N0: f64 = 40.0;
const BKG: f64 = 0.5;
const ASY: f64 = 0.23;
const LAMBDA: f64 = 0.35;

fn expected_counts(t: f64) -> f64 {
    N0 * (-t / MUON_LIFETIME).exp() * (1.0 + ASY * (-LAMBDA * t).exp()) + BKG
}

/// A low-statistics histogram, where χ² with √N errors is biased.
fn histogram(seed: u64) -> DataBlock {
    let t = times(500, 0.02);
    let counts = poisson_counts(&t, expected_counts, &mut rng(seed));
    let sigma = counts.iter().map(|&n: &f64| n.max(1.0).sqrt()).collect();
    let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2"]).unwrap();
    DataBlock::new("forward", theory, t, counts, sigma)
        .unwrap()
        .with_kind(BlockKind::single_histogram(ParamRef::Param(3), ParamRef::Param(4)))
}

fn table() -> ParameterTable {
    ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.2, 0.01),
        Parameter::with_bounds("Lambda", 0.5, 0.05, 0.0, 10.0).unwrap(),
        Parameter::with_bounds("N0", 35.0, 0.5, 0.0, 1000.0).unwrap(),
        Parameter::new("Bkg", 0.3, 0.05),
    ])
    .unwrap()
}

fn config(statistic: FitStatistic) -> FitConfig {
    FitConfig::default()
        .with_backend(BackendKind::Serial)
        .with_statistic(statistic)
}

#[test]
fn test_likelihood_fit_recovers_histogram_parameters() {
    let mut session = FitSession::builder(table())
        .block(histogram(21))
        .config(config(FitStatistic::MaxLikelihood))
        .build()
        .unwrap();
    assert_eq!(session.objective().up(), 0.5);
    let result = session.fit().unwrap();
    assert!(result.is_converged(), "{}", result);
    assert_eq!(result.statistic, FitStatistic::MaxLikelihood);

    for (name, truth) in [("Asy", ASY), ("Lambda", LAMBDA), ("N0", N0), ("Bkg", BKG)] {
        let value = result.value_of(name).unwrap();
        let error = result.error_of(name).unwrap();
        assert!(
            (value - truth).abs() < 4.0 * error,
            "{} = {} ± {}, expected {}",
            name,
            value,
            error,
            truth
        );
    }
}

#[test]
fn test_likelihood_value_at_known_parameters() {
    let block = histogram(5);
    let counts = block.y.clone();
    let t = block.x.clone();
    let session = FitSession::builder(table())
        .block(block)
        .config(config(FitStatistic::MaxLikelihood))
        .build()
        .unwrap();

    let value = session.evaluate(&[ASY, LAMBDA, N0, BKG]).unwrap();
    let expected: f64 = t
        .iter()
        .zip(&counts)
        .map(|(&t, &d)| {
            let theta = expected_counts(t);
            let d = d.max(1e-9);
            theta - d * theta.ln() + ln_gamma(d + 1.0)
        })
        .sum();
    assert_relative_eq!(value.total, expected, max_relative = 1e-10);

    // Σ r² of the deviance residuals is twice the log-likelihood ratio
    let saturated: f64 = counts
        .iter()
        .map(|&d: &f64| {
            let d = d.max(1e-9);
            d - d * d.ln() + ln_gamma(d + 1.0)
        })
        .sum();
    let squares: f64 = value.flat_residuals().iter().map(|r| r * r).sum();
    assert_relative_eq!(squares, 2.0 * (value.total - saturated), max_relative = 1e-8);
}

#[test]
fn test_likelihood_and_chi_square_agree_at_high_counts() {
    // at high statistics both estimators land on the same rate
    let t = times(300, 0.02);
    let rate = |t: f64| 5000.0 * (-t / MUON_LIFETIME).exp() * (1.0 + 0.2 * (-0.4 * t).exp());
    let counts = poisson_counts(&t, rate, &mut rng(8));
    let sigma: Vec<f64> = counts.iter().map(|&n: &f64| n.max(1.0).sqrt()).collect();
    let block = || {
        let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2"]).unwrap();
        DataBlock::new("hi", theory, t.clone(), counts.clone(), sigma.clone())
            .unwrap()
            .with_kind(BlockKind::single_histogram(ParamRef::Param(3), ParamRef::Constant(0.0)))
    };
    let table = || {
        ParameterTable::from_parameters(vec![
            Parameter::new("Asy", 0.18, 0.01),
            Parameter::with_bounds("Lambda", 0.5, 0.05, 0.0, 10.0).unwrap(),
            Parameter::new("N0", 4900.0, 10.0),
        ])
        .unwrap()
    };

    let fits = [FitStatistic::ChiSquare, FitStatistic::MaxLikelihood].map(|statistic| {
        FitSession::builder(table())
            .block(block())
            .config(config(statistic))
            .build()
            .unwrap()
            .fit()
            .unwrap()
    });
    let [chi2, ml] = &fits;
    assert!(chi2.is_converged() && ml.is_converged());
    let lambda_error = ml.error_of("Lambda").unwrap();
    let difference = (chi2.value_of("Lambda").unwrap() - ml.value_of("Lambda").unwrap()).abs();
    assert!(difference < lambda_error, "{} vs error {}", difference, lambda_error);
}

#[test]
fn test_likelihood_needs_histograms() {
    let t = times(50, 0.1);
    let y: Vec<f64> = t.iter().map(|&t| 0.2 * (-0.5 * t).exp()).collect();
    let theory = TheoryExpression::from_lines(&["asymmetry 1", "simplExpo 2"]).unwrap();
    let block = DataBlock::new("asymmetry", theory, t, y, vec![0.01; 50]).unwrap();
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.2, 0.01),
        Parameter::new("Lambda", 0.5, 0.05),
    ])
    .unwrap();

    let session = FitSession::builder(table)
        .block(block)
        .config(config(FitStatistic::MaxLikelihood))
        .build()
        .unwrap();
    assert_eq!(session.objective().blocks()[0].statistic(), FitStatistic::ChiSquare);
    let value = session.evaluate(&[0.2, 0.5]).unwrap();
    assert!(value.total.abs() < 1e-12);
}
