//! Fits that link one parameter table to several blocks

use approx::assert_relative_eq;
use musrfit_rs::accel::{BackendKind, Dispatcher};
use musrfit_rs::binding::{FunctionTable, MapEntry};
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::{
    DataBlock, FitConfig, FitResult, FitSession, FitStatistic, FitStatus, Objective,
    TheoryExpression, TheoryRegistry,
};

use crate::test_helpers::{block_from, rng, tf_gauss, times};

const TF_THEORY: &[&str] = &["asymmetry map1", "TFieldCos 2 map2", "simpleGss 1"];

/// Two transverse-field runs at different fields with a common Gaussian
/// width: par1 Sigma, par2 Phase (fixed), then (Asy, Freq) per run.
fn tf_blocks(seed: u64) -> Vec<DataBlock> {
    let mut rng = rng(seed);
    let t = times(400, 0.02);
    let runs = [(0.22, 1.355), (0.18, 2.71)];
    runs.iter()
        .enumerate()
        .map(|(i, &(asy, nu))| {
            let map = MapEntry::parse_list(&format!("{} {}", 3 + 2 * i, 4 + 2 * i)).unwrap();
            block_from(&format!("run {}", i + 1), TF_THEORY, &t, tf_gauss(asy, nu, 0.3), 0.005, Some(&mut rng))
                .with_map(map)
        })
        .collect()
}

fn tf_table() -> ParameterTable {
    ParameterTable::from_parameters(vec![
        Parameter::with_bounds("Sigma", 0.25, 0.02, 0.0, 5.0).unwrap(),
        Parameter::fixed("Phase", 0.0),
        Parameter::new("Asy_1", 0.2, 0.01),
        Parameter::new("Freq_1", 1.35, 0.005),
        Parameter::new("Asy_2", 0.2, 0.01),
        Parameter::new("Freq_2", 2.715, 0.005),
    ])
    .unwrap()
}

fn fit(table: ParameterTable, blocks: Vec<DataBlock>, functions: FunctionTable) -> FitResult {
    let mut session = FitSession::builder(table)
        .blocks(blocks)
        .functions(functions)
        .config(FitConfig::default().with_backend(BackendKind::Serial))
        .build()
        .unwrap();
    session.fit().unwrap()
}

/// |fitted - truth| within four standard errors.
fn assert_recovered(result: &FitResult, name: &str, truth: f64) {
    let value = result.value_of(name).unwrap();
    let error = result.error_of(name).unwrap();
    assert!(error > 0.0, "{} has no error", name);
    assert!(
        (value - truth).abs() < 4.0 * error,
        "{} = {} ± {}, expected {}",
        name,
        value,
        error,
        truth
    );
}

#[test]
fn test_shared_width_recovered_from_two_runs() {
    let result = fit(tf_table(), tf_blocks(7), FunctionTable::new());
    assert!(result.is_converged(), "{}", result);

    assert_recovered(&result, "Sigma", 0.3);
    assert_recovered(&result, "Asy_1", 0.22);
    assert_recovered(&result, "Freq_1", 1.355);
    assert_recovered(&result, "Asy_2", 0.18);
    assert_recovered(&result, "Freq_2", 2.71);

    assert_eq!(result.per_block.len(), 2);
    assert_eq!(result.ndf, 800 - 5);
    let chi2_per_ndf = result.reduced_chi_square().unwrap();
    assert!(chi2_per_ndf > 0.8 && chi2_per_ndf < 1.2, "χ²/ndf = {}", chi2_per_ndf);

    // the total is the sum of the blocks
    let sum: f64 = result.per_block.iter().map(|b| b.value).sum();
    assert_relative_eq!(sum, result.objective, max_relative = 1e-12);
}

#[test]
fn test_unshared_width_cannot_fit_worse() {
    let shared = fit(tf_table(), tf_blocks(11), FunctionTable::new());

    // same data, each run with its own width through a third map entry
    let theory = &["asymmetry map1", "TFieldCos 2 map2", "simpleGss map3"];
    let blocks: Vec<DataBlock> = tf_blocks(11)
        .into_iter()
        .enumerate()
        .map(|(i, mut block)| {
            block.theory = TheoryExpression::from_lines(theory).unwrap();
            let map = if i == 0 { "3 4 1" } else { "5 6 7" };
            block.with_map(MapEntry::parse_list(map).unwrap())
        })
        .collect();
    let mut table = tf_table();
    table
        .add(Parameter::with_bounds("Sigma_2", 0.25, 0.02, 0.0, 5.0).unwrap())
        .unwrap();
    let unshared = fit(table, blocks, FunctionTable::new());

    assert!(shared.is_converged() && unshared.is_converged());
    assert_eq!(unshared.ndf, shared.ndf - 1);
    assert!(unshared.objective <= shared.objective + 1e-6);
    // both widths are compatible with the shared one
    assert_recovered(&unshared, "Sigma", 0.3);
    assert_recovered(&unshared, "Sigma_2", 0.3);
}

#[test]
fn test_functions_link_blocks() {
    // the second run sees half the asymmetry of the first
    let t = times(100, 0.05);
    let first = block_from("forward", &["asymmetry 1", "simplExpo 2"], &t, |t| 0.24 * (-0.6 * t).exp(), 0.002, None);
    let second = block_from("backward", &["asymmetry fun1", "simplExpo 2"], &t, |t| 0.12 * (-0.6 * t).exp(), 0.002, None)
        .with_map(MapEntry::parse_list("0.5").unwrap());
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.2, 0.01),
        Parameter::with_bounds("Lambda", 1.0, 0.05, 0.0, 50.0).unwrap(),
    ])
    .unwrap();
    let functions = FunctionTable::parse(&["fun1 = par1 * map1"]).unwrap();

    let result = fit(table, vec![first, second], functions);
    assert!(result.is_converged());
    assert_relative_eq!(result.value_of("Asy").unwrap(), 0.24, epsilon = 1e-6);
    assert_relative_eq!(result.value_of("Lambda").unwrap(), 0.6, epsilon = 1e-6);
    assert_eq!(result.ndf, 198);
}

#[test]
fn test_fixed_parameters_are_untouched() {
    let t = times(100, 0.05);
    let block = block_from("run", &["asymmetry 1", "simplExpo 2", "+", "asymmetry 3"], &t, |t| {
        0.2 * (-0.6 * t).exp() + 0.013
    }, 0.002, None);
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.2, 0.01),
        Parameter::new("Lambda", 1.0, 0.05),
        Parameter::fixed("Bkg", 0.01),
    ])
    .unwrap();

    let result = fit(table, vec![block], FunctionTable::new());
    assert_eq!(result.value_of("Bkg"), Some(0.01));
    assert_eq!(result.error_of("Bkg"), None);
    assert!(result.parameters.get("Bkg").unwrap().fixed);
    assert_eq!(result.ndf, 98);
    // the wrong background is absorbed, not corrected
    assert!(result.objective > 1.0);
}

#[test]
fn test_bounds_are_respected() {
    let t = times(100, 0.05);
    let block = block_from("run", &["asymmetry 1", "simplExpo 2"], &t, |t| 0.2 * (-0.8 * t).exp(), 0.002, None);
    let table = ParameterTable::from_parameters(vec![
        Parameter::with_bounds("Asy", 0.15, 0.01, 0.1, 0.3).unwrap(),
        Parameter::with_bounds("Lambda", 0.3, 0.05, 0.0, 0.5).unwrap(),
    ])
    .unwrap();

    let result = fit(table, vec![block], FunctionTable::new());
    assert_ne!(result.status, FitStatus::Failed);
    let lambda = result.value_of("Lambda").unwrap();
    let asy = result.value_of("Asy").unwrap();
    assert!((0.0..=0.5).contains(&lambda));
    assert!((0.1..=0.3).contains(&asy));
    // the rate is pushed against its upper bound
    assert!(lambda > 0.49, "Lambda = {}", lambda);
}

/// The same noisy decay, measured twice.
fn twin_blocks(theory: &[&str], maps: [&str; 2]) -> Vec<DataBlock> {
    let t = times(100, 0.05);
    maps.iter()
        .enumerate()
        .map(|(i, map)| {
            block_from(&format!("twin {}", i + 1), theory, &t, |t| 0.2 * (-0.9 * t).exp(), 0.003, Some(&mut rng(17)))
                .with_map(MapEntry::parse_list(map).unwrap())
        })
        .collect()
}

#[test]
fn test_forcing_a_shared_parameter_apart_is_worse() {
    let table = ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.18, 0.01),
        Parameter::with_bounds("Lambda", 1.2, 0.05, 0.0, 20.0).unwrap(),
    ])
    .unwrap();
    let shared = fit(table, twin_blocks(&["asymmetry 1", "simplExpo map1"], ["2", "2"]), FunctionTable::new());
    assert!(shared.is_converged());
    let asy = shared.value_of("Asy").unwrap();
    let lambda = shared.value_of("Lambda").unwrap();

    // the same blocks, but each rate has its own table entry
    let split = Objective::new(
        twin_blocks(&["asymmetry 1", "simplExpo map1"], ["2", "3"]),
        FunctionTable::new(),
        &TheoryRegistry::with_builtins(),
        3,
        FitStatistic::ChiSquare,
        Dispatcher::serial(),
    )
    .unwrap();
    let at_optimum = split.evaluate(&[asy, lambda, lambda]).unwrap();
    assert_relative_eq!(at_optimum.total, shared.objective, max_relative = 1e-12);

    for delta in [0.01, 0.03, 0.1] {
        for (first, second) in [
            (lambda + delta, lambda),
            (lambda, lambda - delta),
            (lambda + delta, lambda - delta),
            (lambda - delta, lambda + delta),
        ] {
            let forced = split.evaluate(&[asy, first, second]).unwrap();
            assert!(
                forced.total > shared.objective,
                "rates ({}, {}) gave {} <= {}",
                first,
                second,
                forced.total,
                shared.objective
            );
        }
    }
}

#[test]
fn test_blocks_sharing_an_index_see_the_same_value() {
    // direct reference, map entry and FUNCTIONS entry all point at par2
    let t = times(50, 0.1);
    let theories: [&[&str]; 3] = [
        &["asymmetry 1", "simplExpo 2"],
        &["asymmetry 1", "simplExpo map1"],
        &["asymmetry 1", "simplExpo fun1"],
    ];
    let blocks: Vec<DataBlock> = theories
        .iter()
        .enumerate()
        .map(|(i, theory)| {
            block_from(&format!("run {}", i + 1), theory, &t, |t| 0.2 * (-0.7 * t).exp(), 0.005, None)
                .with_map(MapEntry::parse_list("2").unwrap())
        })
        .collect();
    let functions = || FunctionTable::parse(&["fun1 = par2"]).unwrap();
    let objective = Objective::new(
        blocks,
        functions(),
        &TheoryRegistry::with_builtins(),
        2,
        FitStatistic::ChiSquare,
        Dispatcher::serial(),
    )
    .unwrap();

    let params = [0.21, 0.734];
    let functions = functions();
    let args: Vec<Vec<f64>> = objective
        .blocks()
        .iter()
        .map(|block| block.prepare(&params, &functions).unwrap().args().to_vec())
        .collect();
    assert_eq!(args[0], vec![0.21, 0.734]);
    assert_eq!(args[1], args[0]);
    assert_eq!(args[2], args[0]);

    // identical data, so identical contributions
    let value = objective.evaluate(&params).unwrap();
    assert!(value.per_block[0].value > 0.0);
    assert_eq!(value.per_block[1].value, value.per_block[0].value);
    assert_eq!(value.per_block[2].value, value.per_block[0].value);
}
