//! Command lists, fit ranges, degrees of freedom and the result record

use approx::assert_relative_eq;
use musrfit_rs::accel::BackendKind;
use musrfit_rs::block::FitRange;
use musrfit_rs::fitter::{FitCommand, FitState, ParamId, RangeCommand, DEFAULT_SCAN_POINTS};
use musrfit_rs::parameters::{Parameter, ParameterTable};
use musrfit_rs::uncertainty::ErrorMethod;
use musrfit_rs::{DataBlock, FitConfig, FitSession, FitStatus, MusrFitError};

use crate::test_helpers::{block_from, rng, times};

/// 100 samples at t = 0, 0.05, …, 4.95.
fn decay_block(id: &str, noise: u64) -> DataBlock {
    let t = times(100, 0.05);
    block_from(
        id,
        &["asymmetry 1", "simplExpo 2", "+", "asymmetry 3"],
        &t,
        |t| 0.2 * (-0.9 * t).exp() + 0.02,
        0.003,
        Some(&mut rng(noise)),
    )
}

fn table() -> ParameterTable {
    ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.18, 0.01),
        Parameter::with_bounds("Lambda", 1.2, 0.05, 0.0, 20.0).unwrap(),
        Parameter::new("Bkg", 0.0, 0.005),
    ])
    .unwrap()
}

fn fit_session(commands: Vec<FitCommand>, blocks: Vec<DataBlock>) -> FitSession {
    FitSession::builder(table())
        .blocks(blocks)
        .config(
            FitConfig::default()
                .with_backend(BackendKind::Serial)
                .with_commands(commands),
        )
        .build()
        .unwrap()
}

#[test]
fn test_parse_command_block() {
    let commands = FitCommand::parse_block(&[
        "# start with the background fixed",
        "FIX 3, Asy",
        "migrad",
        "",
        "RELEASE bkg",
        "MINIMIZE",
        "HESSE   # parabolic errors",
        "SCAN 2 21 0.5 1.5",
        "SCAN Lambda",
        "FIT_RANGE 0.1 4.0",
        "FIT_RANGE 0.0 2.0 0.5 4.0",
        "FIT_RANGE RESET",
        "RESTORE",
        "MINOS",
        "SAVE",
    ])
    .unwrap();

    assert_eq!(
        commands,
        vec![
            FitCommand::Fix(vec![ParamId::Number(3), ParamId::Name("Asy".into())]),
            FitCommand::Migrad,
            FitCommand::Release(vec![ParamId::Name("bkg".into())]),
            FitCommand::Minimize,
            FitCommand::Hesse,
            FitCommand::Scan {
                param: Some(ParamId::Number(2)),
                points: 21,
                low: Some(0.5),
                high: Some(1.5),
            },
            FitCommand::scan("Lambda"),
            FitCommand::FitRange(RangeCommand::All(FitRange::new(0.1, 4.0).unwrap())),
            FitCommand::FitRange(RangeCommand::PerBlock(vec![
                FitRange::new(0.0, 2.0).unwrap(),
                FitRange::new(0.5, 4.0).unwrap(),
            ])),
            FitCommand::FitRange(RangeCommand::Reset),
            FitCommand::Restore,
            FitCommand::Minos,
            FitCommand::Save,
        ]
    );

    // the printed form parses back to the same command
    for command in &commands {
        let reparsed: FitCommand = command.to_string().parse().unwrap();
        assert_eq!(&reparsed, command);
    }
}

#[test]
fn test_malformed_commands() {
    for line in [
        "MIGRAD 3",
        "FIX",
        "SCAN 2 1",
        "SCAN 2 21 0.5",
        "FIT_RANGE 1.0",
        "FIT_RANGE 5.0 1.0",
        "FIT_RANGE 0.0 nan",
        "JUMP",
    ] {
        assert!(
            matches!(line.parse::<FitCommand>(), Err(MusrFitError::InvalidConfig(_))),
            "'{}' should be rejected",
            line
        );
    }
}

#[test]
fn test_command_list_validation() {
    // no minimizer at all
    let config = FitConfig::default().with_commands(vec![FitCommand::Hesse]);
    assert!(matches!(config.validate(), Err(MusrFitError::InvalidConfig(_))));

    // unknown parameter name
    let result = FitSession::builder(table())
        .block(decay_block("run", 1))
        .config(FitConfig::default().with_commands(vec![
            FitCommand::Fix(vec![ParamId::from("Phase")]),
            FitCommand::Migrad,
        ]))
        .build();
    assert!(matches!(result, Err(MusrFitError::Parameter(_))));

    // SCAN with an empty range
    let result = FitSession::builder(table())
        .block(decay_block("run", 1))
        .config(FitConfig::default().with_commands(vec![
            FitCommand::Migrad,
            FitCommand::Scan {
                param: Some(ParamId::Number(2)),
                points: 11,
                low: Some(1.0),
                high: Some(1.0),
            },
        ]))
        .build();
    assert!(matches!(result, Err(MusrFitError::InvalidConfig(_))));
}

#[test]
fn test_ndf_follows_fix_release_and_fit_range() {
    let mut session = fit_session(
        vec![
            FitCommand::Fix(vec![ParamId::from("Bkg")]),
            FitCommand::Save,
            FitCommand::FitRange(RangeCommand::All(FitRange::new(0.0, 2.01).unwrap())),
            FitCommand::Migrad,
        ],
        vec![decay_block("run", 2)],
    );
    assert_eq!(session.ndf(), 97);
    let result = session.fit().unwrap();
    // t = 0.00 … 2.00 inclusive, two free parameters
    assert_eq!(result.ndf, 41 - 2);
    assert_eq!(result.per_block[0].n_points, 41);

    let mut session = session_with_release();
    let result = session.fit().unwrap();
    assert_eq!(result.ndf, 100 - 3);
    assert!(result.is_converged());
}

fn session_with_release() -> FitSession {
    fit_session(
        vec![
            FitCommand::Fix(vec![ParamId::Number(2), ParamId::Number(3)]),
            FitCommand::FitRange(RangeCommand::All(FitRange::new(1.0, 3.0).unwrap())),
            FitCommand::Migrad,
            FitCommand::Restore,
            FitCommand::FitRange(RangeCommand::Reset),
            FitCommand::Migrad,
        ],
        vec![decay_block("run", 3)],
    )
}

#[test]
fn test_zero_step_parameter_stays_fixed_on_release() {
    let mut table = table();
    table.add(Parameter::fixed("Field", 100.0)).unwrap();
    let mut session = FitSession::builder(table)
        .block(decay_block("run", 4))
        .config(
            FitConfig::default()
                .with_backend(BackendKind::Serial)
                .with_commands(vec![FitCommand::Release(vec![ParamId::from("Field")]), FitCommand::Migrad]),
        )
        .build()
        .unwrap();
    let result = session.fit().unwrap();
    assert!(result.parameters.get("Field").unwrap().fixed);
    assert_eq!(result.value_of("Field"), Some(100.0));
    assert_eq!(result.ndf, 100 - 3);
}

#[test]
fn test_block_outside_fit_range_contributes_nothing() {
    let late = decay_block("late", 5);
    let mut session = fit_session(
        vec![
            FitCommand::FitRange(RangeCommand::PerBlock(vec![
                FitRange::full(),
                FitRange::new(10.0, 20.0).unwrap(),
            ])),
            FitCommand::Migrad,
        ],
        vec![decay_block("early", 5), late],
    );
    let result = session.fit().unwrap();
    assert!(result.is_converged());
    assert_eq!(result.per_block[1].value, 0.0);
    assert_eq!(result.per_block[1].n_points, 0);
    assert_eq!(result.ndf, 100 - 3);
    assert_eq!(result.per_block[0].value, result.objective);
}

#[test]
fn test_minimize_and_minos() {
    let mut session = fit_session(
        vec![FitCommand::Minimize, FitCommand::Hesse, FitCommand::Minos],
        vec![decay_block("run", 6)],
    );
    let result = session.fit().unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert_eq!(result.error_estimate.as_ref().unwrap().method, ErrorMethod::Hesse);

    for param in result.parameters.iter() {
        let (lower, upper) = param.asymmetric_error.unwrap();
        let parabolic = param.error.unwrap();
        assert!(lower < 0.0 && upper > 0.0, "{}: {} {}", param.name, lower, upper);
        // a nearly linear problem has nearly symmetric errors
        assert_relative_eq!(-lower, parabolic, max_relative = 0.1);
        assert_relative_eq!(upper, parabolic, max_relative = 0.1);
    }
    assert_eq!(result.states.last(), Some(&FitState::Done));
}

#[test]
fn test_scan_all_free_parameters() {
    let mut session = fit_session(
        vec![
            FitCommand::Migrad,
            FitCommand::Scan {
                param: None,
                points: DEFAULT_SCAN_POINTS,
                low: None,
                high: None,
            },
        ],
        vec![decay_block("run", 7)],
    );
    let result = session.fit().unwrap();
    assert_eq!(result.scans.len(), 3);
    for scan in &result.scans {
        assert_eq!(scan.values.len(), DEFAULT_SCAN_POINTS);
        // the scan is centred on the minimum
        let (best, _) = scan.best().unwrap();
        assert_relative_eq!(best, result.value_of(&scan.parameter).unwrap(), epsilon = 1e-12);
    }
}

#[test]
fn test_result_json() {
    let mut session = fit_session(Vec::new(), vec![decay_block("run", 8)]);
    let result = session.fit().unwrap();
    let json = result.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["status"], "converged");
    assert_eq!(value["statistic"], "chi_square");
    assert_eq!(value["ndf"], 97);
    assert_eq!(value["parameters"]["parameters"][1]["name"], "Lambda");
    assert_eq!(value["per_block"][0]["id"], "run");
    assert_eq!(value["errors"].as_array().unwrap().len(), 3);
    assert!(value["cause"].is_null());
    assert_eq!(value["states"].as_array().unwrap().last().unwrap(), "done");

    let text = result.to_string();
    assert!(text.contains("Converged"));
    assert!(text.contains("NDF = 97"));
}

#[test]
fn test_fit_range_over_invalid_data_keeps_converged_result() {
    // the second run has an unusable point at t = 4.5, outside its window
    let blocks = || {
        let mut late = decay_block("b2", 10).with_fit_range(0.0, 4.01).unwrap();
        late.sigma[90] = 0.0;
        vec![decay_block("b1", 9), late]
    };
    let reference = fit_session(vec![FitCommand::Migrad], blocks()).fit().unwrap();
    assert!(reference.is_converged());

    let mut session = fit_session(
        vec![
            FitCommand::Migrad,
            FitCommand::FitRange(RangeCommand::All(FitRange::full())),
            FitCommand::Migrad,
        ],
        blocks(),
    );
    let result = session.fit().unwrap();

    assert_eq!(result.status, FitStatus::Failed);
    let cause = result.cause.as_deref().unwrap();
    assert!(cause.starts_with("FIT_RANGE failed"), "{}", cause);
    assert!(cause.contains("b2"), "{}", cause);
    // the converged point and the old windows survive
    assert_eq!(result.parameters.snapshot(), reference.parameters.snapshot());
    assert_eq!(result.objective, reference.objective);
    assert_eq!(result.ndf, reference.ndf);
    assert_eq!(result.per_block[1].n_points, 81);
    assert!(result.states.contains(&FitState::Converged));
    assert_eq!(
        &result.states[result.states.len() - 2..],
        &[FitState::Failed, FitState::Done]
    );
}
