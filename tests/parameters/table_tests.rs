//! Tests for the ParameterTable

use musrfit_rs::fitter::ParamId;
use musrfit_rs::parameters::{Parameter, ParameterError, ParameterTable};

fn table() -> ParameterTable {
    let mut field = Parameter::fixed("Field", 100.0);
    field.error = Some(0.5);
    ParameterTable::from_parameters(vec![
        Parameter::new("Asy", 0.22, 0.01),
        Parameter::with_bounds("Sigma", 0.35, 0.02, 0.0, 10.0).unwrap(),
        Parameter::with_bounds("Phase", 5.0, 1.0, f64::NEG_INFINITY, 360.0).unwrap(),
        field,
    ])
    .unwrap()
}

#[test]
fn test_json_round_trip() {
    let table = table();
    let json = table.to_json().unwrap();
    // infinite bounds are written as null
    assert!(json.contains("null"));
    assert!(!json.contains("inf"));

    let restored = ParameterTable::from_json(&json).unwrap();
    assert_eq!(restored, table);
    assert_eq!(restored.by_number(3).unwrap().max(), 360.0);
    assert_eq!(restored.by_number(3).unwrap().min(), f64::NEG_INFINITY);
    assert_eq!(restored.get("field").unwrap().error, Some(0.5));
}

#[test]
fn test_save_and_load() {
    let path = std::env::temp_dir().join(format!("musrfit-rs-table-{}.json", std::process::id()));
    let table = table();
    table.save_json(&path).unwrap();
    let loaded = ParameterTable::load_json(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, table);
}

#[test]
fn test_from_json_rejects_duplicates() {
    let json = r#"{"parameters": [
        {"name": "Asy", "value": 0.2, "step": 0.01},
        {"name": "ASY", "value": 0.1, "step": 0.01}
    ]}"#;
    assert!(ParameterTable::from_json(json).is_err());
}

#[test]
fn test_param_ids_resolve_by_number_and_name() {
    let table = table();
    assert_eq!(ParamId::Number(2).resolve(&table).unwrap(), 2);
    assert_eq!(ParamId::from("phase").resolve(&table).unwrap(), 3);
    assert!(matches!(
        ParamId::Number(5).resolve(&table),
        Err(ParameterError::NumberOutOfRange { number: 5, len: 4 })
    ));
    assert!(matches!(
        ParamId::from("Lambda").resolve(&table),
        Err(ParameterError::NotFound { .. })
    ));
}

#[test]
fn test_free_parameter_needs_step() {
    let mut table = table();
    assert!(table.validate().is_ok());
    table.add(Parameter::new("Rate", 1.0, 0.0)).unwrap();
    assert!(matches!(
        table.validate(),
        Err(ParameterError::InvalidStep { .. })
    ));
}

#[test]
fn test_snapshot_follows_updates() {
    let mut table = table();
    let free = table.free_indices();
    assert_eq!(free, vec![0, 1, 2]);
    table.update_free(&free, &[0.25, 0.4, 10.0]).unwrap();
    assert_eq!(table.snapshot(), vec![0.25, 0.4, 10.0, 100.0]);

    // out of bounds
    assert!(table.update_free(&free, &[0.25, -1.0, 10.0]).is_err());
    assert!(table.update_free(&free, &[0.25]).is_err());
}
