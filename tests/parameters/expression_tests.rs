//! Tests for FUNCTIONS-block parsing and evaluation

use approx::assert_relative_eq;
use musrfit_rs::binding::FunctionTable;
use musrfit_rs::parameters::expression::{Expression, ExpressionError, SimpleContext};

#[test]
fn test_precedence_and_associativity() {
    let ctx = SimpleContext::new(vec![2.0, 3.0], vec![]);
    let eval = |s: &str| Expression::parse(s).unwrap().evaluate(&ctx).unwrap();

    assert_eq!(eval("1 + 2 * 3"), 7.0);
    assert_eq!(eval("(1 + 2) * 3"), 9.0);
    assert_eq!(eval("8 / 4 / 2"), 1.0);
    assert_eq!(eval("10 - 4 - 3"), 3.0);
    assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
    assert_eq!(eval("-par1 * par2"), -6.0);
    assert_eq!(eval("par2 ^ 2 - par1"), 7.0);
}

#[test]
fn test_math_functions() {
    let ctx = SimpleContext::new(vec![0.5, 4.0], vec![]);
    let eval = |s: &str| Expression::parse(s).unwrap().evaluate(&ctx).unwrap();

    assert_relative_eq!(eval("sqrt(par2)"), 2.0);
    assert_relative_eq!(eval("cos(0)"), 1.0);
    assert_relative_eq!(eval("exp(ln(par2))"), 4.0, epsilon = 1e-12);
    assert_relative_eq!(eval("abs(-par1)"), 0.5);
    assert_relative_eq!(eval("pow(par2, par1)"), 2.0);
    assert_relative_eq!(eval("max(par1, par2)"), 4.0);
    assert_relative_eq!(eval("min(par1, par2)"), 0.5);
    assert_relative_eq!(eval("tanh(0) + atan(0)"), 0.0);
}

#[test]
fn test_typical_musr_functions() {
    // fun1: field from frequency, fun2: fraction of the second component
    let functions = FunctionTable::parse(&[
        "fun1 = par1 / 0.0135538817",
        "fun2 = par2 * (1 - map1)",
    ])
    .unwrap();
    let ctx = SimpleContext::new(vec![1.355388, 0.24], vec![0.25]);
    let fun1 = functions.get(1).unwrap().evaluate(&ctx).unwrap();
    let fun2 = functions.get(2).unwrap().evaluate(&ctx).unwrap();
    assert_relative_eq!(fun1, 100.0, max_relative = 1e-6);
    assert_relative_eq!(fun2, 0.18);
}

#[test]
fn test_evaluation_errors() {
    let ctx = SimpleContext::new(vec![0.0], vec![]);
    assert!(matches!(
        Expression::parse("1 / par1").unwrap().evaluate(&ctx),
        Err(ExpressionError::DivisionByZero)
    ));
    assert!(matches!(
        Expression::parse("par3").unwrap().evaluate(&ctx),
        Err(ExpressionError::UndefinedParameter { number: 3 })
    ));
    assert!(matches!(
        Expression::parse("map1").unwrap().evaluate(&ctx),
        Err(ExpressionError::UndefinedMap { number: 1 })
    ));
}

#[test]
fn test_parse_errors() {
    assert!(Expression::parse("1 +").is_err());
    assert!(Expression::parse("par1 par2").is_err());
    assert!(Expression::parse_assignment("fun1 par1").is_err());
    assert!(Expression::parse_assignment("foo1 = par1").is_err());
    assert!(FunctionTable::parse(&["fun1 = par1", "fun1 = par2"]).is_err());
}

#[test]
fn test_referenced_indices() {
    let expr = Expression::parse("par3 * map2 + par1 * par3").unwrap();
    assert_eq!(expr.params(), vec![1, 3]);
    assert_eq!(expr.maps(), vec![2]);
}
