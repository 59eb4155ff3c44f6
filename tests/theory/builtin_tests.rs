//! Built-in functions looked up the way theory lines reach them

use approx::assert_relative_eq;
use musrfit_rs::theory::TheoryRegistry;

/// Canonical name, abbreviation, arguments and the value at t = 0.
const AT_ZERO: &[(&str, &str, &[f64], f64)] = &[
    ("asymmetry", "a", &[0.25], 0.25),
    ("simplExpo", "se", &[0.7], 1.0),
    ("generExpo", "ge", &[0.7, 1.5], 1.0),
    ("simpleGss", "sg", &[0.3], 1.0),
    ("statGssKt", "stg", &[0.3], 1.0),
    ("statKTTab", "sktt", &[0.2, 0.3], 1.0),
    ("dynmKTTab", "dktt", &[0.2, 0.3, 1.0], 1.0),
    ("combiLGKT", "lgkt", &[0.1, 0.2], 1.0),
    ("spinGlass", "spg", &[0.4, 1.0, 0.5], 1.0),
    ("rdAnisoHf", "rahf", &[1.0, 0.5], 0.5),
    ("abragam", "ab", &[0.5, 1.0], 1.0),
    ("internFld", "if", &[0.0, 1.0, 0.1, 0.1], 1.0),
    ("TFieldCos", "tf", &[0.0, 1.0], 1.0),
    ("bessel", "b", &[0.0, 1.0], 1.0),
    ("internBsl", "ib", &[0.7, 0.0, 1.0, 0.1, 0.1], 1.0),
    ("skewedGss", "skg", &[0.0, 1.0, 0.3, 0.5], 1.0),
    ("polynom", "p", &[0.0, 0.3, 2.0], 0.3),
];

#[test]
fn test_every_builtin_by_name_and_abbreviation() {
    let registry = TheoryRegistry::with_builtins();
    assert_eq!(registry.len(), AT_ZERO.len());

    for &(name, abbr, args, expected) in AT_ZERO {
        let by_name = registry.lookup(name).unwrap();
        let by_abbr = registry.lookup(abbr).unwrap();
        let upper = registry.lookup(&name.to_uppercase()).unwrap();
        assert_eq!(by_name.name(), name);
        assert_eq!(by_abbr.name(), name);
        assert_eq!(upper.name(), name);

        assert!(by_name.arity().accepts(args.len()), "{} arity", name);
        let value = by_name.evaluate(0.0, args, None);
        assert_relative_eq!(value, expected, epsilon = 1e-9);
    }
}

#[test]
fn test_time_shift_argument() {
    let registry = TheoryRegistry::with_builtins();
    for &(name, _, args, _) in AT_ZERO {
        let f = registry.lookup(name).unwrap();
        let mut shifted = args.to_vec();
        if name == "polynom" {
            // the shift is the first polynom argument
            shifted[0] = 0.4;
        } else {
            shifted.push(0.4);
        }
        let at = f.evaluate(1.1, &shifted, None);
        let reference = f.evaluate(0.7, args, None);
        assert_relative_eq!(at, reference, epsilon = 1e-9);
    }
}

#[test]
fn test_kubo_toyabe_family_agrees_in_zero_field() {
    let registry = TheoryRegistry::with_builtins();
    let gss_kt = registry.lookup("statGssKt").unwrap();
    let lf_kt = registry.lookup("statKTTab").unwrap();
    let dyn_kt = registry.lookup("dynmKTTab").unwrap();
    let delta = 0.45;
    for i in 0..60 {
        let t = i as f64 * 0.25;
        let zf = gss_kt.evaluate(t, &[delta], None);
        assert_relative_eq!(lf_kt.evaluate(t, &[0.0, delta], None), zf, epsilon = 1e-14);
        // static limit of the dynamic function
        assert_relative_eq!(dyn_kt.evaluate(t, &[0.0, delta, 0.0], None), zf, epsilon = 1e-14);
    }
}

#[test]
fn test_relaxation_functions_are_bounded() {
    let registry = TheoryRegistry::with_builtins();
    let bounded = [
        ("simplExpo", vec![0.7]),
        ("simpleGss", vec![0.3]),
        ("statGssKt", vec![0.3]),
        ("statKTTab", vec![0.2, 0.3]),
        ("dynmKTTab", vec![0.2, 0.3, 1.0]),
        ("spinGlass", vec![0.4, 1.0, 0.5]),
        ("abragam", vec![0.5, 1.0]),
        ("TFieldCos", vec![30.0, 1.3]),
    ];
    for (name, args) in &bounded {
        let f = registry.lookup(name).unwrap();
        for i in 0..200 {
            let t = i as f64 * 0.1;
            let p = f.evaluate(t, args, None);
            assert!(p.is_finite(), "{} not finite at t = {}", name, t);
            assert!(p.abs() <= 1.0 + 1e-9, "{}({}) = {}", name, t, p);
        }
    }
}
