//! Tabulated global parts and their reuse across evaluations

use approx::assert_relative_eq;
use musrfit_rs::accel::Dispatcher;
use musrfit_rs::binding::FunctionTable;
use musrfit_rs::objective::{FitStatistic, Objective};
use musrfit_rs::theory::{GlobalPartCache, TheoryRegistry};

use crate::test_helpers::{block_from, times};

#[test]
fn test_cache_recomputes_only_on_key_change() {
    let registry = TheoryRegistry::with_builtins();
    let lf = registry.lookup("statKTTab").unwrap();
    let expo = registry.lookup("simplExpo").unwrap();
    let cache = GlobalPartCache::new(2);

    let first = cache.refresh(0, lf.as_ref(), &[0.3, 0.5]).unwrap();
    let again = cache.refresh(0, lf.as_ref(), &[0.3, 0.5]).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));
    assert_eq!(cache.recompute_count(), 1);

    // the time shift is not part of the key
    cache.refresh(0, lf.as_ref(), &[0.3, 0.5, 0.1]).unwrap();
    assert_eq!(cache.recompute_count(), 1);

    cache.refresh(0, lf.as_ref(), &[0.35, 0.5]).unwrap();
    assert_eq!(cache.recompute_count(), 2);

    // functions without a global part never touch the cache
    assert!(cache.refresh(1, expo.as_ref(), &[1.0]).is_none());
    assert_eq!(cache.recompute_count(), 2);

    // going back to an earlier key recomputes; only the latest part is kept
    cache.refresh(0, lf.as_ref(), &[0.3, 0.5]).unwrap();
    assert_eq!(cache.recompute_count(), 3);
}

#[test]
fn test_block_evaluation_uses_tabulated_part() {
    let registry = TheoryRegistry::with_builtins();
    let lf = registry.lookup("statKTTab").unwrap();
    let t = times(200, 0.05);
    let block = block_from("lf", &["asymmetry 1", "statKTTab 2 3"], &t, |_| 0.2, 0.01, None);
    let objective = Objective::new(
        vec![block],
        FunctionTable::new(),
        &registry,
        3,
        FitStatistic::ChiSquare,
        Dispatcher::serial(),
    )
    .unwrap();

    let params = [0.2, 0.25, 0.6];
    let curve = objective.theory_curve(0, &params, &t).unwrap();
    for (&t, &c) in t.iter().zip(&curve) {
        assert_relative_eq!(c, 0.2 * lf.evaluate(t, &[0.25, 0.6], None), epsilon = 1e-9);
    }

    // repeated evaluations at the same field and width reuse the table
    let before = objective.blocks()[0].global_part_recomputations();
    objective.evaluate(&[0.21, 0.25, 0.6]).unwrap();
    objective.evaluate(&[0.19, 0.25, 0.6]).unwrap();
    assert_eq!(objective.blocks()[0].global_part_recomputations(), before);
    objective.evaluate(&[0.19, 0.3, 0.6]).unwrap();
    assert_eq!(objective.blocks()[0].global_part_recomputations(), before + 1);
}
