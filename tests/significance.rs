use archetype_calibration::engine::PairObservations;
use archetype_calibration::evaluation::SyntheticCase;
use archetype_calibration::sampling::{stream_rng, streams};
use archetype_calibration::significance::{
    bootstrap_ci, cross_validate, fold_assignment, mantel_test, permutation_test,
    stratified_significance, BootstrapResult,
};
use archetype_calibration::{
    AnalysisConfig, AnalysisInputs, AxisWeights, CalibrationConfig, DistanceMetric, MemoryCorpus,
    SpectralAxis,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn inputs_for(case: &SyntheticCase) -> AnalysisInputs {
    let data = case.dataset();
    AnalysisInputs::from_parts(data.store, &data.bindings, &data.corpus, 0.0).unwrap()
}

fn observations(inputs: &AnalysisInputs, cfg: &AnalysisConfig) -> PairObservations {
    let engine = inputs.engine(cfg);
    let mut rng = stream_rng(cfg.seed, streams::PAIR_SAMPLE);
    let pairs = engine.sample_pairs(&engine.all_entities(), &mut rng).unwrap();
    engine.observe(&pairs, &AxisWeights::uniform(), DistanceMetric::Euclidean)
}

fn noisy_line(n: usize, seed: u64) -> PairObservations {
    let mut rng = StdRng::seed_from_u64(seed);
    let distances: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..2.0)).collect();
    let cooccurrence = distances
        .iter()
        .map(|d| 10.0 - 2.0 * d + rng.gen_range(-3.0..3.0))
        .collect();
    PairObservations::from_values(distances, cooccurrence)
}

#[test]
fn uniform_noise_is_mostly_not_significant() {
    let cfg = AnalysisConfig::quick();
    let not_significant = (0..20u64)
        .filter(|&seed| {
            let inputs = inputs_for(&SyntheticCase::uniform_noise(100 + seed));
            let obs = observations(&inputs, &cfg);
            let result = permutation_test(&obs, 1_000, seed).unwrap();
            result.empirical_p > 0.05
        })
        .count();
    assert!(not_significant >= 18, "{not_significant} of 20 seeds");
}

#[test]
fn permutation_p_tracks_parametric_p_on_large_samples() {
    let inputs = inputs_for(&SyntheticCase::uniform_noise(8));
    let obs = observations(&inputs, &AnalysisConfig::quick());
    assert_eq!(obs.len(), 300);

    let result = permutation_test(&obs, 4_000, 99).unwrap();
    assert_eq!(result.iterations, 4_000);
    assert!(
        (result.empirical_p - result.parametric_p).abs() < 0.05,
        "empirical {} parametric {}",
        result.empirical_p,
        result.parametric_p
    );
}

#[test]
fn permutation_and_bootstrap_are_reproducible() {
    let obs = noisy_line(120, 4);
    assert_eq!(
        permutation_test(&obs, 500, 17).unwrap(),
        permutation_test(&obs, 500, 17).unwrap()
    );
    assert_eq!(
        bootstrap_ci(&obs, 500, 17).unwrap(),
        bootstrap_ci(&obs, 500, 17).unwrap()
    );
}

#[test]
fn bootstrap_interval_narrows_with_more_pairs() {
    let small = bootstrap_ci(&noisy_line(40, 1), 1_000, 5).unwrap();
    let large = bootstrap_ci(&noisy_line(400, 1), 1_000, 5).unwrap();
    assert!(large.ci_lower <= large.spearman_r && large.spearman_r <= large.ci_upper);
    assert!(large.width() < small.width(), "{} vs {}", large.width(), small.width());
    assert!(large.robust);
    assert!(large.ci_upper < 0.0);
}

#[test]
fn bootstrap_endpoints_settle_as_resamples_grow() {
    let obs = noisy_line(150, 2);
    let spread = |resamples: usize| {
        let intervals: Vec<_> = (0..6u64)
            .map(|seed| bootstrap_ci(&obs, resamples, 1_000 + seed).unwrap())
            .collect();
        let range = |pick: fn(&BootstrapResult) -> f64| {
            let values: Vec<f64> = intervals.iter().map(pick).collect();
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            max - min
        };
        (range(|b| b.ci_lower), range(|b| b.ci_upper))
    };

    let (few_lower, few_upper) = spread(50);
    let (many_lower, many_upper) = spread(4_000);
    assert!(many_lower < few_lower, "lower: {many_lower} vs {few_lower}");
    assert!(many_upper < few_upper, "upper: {many_upper} vs {few_upper}");
}

#[test]
fn held_out_corpus_changes_do_not_move_fold_weights() {
    let case = SyntheticCase::single_axis(SpectralAxis::ActiveReceptive, 11);
    let data = case.dataset();
    let cfg = AnalysisConfig::quick();
    let calibration = CalibrationConfig::default();
    let (k, seed) = (3, 77);

    let before = AnalysisInputs::from_parts(
        data.store.clone(),
        &data.bindings,
        &data.corpus,
        0.0,
    )
    .unwrap();
    let engine = before.engine(&cfg);
    let pool = engine.all_entities();
    let baseline =
        cross_validate(&engine, &pool, k, AxisWeights::uniform(), &calibration, seed).unwrap();

    // Fold 0's held-out entities, as positions in the pool.
    let assignment = fold_assignment(pool.len(), k, seed);
    let held_out: Vec<String> = pool
        .iter()
        .enumerate()
        .filter(|(pos, _)| assignment[*pos] == 0)
        .map(|(_, &entity)| before.entities.get(entity).name.clone())
        .collect();
    assert!(held_out.len() >= 2);

    let mut corpus: MemoryCorpus = data.corpus.clone();
    for (i, a) in held_out.iter().enumerate() {
        for b in &held_out[i + 1..] {
            for n in 0..(3 * i + 1) {
                corpus.push(format!("extra-{a}-{b}-{n}"), &[a.as_str(), b.as_str()]);
            }
        }
    }
    let after = AnalysisInputs::from_parts(data.store, &data.bindings, &corpus, 0.0).unwrap();
    let engine_after = after.engine(&cfg);
    let changed = cross_validate(
        &engine_after,
        &engine_after.all_entities(),
        k,
        AxisWeights::uniform(),
        &calibration,
        seed,
    )
    .unwrap();

    let fold_before = &baseline.folds[0];
    let fold_after = &changed.folds[0];
    assert!(fold_before.weights.is_some());
    assert_eq!(fold_before.weights, fold_after.weights);
    assert_eq!(fold_before.held_out_entities, fold_after.held_out_entities);
    assert_ne!(fold_before.held_out_spearman, fold_after.held_out_spearman);
}

#[test]
fn cross_validation_rejects_bad_fold_counts() {
    let inputs = inputs_for(&SyntheticCase::inverse_distance_line());
    let cfg = AnalysisConfig::quick();
    let engine = inputs.engine(&cfg);
    let pool = engine.all_entities();
    let calibration = CalibrationConfig::default();
    assert!(cross_validate(&engine, &pool, 1, AxisWeights::uniform(), &calibration, 1).is_err());
    assert!(cross_validate(&engine, &pool, 13, AxisWeights::uniform(), &calibration, 1).is_err());
}

#[test]
fn fold_assignment_is_balanced_and_seeded() {
    let folds = fold_assignment(23, 5, 9);
    assert_eq!(folds, fold_assignment(23, 5, 9));
    for fold in 0..5 {
        let size = folds.iter().filter(|&&f| f == fold).count();
        assert!(size == 4 || size == 5, "fold {fold} has {size}");
    }
}

#[test]
fn mantel_detects_clustered_structure() {
    let inputs = inputs_for(&SyntheticCase::inverse_distance_line());
    let cfg = AnalysisConfig::quick();
    let engine = inputs.engine(&cfg);
    let pool = engine.all_entities();

    let result = mantel_test(
        &engine,
        &pool,
        &AxisWeights::uniform(),
        DistanceMetric::Euclidean,
        199,
        3,
    )
    .unwrap();
    assert_eq!(result.entities, 12);
    assert_eq!(result.pairs, 66);
    assert!(result.r < -0.5, "r = {}", result.r);
    assert!(result.p_value < 0.05, "p = {}", result.p_value);
    assert!(result.p_value >= 1.0 / 200.0);
}

#[test]
fn stratified_p_values_are_corrected_across_traditions() {
    let inputs = inputs_for(&SyntheticCase::single_axis(SpectralAxis::LightShadow, 5));
    let cfg = AnalysisConfig::quick();
    let engine = inputs.engine(&cfg);
    let strata = inputs.entities.by_tradition(&inputs.store);
    assert_eq!(strata.len(), 3);

    let result = stratified_significance(
        &engine,
        &strata,
        &AxisWeights::uniform(),
        DistanceMetric::Euclidean,
        1,
    );
    assert_eq!(result.tests, 3);
    for stratum in &result.strata {
        let p = stratum.correlation.as_ref().unwrap().pearson_p;
        let bonferroni = stratum.p_bonferroni.unwrap();
        let bh = stratum.q_benjamini_hochberg.unwrap();
        assert!((bonferroni - (3.0 * p).min(1.0)).abs() < 1e-12);
        assert!(bh >= p - 1e-12 && bh <= bonferroni + 1e-12);
        if stratum.survives_bonferroni {
            assert!(stratum.survives_benjamini_hochberg);
        }
    }
}
