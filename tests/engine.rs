use archetype_calibration::engine::SampleUnit;
use archetype_calibration::evaluation::{random_archetypes, run_synthetic_case, Signal, SyntheticCase};
use archetype_calibration::sampling::{stream_rng, streams};
use archetype_calibration::{
    distance, run_analysis, AnalysisConfig, AnalysisInputs, AxisWeights, CoordinateVector,
    DistanceMetric, EngineError, SpectralAxis, Verdict,
};

fn inputs_for(case: &SyntheticCase) -> AnalysisInputs {
    let data = case.dataset();
    AnalysisInputs::from_parts(data.store, &data.bindings, &data.corpus, 0.0).unwrap()
}

fn vector(values: [f64; 8]) -> CoordinateVector {
    CoordinateVector::new(values).unwrap()
}

#[test]
fn inverse_distance_corpus_gives_strong_negative_correlation() {
    let case = SyntheticCase::inverse_distance_line();
    let inputs = inputs_for(&case);
    let cfg = case.config();
    let engine = inputs.engine(&cfg);
    let mut rng = stream_rng(cfg.seed, streams::PAIR_SAMPLE);
    let pairs = engine.sample_pairs(&engine.all_entities(), &mut rng).unwrap();
    assert_eq!(pairs.len(), 66);

    let result = engine
        .correlate(&pairs, &AxisWeights::uniform(), DistanceMetric::Euclidean)
        .unwrap();
    assert!(result.pearson_r < -0.5, "r = {}", result.pearson_r);
    assert!(result.pearson_p < 0.05, "p = {}", result.pearson_p);
    assert!(result.spearman_r < 0.0);
    assert_eq!(result.sample_size, 66);

    let eval = run_synthetic_case(&case).unwrap();
    assert!(eval.passed);
}

#[test]
fn five_entities_are_an_insufficient_sample() {
    let case = SyntheticCase {
        name: "five_entities".into(),
        archetypes: random_archetypes(5, &SpectralAxis::ALL, 3),
        entities_per_archetype: 1,
        signal: Signal::InverseDistance { scale: 20.0 },
        expectation: archetype_calibration::evaluation::Expectation::NoSignal,
        min_subset_size: 3,
        seed: 3,
    };
    let inputs = inputs_for(&case);
    assert_eq!(inputs.entities.len(), 5);

    let results = run_analysis(&inputs, &AnalysisConfig::quick()).unwrap();
    match results.raw {
        Err(EngineError::InsufficientSample {
            found,
            required,
            unit,
        }) => {
            assert_eq!(found, 5);
            assert_eq!(required, 10);
            assert_eq!(unit, SampleUnit::Entities);
        }
        other => panic!("expected insufficient sample, got {other:?}"),
    }
    assert!(results.permutation.is_err());
    assert!(results.mantel.as_ref().is_err_and(EngineError::is_insufficient));
    assert_eq!(results.sampled_pairs, 0);
    assert_eq!(results.verdict, Verdict::NotSupported);
}

#[test]
fn distance_is_symmetric_and_zero_on_identity() {
    let a = vector([0.1, 0.4, 0.9, 0.0, 0.3, 0.7, 0.5, 1.0]);
    let b = vector([0.8, 0.2, 0.1, 0.6, 0.3, 0.0, 0.9, 0.4]);
    let weights = AxisWeights::new([2.0, 0.5, 1.0, 0.0, 3.0, 1.0, 0.25, 1.5]).unwrap();
    for metric in [
        DistanceMetric::Euclidean,
        DistanceMetric::WeightedEuclidean,
        DistanceMetric::Cosine,
    ] {
        let ab = distance(&a, &b, &weights, metric);
        let ba = distance(&b, &a, &weights, metric);
        assert!((ab - ba).abs() < 1e-12, "{metric}");
        assert!(ab >= 0.0, "{metric}");
        assert!(distance(&a, &a, &weights, metric).abs() < 1e-12, "{metric}");
    }
}

#[test]
fn unit_weights_reduce_to_plain_euclidean() {
    let a = vector([0.0, 0.25, 0.5, 0.75, 1.0, 0.5, 0.25, 0.0]);
    let b = vector([1.0, 0.75, 0.5, 0.25, 0.0, 0.5, 0.75, 1.0]);
    let unit = AxisWeights::uniform();
    let plain = distance(&a, &b, &unit, DistanceMetric::Euclidean);
    let weighted = distance(&a, &b, &unit, DistanceMetric::WeightedEuclidean);
    assert!((plain - weighted).abs() < 1e-12);

    // Euclidean ignores the weights entirely.
    let skewed = AxisWeights::new([8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(distance(&a, &b, &skewed, DistanceMetric::Euclidean), plain);
    assert!((distance(&a, &b, &skewed, DistanceMetric::WeightedEuclidean) - 8f64.sqrt()).abs() < 1e-12);
}

#[test]
fn cosine_handles_zero_vectors() {
    let zero = vector([0.0; 8]);
    let other = vector([0.5; 8]);
    let unit = AxisWeights::uniform();
    assert_eq!(distance(&zero, &zero, &unit, DistanceMetric::Cosine), 0.0);
    assert_eq!(distance(&zero, &other, &unit, DistanceMetric::Cosine), 1.0);
}

#[test]
fn outliers_are_ranked_and_capped() {
    let case = SyntheticCase::uniform_noise(21);
    let inputs = inputs_for(&case);
    let mut cfg = AnalysisConfig::quick();
    cfg.engine.outlier_threshold = 1.0;
    cfg.engine.top_outliers = 5;
    let engine = inputs.engine(&cfg);
    let mut rng = stream_rng(1, streams::PAIR_SAMPLE);
    let pairs = engine.sample_pairs(&engine.all_entities(), &mut rng).unwrap();

    let result = engine
        .correlate(&pairs, &AxisWeights::uniform(), DistanceMetric::Euclidean)
        .unwrap();
    assert!(result.outliers.len() <= 5);
    for window in result.outliers.windows(2) {
        assert!(window[0].anomaly_score >= window[1].anomaly_score);
    }
    for outlier in &result.outliers {
        assert!(outlier.anomaly_score > 1.0);
        assert_ne!(outlier.entity_a, outlier.entity_b);
    }
}

#[test]
fn metric_comparison_covers_every_combination() {
    let case = SyntheticCase::inverse_distance_line();
    let inputs = inputs_for(&case);
    let cfg = case.config();
    let engine = inputs.engine(&cfg);
    let mut rng = stream_rng(cfg.seed, streams::PAIR_SAMPLE);
    let pairs = engine.sample_pairs(&engine.all_entities(), &mut rng).unwrap();

    let variants = engine.compare_metrics(&pairs, &AxisWeights::uniform());
    assert_eq!(variants.len(), 9);
    let raw_euclid = variants
        .iter()
        .find(|v| {
            v.metric == DistanceMetric::Euclidean
                && v.cooccurrence_metric == archetype_calibration::CooccurrenceMetric::Raw
        })
        .unwrap();
    assert!(raw_euclid.pearson_r.is_some_and(|r| r < -0.5));
}
