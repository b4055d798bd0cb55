use archetype_calibration::evaluation::{run_synthetic_suite, synthetic_cases, Expectation};
use archetype_calibration::{SpectralAxis, Verdict};

fn assert_prob(x: f64) {
    assert!(
        x.is_finite() && (0.0..=1.0).contains(&x),
        "expected probability in [0,1], got {x}"
    );
}

#[test]
fn synthetic_suite_filter_selects_exact_name() {
    let all = synthetic_cases();
    assert!(all.iter().any(|c| c.name == "inverse_distance_4x3"));

    let selected = run_synthetic_suite(Some("inverse_distance_4x3")).unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].case_name, "inverse_distance_4x3");

    assert!(run_synthetic_suite(Some("no_such_case")).unwrap().is_empty());
}

#[test]
fn inverse_distance_case_is_supported() {
    let result = &run_synthetic_suite(Some("inverse_distance_4x3")).unwrap()[0];
    assert!(result.passed);
    assert_eq!(result.expectation, Expectation::StrongNegative);
    assert_eq!(result.mapped_entities, 12);
    assert!(result.raw_pearson_r.unwrap() < -0.5);
    assert_prob(result.raw_pearson_p.unwrap());
    assert_prob(result.permutation_p.unwrap());
    assert_eq!(result.verdict, Verdict::Supported);
}

#[test]
fn single_axis_case_recovers_the_axis() {
    let result = &run_synthetic_suite(Some("single_axis_active_receptive")).unwrap()[0];
    assert!(result.passed, "{result:?}");
    let weights = result.calibrated_weights.unwrap();
    let strongest = weights
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(strongest, SpectralAxis::ActiveReceptive.index());
}

#[test]
fn two_axis_case_picks_the_signal_subset() {
    let result = &run_synthetic_suite(Some("two_axis_subset_4d")).unwrap()[0];
    assert!(result.passed, "{result:?}");
    assert_eq!(
        result.best_subset.as_deref(),
        Some(&[SpectralAxis::OrderChaos, SpectralAxis::CreationDestruction][..])
    );
}

#[test]
fn noise_case_reports_probabilities() {
    let result = &run_synthetic_suite(Some("uniform_noise_40_s7")).unwrap()[0];
    assert_eq!(result.mapped_entities, 40);
    assert_prob(result.permutation_p.unwrap());
    assert_prob(result.raw_pearson_p.unwrap());
    assert!(result.calibrated_weights.is_some());
}
