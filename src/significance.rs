//! Statistical significance suite.
//!
//! Four procedures that treat the correlation engine as a black box:
//! a label-permutation test, a bootstrap confidence interval, k-fold
//! cross-validation of the calibrated weights, and a Mantel matrix test.
//! Each returns its own `Result` so one failing procedure never hides the
//! others. Resampling loops run on rayon; iteration `i` always draws from
//! a generator seeded with `derive_seed(seed, i)`.

use std::fmt;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::axes::AxisWeights;
use crate::calibration::{calibrate, CalibrationConfig, CalibrationOutcome, Objective};
use crate::engine::{
    CorrelationEngine, CorrelationResult, DistanceMetric, EngineError, PairObservations, SampleUnit,
};
use crate::sampling::{self, derive_seed, EntityPair};
use crate::stats;

/// Dense matrices above this many entities are refused.
pub const MANTEL_MAX_ENTITIES: usize = 5_000;

fn iteration_rng(seed: u64, iteration: usize) -> StdRng {
    StdRng::seed_from_u64(derive_seed(seed, iteration as u64))
}

/// Clamp a requested iteration count to the configured cap.
pub fn bounded_iterations(procedure: &str, requested: usize, cap: usize) -> usize {
    if requested > cap {
        warn!(procedure, requested, cap, "iteration count clamped to cap");
        cap
    } else {
        requested
    }
}

fn require_iterations(procedure: &str, iterations: usize) -> Result<(), EngineError> {
    if iterations == 0 {
        return Err(EngineError::Configuration(format!(
            "{procedure} needs at least one iteration"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------
//  Permutation test
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermutationResult {
    pub observed_r: f64,
    pub parametric_p: f64,
    /// Fraction of shuffles with `|r| >= |observed_r|`.
    pub empirical_p: f64,
    pub exceed_count: usize,
    pub iterations: usize,
}

/// Shuffle co-occurrence across the fixed pair set and recompute Pearson r.
pub fn permutation_test(
    obs: &PairObservations,
    iterations: usize,
    seed: u64,
) -> Result<PermutationResult, EngineError> {
    require_iterations("permutation test", iterations)?;
    let observed = obs.stats()?;
    let threshold = observed.pearson_r.abs() - 1e-12;

    let exceed_count = (0..iterations)
        .into_par_iter()
        .filter(|&i| {
            let mut rng = iteration_rng(seed, i);
            let mut shuffled = obs.cooccurrence.clone();
            shuffled.shuffle(&mut rng);
            stats::pearson(&obs.distances, &shuffled)
                .map(|r| r.abs() >= threshold)
                .unwrap_or(false)
        })
        .count();

    let empirical_p = exceed_count as f64 / iterations as f64;
    debug!(iterations, exceed_count, empirical_p, "permutation test complete");
    Ok(PermutationResult {
        observed_r: observed.pearson_r,
        parametric_p: observed.pearson_p,
        empirical_p,
        exceed_count,
        iterations,
    })
}

// ---------------------------------------------------------------------
//  Bootstrap
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapResult {
    pub spearman_r: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub resamples: usize,
    /// Resamples that produced a defined coefficient.
    pub valid_resamples: usize,
    /// The 95% interval excludes zero.
    pub robust: bool,
}

impl BootstrapResult {
    pub fn width(&self) -> f64 {
        self.ci_upper - self.ci_lower
    }
}

/// 95% percentile interval for Spearman r over pairs resampled with
/// replacement.
pub fn bootstrap_ci(
    obs: &PairObservations,
    resamples: usize,
    seed: u64,
) -> Result<BootstrapResult, EngineError> {
    require_iterations("bootstrap", resamples)?;
    let observed = obs.stats()?;
    let n = obs.len();

    let mut coefficients: Vec<f64> = (0..resamples)
        .into_par_iter()
        .filter_map(|i| {
            let mut rng = iteration_rng(seed, i);
            let mut x = Vec::with_capacity(n);
            let mut y = Vec::with_capacity(n);
            for _ in 0..n {
                let j = rng.gen_range(0..n);
                x.push(obs.distances[j]);
                y.push(obs.cooccurrence[j]);
            }
            stats::spearman(&x, &y)
        })
        .collect();

    if coefficients.len() < 2 {
        return Err(EngineError::DegenerateSample("bootstrap distribution"));
    }
    coefficients.sort_by(|a, b| a.total_cmp(b));
    let ci_lower = stats::percentile_sorted(&coefficients, 2.5);
    let ci_upper = stats::percentile_sorted(&coefficients, 97.5);

    Ok(BootstrapResult {
        spearman_r: observed.spearman_r,
        ci_lower,
        ci_upper,
        resamples,
        valid_resamples: coefficients.len(),
        robust: ci_lower > 0.0 || ci_upper < 0.0,
    })
}

// ---------------------------------------------------------------------
//  Cross-validation
// ---------------------------------------------------------------------

/// Fold index for each of `n` items: a seeded shuffle dealt round-robin.
pub fn fold_assignment(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let mut folds = vec![0usize; n];
    for (slot, &item) in order.iter().enumerate() {
        folds[item] = slot % k.max(1);
    }
    folds
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldResult {
    pub fold: usize,
    pub train_entities: usize,
    pub held_out_entities: usize,
    pub weights: Option<AxisWeights>,
    pub held_out_pairs: usize,
    pub held_out_spearman: Option<f64>,
    pub baseline_spearman: Option<f64>,
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationResult {
    pub k: usize,
    pub folds: Vec<FoldResult>,
    pub completed_folds: usize,
    pub mean_spearman: f64,
    pub std_spearman: f64,
    /// Unit-weight Euclidean on the same held-out pairs.
    pub baseline_mean_spearman: f64,
}

/// Calibrate on k-1 folds, evaluate on the held-out fold.
///
/// Training pairs are formed only from training entities and held-out
/// pairs only from held-out entities, so a fold's fitted weights cannot
/// depend on anything its held-out entities contribute.
pub fn cross_validate(
    engine: &CorrelationEngine<'_>,
    pool: &[usize],
    k: usize,
    initial: AxisWeights,
    cfg: &CalibrationConfig,
    seed: u64,
) -> Result<CrossValidationResult, EngineError> {
    if k < 2 {
        return Err(EngineError::Configuration(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    if k > pool.len() {
        return Err(EngineError::Configuration(format!(
            "fold count {k} exceeds the {} mapped entities",
            pool.len()
        )));
    }

    let assignment = fold_assignment(pool.len(), k, seed);
    let mut folds = Vec::with_capacity(k);
    for fold in 0..k {
        let (held_out, train): (Vec<(usize, usize)>, Vec<(usize, usize)>) = pool
            .iter()
            .copied()
            .enumerate()
            .partition(|&(pos, _)| assignment[pos] == fold);
        let held_out: Vec<usize> = held_out.into_iter().map(|(_, entity)| entity).collect();
        let train: Vec<usize> = train.into_iter().map(|(_, entity)| entity).collect();
        let fold_seed = derive_seed(seed, fold as u64 + 1);
        folds.push(run_fold(engine, fold, &train, &held_out, initial, cfg, fold_seed));
    }

    let held_out: Vec<f64> = folds.iter().filter_map(|f| f.held_out_spearman).collect();
    if held_out.is_empty() {
        return Err(EngineError::InsufficientSample {
            found: 0,
            required: 1,
            unit: SampleUnit::Folds,
        });
    }
    let baseline: Vec<f64> = folds.iter().filter_map(|f| f.baseline_spearman).collect();

    Ok(CrossValidationResult {
        k,
        completed_folds: held_out.len(),
        mean_spearman: stats::mean(&held_out),
        std_spearman: stats::std_population(&held_out),
        baseline_mean_spearman: stats::mean(&baseline),
        folds,
    })
}

fn run_fold(
    engine: &CorrelationEngine<'_>,
    fold: usize,
    train: &[usize],
    held_out: &[usize],
    initial: AxisWeights,
    cfg: &CalibrationConfig,
    seed: u64,
) -> FoldResult {
    let mut result = FoldResult {
        fold,
        train_entities: train.len(),
        held_out_entities: held_out.len(),
        weights: None,
        held_out_pairs: 0,
        held_out_spearman: None,
        baseline_spearman: None,
        skipped: None,
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let fitted = engine
        .sample_pairs(train, &mut rng)
        .and_then(|pairs| fit_weights(engine, &pairs, initial, cfg));
    let weights = match fitted {
        Ok(outcome) => outcome.weights,
        Err(err) => {
            warn!(fold, error = %err, "fold calibration skipped");
            result.skipped = Some(err.to_string());
            return result;
        }
    };
    result.weights = Some(weights);

    let cap = engine.config().sample_cap;
    let pairs = sampling::sample_pairs(held_out, cap, engine.config().retry_factor, &mut rng);
    result.held_out_pairs = pairs.len();
    if let Err(err) = engine.check_pairs(pairs.len()) {
        warn!(fold, error = %err, "held-out fold too small to evaluate");
        result.skipped = Some(err.to_string());
        return result;
    }

    let evaluated = engine
        .observe(&pairs, &weights, DistanceMetric::WeightedEuclidean)
        .stats();
    match evaluated {
        Ok(s) => result.held_out_spearman = Some(s.spearman_r),
        Err(err) => result.skipped = Some(err.to_string()),
    }
    result.baseline_spearman = engine
        .observe(&pairs, &AxisWeights::uniform(), DistanceMetric::Euclidean)
        .stats()
        .ok()
        .map(|s| s.spearman_r);
    result
}

fn fit_weights(
    engine: &CorrelationEngine<'_>,
    pairs: &[EntityPair],
    initial: AxisWeights,
    cfg: &CalibrationConfig,
) -> Result<CalibrationOutcome, EngineError> {
    calibrate(&engine.deltas(pairs), initial, Objective::MaximizeAbsSpearman, cfg)
}

// ---------------------------------------------------------------------
//  Mantel test
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MantelResult {
    pub r: f64,
    /// `(count + 1) / (permutations + 1)`
    pub p_value: f64,
    pub permutations: usize,
    pub entities: usize,
    pub pairs: usize,
}

/// Matrix correlation between the full distance and co-occurrence matrices
/// of `pool`, with significance from simultaneous row/column permutation
/// of the co-occurrence matrix.
pub fn mantel_test(
    engine: &CorrelationEngine<'_>,
    pool: &[usize],
    weights: &AxisWeights,
    metric: DistanceMetric,
    permutations: usize,
    seed: u64,
) -> Result<MantelResult, EngineError> {
    require_iterations("mantel test", permutations)?;
    let n = pool.len();
    if n > MANTEL_MAX_ENTITIES {
        return Err(EngineError::Configuration(format!(
            "mantel test supports at most {MANTEL_MAX_ENTITIES} entities, got {n}"
        )));
    }
    engine.check_pool(pool)?;

    let cooccurrence_metric = engine.config().cooccurrence_metric;
    let distance = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            0.0
        } else {
            engine.pair_distance(EntityPair::new(pool[i], pool[j]), weights, metric)
        }
    });
    let cooccurrence = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            0.0
        } else {
            engine.pair_cooccurrence(EntityPair::new(pool[i], pool[j]), cooccurrence_metric)
        }
    });

    let upper: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .collect();
    let d: Vec<f64> = upper.iter().map(|&(i, j)| distance[(i, j)]).collect();
    let c: Vec<f64> = upper.iter().map(|&(i, j)| cooccurrence[(i, j)]).collect();
    let r = crate::engine::correlation_of(&d, &c)?.pearson_r;
    let threshold = r.abs() - 1e-12;

    let count = (0..permutations)
        .into_par_iter()
        .filter(|&iteration| {
            let mut rng = iteration_rng(seed, iteration);
            let mut perm: Vec<usize> = (0..n).collect();
            perm.shuffle(&mut rng);
            let permuted: Vec<f64> = upper
                .iter()
                .map(|&(i, j)| cooccurrence[(perm[i], perm[j])])
                .collect();
            stats::pearson(&d, &permuted)
                .map(|pr| pr.abs() >= threshold)
                .unwrap_or(false)
        })
        .count();

    Ok(MantelResult {
        r,
        p_value: (count + 1) as f64 / (permutations + 1) as f64,
        permutations,
        entities: n,
        pairs: upper.len(),
    })
}

// ---------------------------------------------------------------------
//  Stratified analysis
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumResult {
    pub label: String,
    pub entities: usize,
    pub correlation: Option<CorrelationResult>,
    pub skipped: Option<String>,
    pub p_bonferroni: Option<f64>,
    pub q_benjamini_hochberg: Option<f64>,
    /// Significant before correction.
    pub significant: bool,
    pub survives_bonferroni: bool,
    pub survives_benjamini_hochberg: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratifiedResult {
    pub alpha: f64,
    /// Strata that produced a correlation and form the correction family.
    pub tests: usize,
    pub strata: Vec<StratumResult>,
}

impl StratifiedResult {
    /// Significant strata that fail one or both corrections.
    pub fn lost_to_correction(&self) -> impl Iterator<Item = &StratumResult> {
        self.strata
            .iter()
            .filter(|s| s.significant && !(s.survives_bonferroni && s.survives_benjamini_hochberg))
    }
}

/// Correlate each stratum separately, then correct the family of p-values.
pub fn stratified_significance(
    engine: &CorrelationEngine<'_>,
    strata: &[(String, Vec<usize>)],
    weights: &AxisWeights,
    metric: DistanceMetric,
    seed: u64,
) -> StratifiedResult {
    let alpha = engine.config().alpha;
    let mut results: Vec<StratumResult> = strata
        .iter()
        .enumerate()
        .map(|(idx, (label, members))| {
            let mut rng = iteration_rng(seed, idx);
            let outcome = engine
                .sample_pairs(members, &mut rng)
                .and_then(|pairs| engine.correlate(&pairs, weights, metric));
            let (correlation, skipped) = match outcome {
                Ok(result) => (Some(result), None),
                Err(err) => {
                    debug!(stratum = %label, error = %err, "stratum skipped");
                    (None, Some(err.to_string()))
                }
            };
            StratumResult {
                label: label.clone(),
                entities: members.len(),
                significant: correlation.as_ref().is_some_and(|c| c.pearson_p < alpha),
                correlation,
                skipped,
                p_bonferroni: None,
                q_benjamini_hochberg: None,
                survives_bonferroni: false,
                survives_benjamini_hochberg: false,
            }
        })
        .collect();

    let tests = apply_corrections(&mut results, alpha);
    StratifiedResult {
        alpha,
        tests,
        strata: results,
    }
}

/// Bonferroni and Benjamini-Hochberg over the strata that produced a
/// correlation. Returns the size of that family.
pub fn apply_corrections(strata: &mut [StratumResult], alpha: f64) -> usize {
    let tested: Vec<usize> = strata
        .iter()
        .enumerate()
        .filter(|(_, s)| s.correlation.is_some())
        .map(|(idx, _)| idx)
        .collect();
    let p_values: Vec<f64> = tested
        .iter()
        .filter_map(|&idx| strata[idx].correlation.as_ref().map(|c| c.pearson_p))
        .collect();
    let bonferroni = stats::bonferroni(&p_values);
    let bh = stats::benjamini_hochberg(&p_values);
    for (slot, &idx) in tested.iter().enumerate() {
        let stratum = &mut strata[idx];
        stratum.p_bonferroni = Some(bonferroni[slot]);
        stratum.q_benjamini_hochberg = Some(bh[slot]);
        stratum.survives_bonferroni = stratum.significant && bonferroni[slot] < alpha;
        stratum.survives_benjamini_hochberg = stratum.significant && bh[slot] < alpha;
    }
    tested.len()
}

// ---------------------------------------------------------------------
//  Verdicts
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    #[serde(rename = "SUPPORTED")]
    Supported,
    #[serde(rename = "NOT SUPPORTED")]
    NotSupported,
    #[serde(rename = "PARTIALLY SURVIVES")]
    PartiallySurvives,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Supported => f.write_str("SUPPORTED"),
            Verdict::NotSupported => f.write_str("NOT SUPPORTED"),
            Verdict::PartiallySurvives => f.write_str("PARTIALLY SURVIVES"),
        }
    }
}

/// Headline verdict: a significant negative raw correlation that every
/// available robustness check agrees with is supported; one that some check
/// disputes only partially survives.
pub fn headline_verdict(
    raw: Option<&CorrelationResult>,
    permutation: Option<&PermutationResult>,
    bootstrap: Option<&BootstrapResult>,
    mantel: Option<&MantelResult>,
    alpha: f64,
) -> Verdict {
    let Some(raw) = raw else {
        return Verdict::NotSupported;
    };
    if raw.pearson_r >= 0.0 || !(raw.pearson_p < alpha) {
        return Verdict::NotSupported;
    }
    let checks = [
        permutation.map(|p| p.empirical_p < alpha),
        bootstrap.map(|b| b.robust && b.ci_upper < 0.0),
        mantel.map(|m| m.r < 0.0 && m.p_value < alpha),
    ];
    if checks.iter().flatten().all(|&passed| passed) {
        Verdict::Supported
    } else {
        Verdict::PartiallySurvives
    }
}

/// Verdict over a stratified family: supported when every significant
/// negative stratum survives Bonferroni, partially when some survive either
/// correction.
pub fn stratified_verdict(result: &StratifiedResult) -> Verdict {
    let supporting: Vec<&StratumResult> = result
        .strata
        .iter()
        .filter(|s| s.significant && s.correlation.as_ref().is_some_and(|c| c.pearson_r < 0.0))
        .collect();
    if supporting.is_empty() {
        return Verdict::NotSupported;
    }
    if supporting.iter().all(|s| s.survives_bonferroni) {
        Verdict::Supported
    } else if supporting
        .iter()
        .any(|s| s.survives_bonferroni || s.survives_benjamini_hochberg)
    {
        Verdict::PartiallySurvives
    } else {
        Verdict::NotSupported
    }
}
