//! Axis-weight calibration and subset search.
//!
//! All routines work on [`PairDeltas`], the per-axis squared differences of
//! a fixed pair sample, so they never touch the store or the corpus and are
//! deterministic for fixed inputs.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::axes::{AxisSubset, AxisWeights, SpectralAxis, AXIS_COUNT};
use crate::engine::{EngineError, PairDeltas, SampleUnit};
use crate::stats;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Hard cap on update steps.
    pub max_iterations: usize,
    /// Stop when the loss changes by less than this fraction in one step.
    pub epsilon: f64,
    /// The update direction is scaled to sum to this.
    pub weight_budget: f64,
    /// Step size in (0, 1]: `w <- (1 - lr) * w + lr * target`.
    pub learning_rate: f64,
    /// Zero axes whose standalone correlation is positive.
    pub prune_harmful: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            epsilon: 0.001,
            weight_budget: AXIS_COUNT as f64,
            learning_rate: 0.5,
            prune_harmful: true,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_iterations == 0 {
            return Err(EngineError::Configuration(
                "calibration needs at least one iteration".into(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(EngineError::Configuration(format!(
                "learning rate {} outside (0, 1]",
                self.learning_rate
            )));
        }
        if !(self.weight_budget > 0.0 && self.weight_budget.is_finite()) {
            return Err(EngineError::Configuration(format!(
                "weight budget {} must be positive",
                self.weight_budget
            )));
        }
        if !(self.epsilon >= 0.0) {
            return Err(EngineError::Configuration(format!(
                "epsilon {} must be non-negative",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Minimize `-|spearman_r|` of weighted Euclidean distance against
    /// co-occurrence.
    #[default]
    MaximizeAbsSpearman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The loss changed by less than `epsilon` in one step.
    Converged,
    IterationCap,
    /// No axis correlates in the predicted direction; weights unchanged.
    NoSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisCorrelation {
    pub axis: SpectralAxis,
    /// Spearman r of this axis's distance alone; `None` when the axis does
    /// not vary across the sample.
    pub spearman_r: Option<f64>,
    pub harmful: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub weights: AxisWeights,
    pub initial_weights: AxisWeights,
    /// Loss before the first step, then after each step.
    pub loss_curve: Vec<f64>,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub axis_correlations: Vec<AxisCorrelation>,
    pub pruned_axes: Vec<SpectralAxis>,
    pub initial_spearman: Option<f64>,
    pub final_spearman: Option<f64>,
}

fn objective_loss(deltas: &PairDeltas, weights: &AxisWeights, objective: Objective) -> (f64, Option<f64>) {
    match objective {
        Objective::MaximizeAbsSpearman => {
            let r = stats::spearman(&deltas.weighted_distances(weights), &deltas.cooccurrence);
            (-r.map(f64::abs).unwrap_or(0.0), r)
        }
    }
}

/// Standalone Spearman r for each axis.
pub fn axis_correlations(deltas: &PairDeltas) -> Vec<AxisCorrelation> {
    SpectralAxis::ALL
        .iter()
        .map(|&axis| {
            let r = stats::spearman(&deltas.axis_distances(axis), &deltas.cooccurrence);
            AxisCorrelation {
                axis,
                spearman_r: r,
                harmful: r.is_some_and(|r| r > 0.0),
            }
        })
        .collect()
}

/// Fit axis weights by iterating toward the normalized per-axis signal.
///
/// The update direction puts weight on each axis in proportion to how
/// strongly its standalone distance correlates negatively with
/// co-occurrence. With pruning enabled, axes that correlate positively are
/// zeroed before the first step.
pub fn calibrate(
    deltas: &PairDeltas,
    initial: AxisWeights,
    objective: Objective,
    cfg: &CalibrationConfig,
) -> Result<CalibrationOutcome, EngineError> {
    cfg.validate()?;
    if deltas.len() < 2 {
        return Err(EngineError::InsufficientSample {
            found: deltas.len(),
            required: 2,
            unit: SampleUnit::Pairs,
        });
    }
    if stats::std_population(&deltas.cooccurrence) <= f64::EPSILON {
        return Err(EngineError::DegenerateSample("co-occurrence"));
    }

    let correlations = axis_correlations(deltas);
    let (initial_loss, initial_spearman) = objective_loss(deltas, &initial, objective);
    let mut loss_curve = vec![initial_loss];

    let mut target = [0.0; AXIS_COUNT];
    for c in &correlations {
        target[c.axis.index()] = c.spearman_r.map(|r| (-r).max(0.0)).unwrap_or(0.0);
    }
    let signal: f64 = target.iter().sum();
    if signal <= 0.0 {
        warn!("no axis correlates negatively with co-occurrence; weights left unchanged");
        return Ok(CalibrationOutcome {
            weights: initial,
            initial_weights: initial,
            loss_curve,
            iterations: 0,
            stop_reason: StopReason::NoSignal,
            axis_correlations: correlations,
            pruned_axes: Vec::new(),
            initial_spearman,
            final_spearman: initial_spearman,
        });
    }
    for t in target.iter_mut() {
        *t *= cfg.weight_budget / signal;
    }

    let mut weights = *initial.values();
    let mut pruned_axes = Vec::new();
    if cfg.prune_harmful {
        for c in correlations.iter().filter(|c| c.harmful) {
            info!(
                axis = %c.axis,
                spearman_r = c.spearman_r.unwrap_or(0.0),
                "pruning harmful axis"
            );
            weights[c.axis.index()] = 0.0;
            pruned_axes.push(c.axis);
        }
    }

    let mut best = AxisWeights::new(weights).map_err(|e| EngineError::Configuration(e.to_string()))?;
    let mut best_loss = objective_loss(deltas, &best, objective).0;
    let mut previous_loss = best_loss;
    let mut iterations = 0;
    let mut stop_reason = StopReason::IterationCap;

    while iterations < cfg.max_iterations {
        iterations += 1;
        for i in 0..AXIS_COUNT {
            weights[i] = ((1.0 - cfg.learning_rate) * weights[i] + cfg.learning_rate * target[i]).max(0.0);
        }
        let candidate =
            AxisWeights::new(weights).map_err(|e| EngineError::Configuration(e.to_string()))?;
        let (loss, _) = objective_loss(deltas, &candidate, objective);
        loss_curve.push(loss);
        debug!(iteration = iterations, loss, "calibration step");

        if loss < best_loss {
            best = candidate;
            best_loss = loss;
        }
        // A worsening step keeps going; only a flat trajectory converges.
        let change = (previous_loss - loss).abs();
        if change < cfg.epsilon * previous_loss.abs().max(f64::EPSILON) {
            stop_reason = StopReason::Converged;
            break;
        }
        previous_loss = loss;
    }

    if stop_reason == StopReason::IterationCap {
        warn!(iterations, "calibration hit its iteration cap");
    }
    let (_, final_spearman) = objective_loss(deltas, &best, objective);
    info!(
        iterations,
        loss = best_loss,
        pruned = pruned_axes.len(),
        "calibration finished"
    );

    Ok(CalibrationOutcome {
        weights: best,
        initial_weights: initial,
        loss_curve,
        iterations,
        stop_reason,
        axis_correlations: correlations,
        pruned_axes,
        initial_spearman,
        final_spearman,
    })
}

// ---------------------------------------------------------------------
//  Dimensionality search
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetScore {
    pub axes: Vec<SpectralAxis>,
    #[serde(skip)]
    pub subset: AxisSubset,
    pub spearman_r: Option<f64>,
    pub pearson_r: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionalityResult {
    pub min_size: usize,
    pub evaluated: usize,
    pub best: SubsetScore,
    /// Every subset, strongest negative Spearman first.
    pub table: Vec<SubsetScore>,
}

/// Score every subset of `candidates` with at least `min_size` axes using
/// unit weights on the subset. The best subset has the most negative
/// Spearman r; ties go to the smaller subset.
pub fn dimensionality_search(
    deltas: &PairDeltas,
    candidates: &[SpectralAxis],
    min_size: usize,
) -> Result<DimensionalityResult, EngineError> {
    let available = AxisSubset::from_axes(candidates).len();
    if min_size == 0 || min_size > available {
        return Err(EngineError::Configuration(format!(
            "subset size {min_size} must lie in 1..={available}"
        )));
    }
    if deltas.len() < 2 {
        return Err(EngineError::InsufficientSample {
            found: deltas.len(),
            required: 2,
            unit: SampleUnit::Pairs,
        });
    }

    let subsets = AxisSubset::enumerate(candidates, min_size);
    let mut table: Vec<SubsetScore> = subsets
        .par_iter()
        .map(|&subset| {
            let distances = deltas.weighted_distances(&AxisWeights::from_subset(subset));
            SubsetScore {
                axes: subset.axes(),
                subset,
                spearman_r: stats::spearman(&distances, &deltas.cooccurrence),
                pearson_r: stats::pearson(&distances, &deltas.cooccurrence),
            }
        })
        .collect();

    // Enumeration order is (size, mask), so a stable sort keeps the smaller
    // subset first among equal scores.
    table.sort_by(|a, b| {
        let ra = a.spearman_r.unwrap_or(f64::INFINITY);
        let rb = b.spearman_r.unwrap_or(f64::INFINITY);
        ra.total_cmp(&rb)
    });
    let best = table
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Configuration("no axis subsets to evaluate".into()))?;
    if best.spearman_r.is_none() {
        return Err(EngineError::DegenerateSample("subset distances"));
    }
    info!(evaluated = table.len(), best = %best.subset, "dimensionality search finished");

    Ok(DimensionalityResult {
        min_size,
        evaluated: table.len(),
        best,
        table,
    })
}

// ---------------------------------------------------------------------
//  Ablation
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AblationEntry {
    pub axis: SpectralAxis,
    pub weight: f64,
    pub spearman_without: Option<f64>,
    /// `spearman_without - baseline`; positive means the axis was helping.
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AblationResult {
    pub baseline_spearman: Option<f64>,
    pub entries: Vec<AblationEntry>,
}

/// Zero each weighted axis in turn and record the change in Spearman r.
pub fn axis_ablation(deltas: &PairDeltas, weights: &AxisWeights) -> AblationResult {
    let baseline = stats::spearman(&deltas.weighted_distances(weights), &deltas.cooccurrence);
    let entries = weights
        .active_axes()
        .into_iter()
        .map(|axis| {
            let without = stats::spearman(
                &deltas.weighted_distances(&weights.without(axis)),
                &deltas.cooccurrence,
            );
            AblationEntry {
                axis,
                weight: weights.get(axis),
                spearman_without: without,
                delta: baseline.zip(without).map(|(b, w)| w - b),
            }
        })
        .collect();
    AblationResult {
        baseline_spearman: baseline,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pairs whose co-occurrence falls with the gap on `axis` only. The
    /// other axes are constant within blocks that each repeat the full gap
    /// cycle, so they carry no signal.
    fn single_axis_deltas(axis: usize) -> PairDeltas {
        let mut squared = Vec::new();
        let mut cooccurrence = Vec::new();
        for i in 0..120usize {
            let mut sq = [0.0; AXIS_COUNT];
            for (j, slot) in sq.iter_mut().enumerate() {
                let noise = ((i / 40 + j) % 3) as f64 / 3.0;
                *slot = noise * noise;
            }
            let gap = (i % 40) as f64 / 40.0;
            sq[axis] = gap * gap;
            squared.push(sq);
            cooccurrence.push(50.0 - 40.0 * gap);
        }
        PairDeltas {
            squared,
            cooccurrence,
        }
    }

    #[test]
    fn calibration_concentrates_on_the_signal_axis() {
        let deltas = single_axis_deltas(3);
        let outcome = calibrate(
            &deltas,
            AxisWeights::uniform(),
            Objective::MaximizeAbsSpearman,
            &CalibrationConfig::default(),
        )
        .unwrap();
        let w = outcome.weights.values();
        let others: f64 = (0..AXIS_COUNT).filter(|&i| i != 3).map(|i| w[i]).sum::<f64>() / 7.0;
        assert!(w[3] >= 5.0 * others, "weights {w:?}");
        assert!(w.iter().all(|&x| x >= 0.0));
        assert_eq!(outcome.loss_curve.len(), outcome.iterations + 1);
        assert!(outcome.final_spearman.unwrap() < outcome.initial_spearman.unwrap());
    }

    #[test]
    fn a_worsening_step_does_not_count_as_convergence() {
        // Axis 0 alone orders the pairs exactly; axis 1 swaps neighbours
        // with a much larger spread, so any weight on it breaks the order.
        let squared: Vec<[f64; AXIS_COUNT]> = (0..20usize)
            .map(|i| {
                let mut sq = [0.0; AXIS_COUNT];
                sq[0] = i as f64;
                sq[1] = 10.0 * (i ^ 1) as f64;
                sq
            })
            .collect();
        let deltas = PairDeltas {
            squared,
            cooccurrence: (0..20).map(|i| -(i as f64)).collect(),
        };
        let mut initial = [0.0; AXIS_COUNT];
        initial[0] = 1.0;
        let initial = AxisWeights::new(initial).unwrap();

        let outcome = calibrate(
            &deltas,
            initial,
            Objective::MaximizeAbsSpearman,
            &CalibrationConfig::default(),
        )
        .unwrap();

        assert!(outcome.loss_curve[1] > outcome.loss_curve[0], "{:?}", outcome.loss_curve);
        assert!(outcome.iterations > 1, "stopped after {} step", outcome.iterations);
        assert_eq!(outcome.stop_reason, StopReason::Converged);
        assert_eq!(outcome.weights, initial);
        assert!((outcome.final_spearman.unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_signal_leaves_weights_alone() {
        let deltas = PairDeltas {
            squared: (0..20).map(|i| [(i as f64 / 20.0).powi(2); AXIS_COUNT]).collect(),
            cooccurrence: (0..20).map(|i| i as f64).collect(),
        };
        let outcome = calibrate(
            &deltas,
            AxisWeights::uniform(),
            Objective::MaximizeAbsSpearman,
            &CalibrationConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::NoSignal);
        assert_eq!(outcome.weights, AxisWeights::uniform());
    }

    #[test]
    fn search_rejects_oversized_subsets() {
        let deltas = single_axis_deltas(0);
        let err = dimensionality_search(&deltas, &SpectralAxis::ALL[..4], 5).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn ablation_shows_signal_axis_helping() {
        let deltas = single_axis_deltas(2);
        let result = axis_ablation(&deltas, &AxisWeights::uniform());
        let signal = result
            .entries
            .iter()
            .find(|e| e.axis == SpectralAxis::LightShadow)
            .unwrap();
        assert!(signal.delta.unwrap() > 0.0);
    }
}
