//! Distance & correlation engine.
//!
//! Turns entity pairs into two aligned vectors (coordinate distance of the
//! bound archetypes, co-occurrence of the entities) and correlates them.
//! The hypothesis under test is a negative correlation: archetypes that sit
//! close together in spectral space should co-occur more often.

use std::cmp::Ordering;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::axes::{AxisWeights, CoordinateVector, SpectralAxis, AXIS_COUNT};
use crate::binding::MappedEntities;
use crate::catalog::CoordinateStore;
use crate::cooccurrence::{CooccurrenceIndex, CooccurrenceMetric, EntityKey};
use crate::sampling::{self, EntityPair};
use crate::stats::{self, CorrelationStats};

// ---------------------------------------------------------------------
//  Errors
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleUnit {
    Pairs,
    Entities,
    Folds,
    Strata,
}

impl fmt::Display for SampleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleUnit::Pairs => f.write_str("pairs"),
            SampleUnit::Entities => f.write_str("entities"),
            SampleUnit::Folds => f.write_str("folds"),
            SampleUnit::Strata => f.write_str("strata"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient data: {found} {unit} available, {required} required")]
    InsufficientSample {
        found: usize,
        required: usize,
        unit: SampleUnit,
    },
    #[error("degenerate sample: {0} has zero variance")]
    DegenerateSample(&'static str),
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn is_insufficient(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientSample { .. } | EngineError::DegenerateSample(_)
        )
    }
}

// ---------------------------------------------------------------------
//  Config
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Unweighted Euclidean distance; axis weights are ignored.
    #[default]
    Euclidean,
    /// `sqrt(sum_i w_i * (a_i - b_i)^2)`
    WeightedEuclidean,
    /// `1 - cos(sqrt(w) * a, sqrt(w) * b)`
    Cosine,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::WeightedEuclidean => f.write_str("weighted_euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

/// Configuration for pair sampling, correlation and outlier detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pairs are enumerated exhaustively up to this many; above it they are
    /// sampled uniformly without replacement.
    pub sample_cap: usize,
    /// Draw budget for sampling, as a multiple of `sample_cap`.
    pub retry_factor: usize,
    /// Minimum pairs for any correlation.
    pub min_sample: usize,
    /// Minimum distinct entities in a pair pool.
    pub min_entities: usize,
    /// Significance level for interpretation strings.
    pub alpha: f64,
    /// A pair is anomalous when `|z_distance + z_cooccurrence|` exceeds this.
    pub outlier_threshold: f64,
    /// Number of anomalies retained per result.
    pub top_outliers: usize,
    pub cooccurrence_metric: CooccurrenceMetric,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_cap: 1_000,
            retry_factor: 10,
            min_sample: 10,
            min_entities: 10,
            alpha: 0.05,
            outlier_threshold: 2.0,
            top_outliers: 10,
            cooccurrence_metric: CooccurrenceMetric::Raw,
        }
    }
}

// ---------------------------------------------------------------------
//  Distance
// ---------------------------------------------------------------------

pub fn distance(
    a: &CoordinateVector,
    b: &CoordinateVector,
    weights: &AxisWeights,
    metric: DistanceMetric,
) -> f64 {
    let (a, b, w) = (a.values(), b.values(), weights.values());
    match metric {
        DistanceMetric::Euclidean => (0..AXIS_COUNT)
            .map(|i| (a[i] - b[i]) * (a[i] - b[i]))
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::WeightedEuclidean => (0..AXIS_COUNT)
            .map(|i| w[i] * (a[i] - b[i]) * (a[i] - b[i]))
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Cosine => {
            let mut dot = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;
            for i in 0..AXIS_COUNT {
                dot += w[i] * a[i] * b[i];
                norm_a += w[i] * a[i] * a[i];
                norm_b += w[i] * b[i] * b[i];
            }
            match (norm_a > 0.0, norm_b > 0.0) {
                (false, false) => 0.0,
                (true, true) => (1.0 - dot / (norm_a * norm_b).sqrt()).clamp(0.0, 2.0),
                _ => 1.0,
            }
        }
    }
}

// ---------------------------------------------------------------------
//  Results
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
    NotSignificant,
    UnexpectedPositive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interpretation {
    pub strength: SignalStrength,
    pub message: String,
}

/// Map a coefficient and its p-value onto the reporting policy.
pub fn interpret(r: f64, p: f64, alpha: f64) -> Interpretation {
    let (strength, message) = if !(p < alpha) {
        (SignalStrength::NotSignificant, "no significant correlation".to_string())
    } else if r > 0.3 {
        (
            SignalStrength::UnexpectedPositive,
            format!(
                "unexpected positive correlation (r = {r:.3}): distant archetypes co-occur more; \
                 needs investigation"
            ),
        )
    } else if r < -0.5 {
        (
            SignalStrength::Strong,
            format!("strong predictive signal (r = {r:.3}): closer archetypes co-occur more"),
        )
    } else if r < -0.3 {
        (
            SignalStrength::Moderate,
            format!("moderate predictive signal (r = {r:.3})"),
        )
    } else {
        (
            SignalStrength::Weak,
            format!("weak but significant correlation (r = {r:.3})"),
        )
    };
    Interpretation { strength, message }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Far apart in coordinate space yet frequently together.
    DistantButFrequent,
    /// Close in coordinate space yet rarely together.
    CloseButRare,
    /// Disagreement without a clear direction on one side.
    Mixed,
}

impl AnomalyKind {
    pub fn describe(self) -> &'static str {
        match self {
            AnomalyKind::DistantButFrequent => {
                "distant archetypes co-occur far more often than their coordinates predict"
            }
            AnomalyKind::CloseButRare => {
                "neighbouring archetypes co-occur far less often than their coordinates predict"
            }
            AnomalyKind::Mixed => "distance and co-occurrence disagree",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairAnomaly {
    pub entity_a: String,
    pub entity_b: String,
    pub archetype_a: String,
    pub archetype_b: String,
    pub distance: f64,
    pub cooccurrence: f64,
    pub z_distance: f64,
    pub z_cooccurrence: f64,
    pub anomaly_score: f64,
    pub kind: AnomalyKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub pearson_r: f64,
    pub pearson_p: f64,
    pub spearman_r: f64,
    pub spearman_p: f64,
    pub sample_size: usize,
    pub metric: DistanceMetric,
    pub cooccurrence_metric: CooccurrenceMetric,
    pub interpretation: Interpretation,
    pub outliers: Vec<PairAnomaly>,
}

/// One cell of the distance-metric by co-occurrence-variant comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricVariant {
    pub metric: DistanceMetric,
    pub cooccurrence_metric: CooccurrenceMetric,
    pub pearson_r: Option<f64>,
    pub pearson_p: Option<f64>,
    pub spearman_r: Option<f64>,
}

/// Aligned distance / co-occurrence vectors for a fixed pair list.
#[derive(Debug, Clone, Default)]
pub struct PairObservations {
    pub pairs: Vec<EntityPair>,
    pub distances: Vec<f64>,
    pub cooccurrence: Vec<f64>,
}

impl PairObservations {
    /// Observations without pair identities (synthetic or derived data).
    pub fn from_values(distances: Vec<f64>, cooccurrence: Vec<f64>) -> Self {
        Self {
            pairs: Vec::new(),
            distances,
            cooccurrence,
        }
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn stats(&self) -> Result<CorrelationStats, EngineError> {
        correlation_of(&self.distances, &self.cooccurrence)
    }
}

/// Correlation between two aligned vectors with the degenerate cases made
/// explicit.
pub fn correlation_of(distances: &[f64], cooccurrence: &[f64]) -> Result<CorrelationStats, EngineError> {
    if stats::std_population(distances) <= f64::EPSILON {
        return Err(EngineError::DegenerateSample("distance"));
    }
    if stats::std_population(cooccurrence) <= f64::EPSILON {
        return Err(EngineError::DegenerateSample("co-occurrence"));
    }
    stats::correlation_stats(distances, cooccurrence)
        .ok_or(EngineError::DegenerateSample("correlation input"))
}

/// Squared per-axis coordinate differences for a fixed pair list. Lets
/// weighted distances be re-evaluated for many weight vectors without
/// touching the store again.
#[derive(Debug, Clone, Default)]
pub struct PairDeltas {
    pub squared: Vec<[f64; AXIS_COUNT]>,
    pub cooccurrence: Vec<f64>,
}

impl PairDeltas {
    pub fn len(&self) -> usize {
        self.squared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squared.is_empty()
    }

    /// Weighted Euclidean distance for every pair.
    pub fn weighted_distances(&self, weights: &AxisWeights) -> Vec<f64> {
        let w = weights.values();
        self.squared
            .iter()
            .map(|sq| (0..AXIS_COUNT).map(|i| w[i] * sq[i]).sum::<f64>().sqrt())
            .collect()
    }

    /// Distance along a single axis.
    pub fn axis_distances(&self, axis: SpectralAxis) -> Vec<f64> {
        let i = axis.index();
        self.squared.iter().map(|sq| sq[i].sqrt()).collect()
    }
}

// ---------------------------------------------------------------------
//  Engine
// ---------------------------------------------------------------------

/// Read-only view over the store, the mapped entities and the index.
///
/// Entity indices used throughout (pools, pairs) are positions in
/// [`MappedEntities`].
pub struct CorrelationEngine<'a> {
    store: &'a CoordinateStore,
    entities: &'a MappedEntities,
    cooccurrence: &'a CooccurrenceIndex,
    cfg: EngineConfig,
    keys: Vec<Option<EntityKey>>,
}

impl<'a> CorrelationEngine<'a> {
    pub fn new(
        store: &'a CoordinateStore,
        entities: &'a MappedEntities,
        cooccurrence: &'a CooccurrenceIndex,
        cfg: EngineConfig,
    ) -> Self {
        let keys = entities
            .entities()
            .iter()
            .map(|entity| cooccurrence.key(&entity.name))
            .collect();
        Self {
            store,
            entities,
            cooccurrence,
            cfg,
            keys,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &CoordinateStore {
        self.store
    }

    pub fn entities(&self) -> &MappedEntities {
        self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Every mapped entity index.
    pub fn all_entities(&self) -> Vec<usize> {
        (0..self.entities.len()).collect()
    }

    pub fn coordinates(&self, entity: usize) -> &CoordinateVector {
        &self.store.record(self.entities.get(entity).archetype).coordinates
    }

    /// Pairs for a pool: exhaustive below the sample cap, sampled above it.
    pub fn sample_pairs(
        &self,
        pool: &[usize],
        rng: &mut impl Rng,
    ) -> Result<Vec<EntityPair>, EngineError> {
        self.check_pool(pool)?;
        let pairs = sampling::sample_pairs(pool, self.cfg.sample_cap, self.cfg.retry_factor, rng);
        self.check_pairs(pairs.len())?;
        Ok(pairs)
    }

    pub fn check_pool(&self, pool: &[usize]) -> Result<(), EngineError> {
        if pool.len() < self.cfg.min_entities {
            return Err(EngineError::InsufficientSample {
                found: pool.len(),
                required: self.cfg.min_entities,
                unit: SampleUnit::Entities,
            });
        }
        Ok(())
    }

    pub fn check_pairs(&self, found: usize) -> Result<(), EngineError> {
        if found < self.cfg.min_sample {
            return Err(EngineError::InsufficientSample {
                found,
                required: self.cfg.min_sample,
                unit: SampleUnit::Pairs,
            });
        }
        Ok(())
    }

    pub fn pair_distance(&self, pair: EntityPair, weights: &AxisWeights, metric: DistanceMetric) -> f64 {
        distance(self.coordinates(pair.a), self.coordinates(pair.b), weights, metric)
    }

    pub fn pair_cooccurrence(&self, pair: EntityPair, metric: CooccurrenceMetric) -> f64 {
        match (self.keys[pair.a], self.keys[pair.b]) {
            (Some(a), Some(b)) => self.cooccurrence.value_keys(a, b, metric),
            _ => 0.0,
        }
    }

    pub fn observe(
        &self,
        pairs: &[EntityPair],
        weights: &AxisWeights,
        metric: DistanceMetric,
    ) -> PairObservations {
        self.observe_with(pairs, weights, metric, self.cfg.cooccurrence_metric)
    }

    pub fn observe_with(
        &self,
        pairs: &[EntityPair],
        weights: &AxisWeights,
        metric: DistanceMetric,
        cooccurrence_metric: CooccurrenceMetric,
    ) -> PairObservations {
        let distances = pairs
            .iter()
            .map(|&pair| self.pair_distance(pair, weights, metric))
            .collect();
        let cooccurrence = pairs
            .iter()
            .map(|&pair| self.pair_cooccurrence(pair, cooccurrence_metric))
            .collect();
        PairObservations {
            pairs: pairs.to_vec(),
            distances,
            cooccurrence,
        }
    }

    pub fn deltas(&self, pairs: &[EntityPair]) -> PairDeltas {
        let squared = pairs
            .iter()
            .map(|pair| {
                let a = self.coordinates(pair.a).values();
                let b = self.coordinates(pair.b).values();
                let mut sq = [0.0; AXIS_COUNT];
                for i in 0..AXIS_COUNT {
                    sq[i] = (a[i] - b[i]) * (a[i] - b[i]);
                }
                sq
            })
            .collect();
        let cooccurrence = pairs
            .iter()
            .map(|&pair| self.pair_cooccurrence(pair, self.cfg.cooccurrence_metric))
            .collect();
        PairDeltas {
            squared,
            cooccurrence,
        }
    }

    /// Correlate coordinate distance against co-occurrence over `pairs`.
    pub fn correlate(
        &self,
        pairs: &[EntityPair],
        weights: &AxisWeights,
        metric: DistanceMetric,
    ) -> Result<CorrelationResult, EngineError> {
        self.check_pairs(pairs.len())?;
        let obs = self.observe(pairs, weights, metric);
        self.summarize(&obs, metric, self.cfg.cooccurrence_metric)
    }

    /// Statistics, interpretation and outliers for prepared observations.
    pub fn summarize(
        &self,
        obs: &PairObservations,
        metric: DistanceMetric,
        cooccurrence_metric: CooccurrenceMetric,
    ) -> Result<CorrelationResult, EngineError> {
        self.check_pairs(obs.len())?;
        let stats = obs.stats()?;
        Ok(CorrelationResult {
            pearson_r: stats.pearson_r,
            pearson_p: stats.pearson_p,
            spearman_r: stats.spearman_r,
            spearman_p: stats.spearman_p,
            sample_size: stats.n,
            metric,
            cooccurrence_metric,
            interpretation: interpret(stats.pearson_r, stats.pearson_p, self.cfg.alpha),
            outliers: self.outliers(obs),
        })
    }

    /// Correlation for every distance metric and co-occurrence variant over
    /// the same pairs. Weighted metrics use `weights`.
    pub fn compare_metrics(&self, pairs: &[EntityPair], weights: &AxisWeights) -> Vec<MetricVariant> {
        const METRICS: [DistanceMetric; 3] = [
            DistanceMetric::Euclidean,
            DistanceMetric::WeightedEuclidean,
            DistanceMetric::Cosine,
        ];
        let mut variants = Vec::with_capacity(METRICS.len() * CooccurrenceMetric::ALL.len());
        for metric in METRICS {
            for cooccurrence_metric in CooccurrenceMetric::ALL {
                let stats = self
                    .observe_with(pairs, weights, metric, cooccurrence_metric)
                    .stats()
                    .ok();
                variants.push(MetricVariant {
                    metric,
                    cooccurrence_metric,
                    pearson_r: stats.map(|s| s.pearson_r),
                    pearson_p: stats.map(|s| s.pearson_p),
                    spearman_r: stats.map(|s| s.spearman_r),
                });
            }
        }
        variants
    }

    /// Pairs whose distance and co-occurrence move against the hypothesis,
    /// highest anomaly score first.
    pub fn outliers(&self, obs: &PairObservations) -> Vec<PairAnomaly> {
        if obs.pairs.len() != obs.len() || obs.is_empty() {
            return Vec::new();
        }
        let z_distance = stats::z_scores(&obs.distances);
        let z_cooccurrence = stats::z_scores(&obs.cooccurrence);

        let mut anomalies: Vec<PairAnomaly> = Vec::new();
        for (i, pair) in obs.pairs.iter().enumerate() {
            let (zd, zc) = (z_distance[i], z_cooccurrence[i]);
            // Under the hypothesis z_distance tracks -z_cooccurrence.
            let score = (zd - (-zc)).abs();
            if score <= self.cfg.outlier_threshold {
                continue;
            }
            let kind = match (zd > 0.0, zc > 0.0) {
                (true, true) => AnomalyKind::DistantButFrequent,
                (false, false) => AnomalyKind::CloseButRare,
                _ => AnomalyKind::Mixed,
            };
            let a = self.entities.get(pair.a);
            let b = self.entities.get(pair.b);
            anomalies.push(PairAnomaly {
                entity_a: a.name.clone(),
                entity_b: b.name.clone(),
                archetype_a: a.archetype_id.clone(),
                archetype_b: b.archetype_id.clone(),
                distance: obs.distances[i],
                cooccurrence: obs.cooccurrence[i],
                z_distance: zd,
                z_cooccurrence: zc,
                anomaly_score: score,
                kind,
            });
        }

        anomalies.sort_by(|x, y| {
            y.anomaly_score
                .partial_cmp(&x.anomaly_score)
                .unwrap_or(Ordering::Equal)
        });
        anomalies.truncate(self.cfg.top_outliers);
        anomalies
    }
}
