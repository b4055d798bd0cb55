//! Catalog + bindings + corpus → every analysis, isolated per procedure.
//!
//! Loading is the only fatal stage: a missing or malformed input, or a
//! configuration that cannot be satisfied, aborts with [`PipelineError`]
//! before any statistics run. After that each procedure produces its own
//! `Result`, and a failing one never stops the rest.
//!
//! Usage:
//! ```bash
//! archetype analyze --catalog archetypes/ --bindings bindings.json \
//!     --corpus corpus.sqlite --out report.json
//! ```

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::axes::{AxisWeights, SpectralAxis, AXIS_COUNT};
use crate::binding::{load_bindings, BindingError, DataQualityWarning, EntityBinding, MappedEntities};
use crate::calibration::{
    axis_ablation, calibrate, dimensionality_search, AblationResult, CalibrationOutcome,
    DimensionalityResult, Objective,
};
use crate::catalog::{CatalogError, CoordinateStore};
use crate::config::{AnalysisConfig, ConfigError};
use crate::cooccurrence::CooccurrenceIndex;
use crate::corpus::{open_corpus, CorpusError, MemoryCorpus, SegmentCorpus, SqliteCorpus};
use crate::engine::{
    CorrelationEngine, CorrelationResult, DistanceMetric, EngineError, MetricVariant, SampleUnit,
};
use crate::report::fingerprint_paths;
use crate::sampling::{derive_seed, stream_rng, streams, EntityPair};
use crate::significance::{
    bootstrap_ci, bounded_iterations, cross_validate, headline_verdict, mantel_test,
    permutation_test, stratified_significance, stratified_verdict, BootstrapResult,
    CrossValidationResult, MantelResult, PermutationResult, StratifiedResult, Verdict,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("bindings: {0}")]
    Binding(#[from] BindingError),
    #[error("corpus: {0}")]
    Corpus(#[from] CorpusError),
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Clone)]
pub struct InputPaths {
    pub catalog: PathBuf,
    pub bindings: PathBuf,
    pub corpus: PathBuf,
}

/// Loaded, resolved and indexed inputs. Read-only for the rest of a run.
pub struct AnalysisInputs {
    pub store: CoordinateStore,
    pub entities: MappedEntities,
    pub cooccurrence: CooccurrenceIndex,
    /// blake3 over the input files, or over the in-memory parts.
    pub fingerprint: String,
}

impl AnalysisInputs {
    pub fn load(paths: &InputPaths, min_binding_confidence: f64) -> Result<Self, PipelineError> {
        let store = CoordinateStore::load(&paths.catalog)?;
        let bindings = load_bindings(&paths.bindings)?;
        let corpus = open_corpus(&paths.corpus)?;
        let mut inputs = Self::from_parts(store, &bindings, corpus.as_ref(), min_binding_confidence)?;
        inputs.fingerprint = fingerprint_paths(&[
            paths.catalog.as_path(),
            paths.bindings.as_path(),
            paths.corpus.as_path(),
        ]);
        Ok(inputs)
    }

    /// Resolve bindings and index the corpus. Entities the corpus never
    /// mentions are excluded with a warning.
    pub fn from_parts(
        store: CoordinateStore,
        bindings: &[EntityBinding],
        corpus: &dyn SegmentCorpus,
        min_binding_confidence: f64,
    ) -> Result<Self, PipelineError> {
        let mut entities = MappedEntities::resolve(bindings, &store, min_binding_confidence);
        let cooccurrence = CooccurrenceIndex::build_tracked(corpus, entities.names())?;

        entities.retain_with_warning(
            |entity| cooccurrence.frequency(&entity.name) > 0,
            |entity| {
                warn!(entity = %entity.name, "entity never appears in the corpus; excluded");
                DataQualityWarning::AbsentFromCorpus {
                    entity: entity.name.clone(),
                }
            },
        );
        info!(
            archetypes = store.len(),
            mapped = entities.len(),
            unmapped = entities.unmapped_count(),
            "inputs resolved"
        );

        let fingerprint = fingerprint_parts(&store, &entities, &cooccurrence);
        Ok(Self {
            store,
            entities,
            cooccurrence,
            fingerprint,
        })
    }

    pub fn engine(&self, cfg: &AnalysisConfig) -> CorrelationEngine<'_> {
        CorrelationEngine::new(&self.store, &self.entities, &self.cooccurrence, cfg.engine.clone())
    }
}

fn fingerprint_parts(
    store: &CoordinateStore,
    entities: &MappedEntities,
    cooccurrence: &CooccurrenceIndex,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for record in store.records() {
        hasher.update(record.id.as_bytes());
        for value in record.coordinates.values() {
            hasher.update(&value.to_le_bytes());
        }
    }
    for entity in entities.entities() {
        hasher.update(entity.name.as_bytes());
        hasher.update(entity.archetype_id.as_bytes());
    }
    for pair in cooccurrence.pairs() {
        hasher.update(pair.entity_a.as_bytes());
        hasher.update(pair.entity_b.as_bytes());
        hasher.update(&pair.count.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of every procedure in a run. Each field is independent.
#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub config: AnalysisConfig,
    pub sampled_pairs: usize,
    pub raw: Result<CorrelationResult, EngineError>,
    pub calibration: Result<CalibrationOutcome, EngineError>,
    pub calibrated: Result<CorrelationResult, EngineError>,
    pub permutation: Result<PermutationResult, EngineError>,
    pub bootstrap: Result<BootstrapResult, EngineError>,
    pub cross_validation: Result<CrossValidationResult, EngineError>,
    pub mantel: Result<MantelResult, EngineError>,
    pub stratified: Result<StratifiedResult, EngineError>,
    pub dimensionality: Result<DimensionalityResult, EngineError>,
    pub ablation: Result<AblationResult, EngineError>,
    pub metric_comparison: Result<Vec<MetricVariant>, EngineError>,
    pub verdict: Verdict,
    pub stratified_verdict: Option<Verdict>,
}

fn logged<T>(section: &str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(err) = &result {
        warn!(section, error = %err, "analysis section not computed");
    }
    result
}

/// Run every analysis over loaded inputs.
pub fn run_analysis(
    inputs: &AnalysisInputs,
    cfg: &AnalysisConfig,
) -> Result<AnalysisResults, PipelineError> {
    cfg.validate(AXIS_COUNT, inputs.entities.len())?;

    let engine = inputs.engine(cfg);
    let pool = engine.all_entities();
    let seed = cfg.seed;
    let cap = cfg.max_resampling_iterations;
    let unit = AxisWeights::uniform();

    let mut rng = stream_rng(seed, streams::PAIR_SAMPLE);
    let pairs: Result<Vec<EntityPair>, EngineError> = engine.sample_pairs(&pool, &mut rng);
    let sampled_pairs = pairs.as_ref().map(Vec::len).unwrap_or(0);
    info!(entities = pool.len(), pairs = sampled_pairs, "pairs sampled");

    let raw = logged(
        "raw_correlation",
        pairs
            .clone()
            .and_then(|p| engine.correlate(&p, &unit, cfg.distance_metric)),
    );

    let deltas = pairs.clone().map(|p| engine.deltas(&p));
    let calibration = logged(
        "calibration",
        deltas.clone().and_then(|d| {
            calibrate(&d, unit, Objective::MaximizeAbsSpearman, &cfg.calibration)
        }),
    );
    let calibrated_weights = calibration.as_ref().map(|c| c.weights).unwrap_or(unit);
    let calibrated = logged(
        "calibrated_correlation",
        calibration.clone().and_then(|c| {
            pairs
                .clone()
                .and_then(|p| engine.correlate(&p, &c.weights, DistanceMetric::WeightedEuclidean))
        }),
    );

    let observations = pairs
        .clone()
        .map(|p| engine.observe(&p, &unit, cfg.distance_metric));
    let permutation = logged(
        "permutation_test",
        observations.clone().and_then(|obs| {
            let iterations = bounded_iterations("permutation", cfg.permutation_iterations, cap);
            permutation_test(&obs, iterations, derive_seed(seed, streams::PERMUTATION))
        }),
    );
    let bootstrap = logged(
        "bootstrap",
        observations.and_then(|obs| {
            let resamples = bounded_iterations("bootstrap", cfg.bootstrap_resamples, cap);
            bootstrap_ci(&obs, resamples, derive_seed(seed, streams::BOOTSTRAP))
        }),
    );

    let cross_validation = logged(
        "cross_validation",
        cross_validate(
            &engine,
            &pool,
            cfg.folds,
            unit,
            &cfg.calibration,
            derive_seed(seed, streams::FOLDS),
        ),
    );

    let mantel = logged(
        "mantel_test",
        mantel_test(
            &engine,
            &pool,
            &unit,
            cfg.distance_metric,
            bounded_iterations("mantel", cfg.mantel_permutations, cap),
            derive_seed(seed, streams::MANTEL),
        ),
    );

    let stratified = logged("stratified", run_stratified(inputs, &engine, cfg));

    let dimensionality = logged(
        "dimensionality_search",
        deltas
            .clone()
            .and_then(|d| dimensionality_search(&d, &SpectralAxis::ALL, cfg.min_subset_size)),
    );
    let ablation = logged(
        "axis_ablation",
        deltas.and_then(|d| {
            calibration
                .as_ref()
                .map(|c| axis_ablation(&d, &c.weights))
                .map_err(Clone::clone)
        }),
    );
    let metric_comparison = logged(
        "metric_comparison",
        pairs.map(|p| engine.compare_metrics(&p, &calibrated_weights)),
    );

    let verdict = headline_verdict(
        raw.as_ref().ok(),
        permutation.as_ref().ok(),
        bootstrap.as_ref().ok(),
        mantel.as_ref().ok(),
        cfg.engine.alpha,
    );
    let stratified_verdict = stratified.as_ref().ok().map(stratified_verdict);
    info!(%verdict, "analysis complete");

    Ok(AnalysisResults {
        config: cfg.clone(),
        sampled_pairs,
        raw,
        calibration,
        calibrated,
        permutation,
        bootstrap,
        cross_validation,
        mantel,
        stratified,
        dimensionality,
        ablation,
        metric_comparison,
        verdict,
        stratified_verdict,
    })
}

fn run_stratified(
    inputs: &AnalysisInputs,
    engine: &CorrelationEngine<'_>,
    cfg: &AnalysisConfig,
) -> Result<StratifiedResult, EngineError> {
    if !cfg.stratify {
        return Err(EngineError::Configuration("stratified analysis disabled".into()));
    }
    let strata = inputs.entities.by_tradition(&inputs.store);
    if strata.len() < 2 {
        return Err(EngineError::InsufficientSample {
            found: strata.len(),
            required: 2,
            unit: SampleUnit::Strata,
        });
    }
    Ok(stratified_significance(
        engine,
        &strata,
        &AxisWeights::uniform(),
        cfg.distance_metric,
        derive_seed(cfg.seed, streams::STRATA),
    ))
}

/// Load inputs from disk and run every analysis.
pub fn analyze_paths(
    paths: &InputPaths,
    cfg: &AnalysisConfig,
) -> Result<(AnalysisInputs, AnalysisResults), PipelineError> {
    let inputs = AnalysisInputs::load(paths, cfg.min_binding_confidence)?;
    let results = run_analysis(&inputs, cfg)?;
    Ok((inputs, results))
}

/// Convert a JSON corpus into the SQLite layout.
pub fn import_corpus(json: &Path, sqlite: &Path) -> Result<usize, PipelineError> {
    let corpus = MemoryCorpus::load(json)?;
    let mut db = SqliteCorpus::create(sqlite)?;
    Ok(db.import(&corpus)?)
}
