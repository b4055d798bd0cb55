//! Offline evaluation harness.
//!
//! Builds synthetic catalogs, bindings and corpora with a known relation
//! between coordinates and co-occurrence, runs them through the full
//! pipeline, and checks that the analysis recovers the planted structure.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;

use crate::axes::{CoordinateVector, SpectralAxis, AXIS_COUNT};
use crate::binding::EntityBinding;
use crate::catalog::{ArchetypeRecord, CoordinateStore};
use crate::config::AnalysisConfig;
use crate::corpus::MemoryCorpus;
use crate::pipeline::{run_analysis, AnalysisInputs, InputPaths, PipelineError};
use crate::significance::Verdict;

// =============================================================================
// Synthetic case definitions
// =============================================================================

/// How pair co-occurrence counts are generated.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// `round(scale / (1 + d))` with `d` the unweighted Euclidean distance.
    InverseDistance { scale: f64 },
    /// `round(scale * exp(-3 d))` with `d` measured on `axes` only.
    AxisDecay { axes: Vec<SpectralAxis>, scale: f64 },
    /// Uniform in `0..=max_count`, independent of coordinates.
    UniformNoise { max_count: u64 },
}

/// What the analysis must recover for the case to pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Raw Pearson r below -0.5 with p below alpha.
    StrongNegative,
    /// Permutation p-value at or above alpha.
    NoSignal,
    /// Calibrated weight on `axis` at least 5x the mean of the others.
    DominantAxis { axis: SpectralAxis },
    /// Dimensionality search picks exactly these axes.
    BestSubset { axes: Vec<SpectralAxis> },
}

#[derive(Debug, Clone)]
pub struct SyntheticCase {
    pub name: String,
    pub archetypes: Vec<[f64; AXIS_COUNT]>,
    pub entities_per_archetype: usize,
    pub signal: Signal,
    pub expectation: Expectation,
    pub min_subset_size: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub store: CoordinateStore,
    pub bindings: Vec<EntityBinding>,
    pub corpus: MemoryCorpus,
}

const TRADITIONS: [&str; 3] = ["tradition_a", "tradition_b", "tradition_c"];

/// Archetype coordinates drawn uniformly on `active` axes, 0.5 elsewhere.
pub fn random_archetypes(n: usize, active: &[SpectralAxis], seed: u64) -> Vec<[f64; AXIS_COUNT]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut coords = [0.5; AXIS_COUNT];
            for axis in active {
                coords[axis.index()] = rng.gen_range(0.0..=1.0);
            }
            coords
        })
        .collect()
}

impl SyntheticCase {
    /// Four archetypes on the main diagonal, three entities each, with
    /// counts falling off with distance.
    pub fn inverse_distance_line() -> Self {
        Self {
            name: "inverse_distance_4x3".into(),
            archetypes: vec![
                [0.0; AXIS_COUNT],
                [0.1; AXIS_COUNT],
                [0.9; AXIS_COUNT],
                [1.0; AXIS_COUNT],
            ],
            entities_per_archetype: 3,
            signal: Signal::InverseDistance { scale: 30.0 },
            expectation: Expectation::StrongNegative,
            min_subset_size: 3,
            seed: 42,
        }
    }

    pub fn uniform_noise(seed: u64) -> Self {
        Self {
            name: format!("uniform_noise_40_s{seed}"),
            archetypes: random_archetypes(40, &SpectralAxis::ALL, seed),
            entities_per_archetype: 1,
            signal: Signal::UniformNoise { max_count: 20 },
            expectation: Expectation::NoSignal,
            min_subset_size: 3,
            seed,
        }
    }

    pub fn single_axis(axis: SpectralAxis, seed: u64) -> Self {
        Self {
            name: format!("single_axis_{}", axis.id()),
            archetypes: random_archetypes(30, &SpectralAxis::ALL, seed),
            entities_per_archetype: 1,
            signal: Signal::AxisDecay {
                axes: vec![axis],
                scale: 40.0,
            },
            expectation: Expectation::DominantAxis { axis },
            min_subset_size: 1,
            seed,
        }
    }

    /// Four varying axes, signal carried by the first two.
    pub fn two_axis_subset(seed: u64) -> Self {
        let active = &SpectralAxis::ALL[..4];
        let signal_axes = vec![SpectralAxis::OrderChaos, SpectralAxis::CreationDestruction];
        Self {
            name: "two_axis_subset_4d".into(),
            archetypes: random_archetypes(40, active, seed),
            entities_per_archetype: 1,
            signal: Signal::AxisDecay {
                axes: signal_axes.clone(),
                scale: 40.0,
            },
            expectation: Expectation::BestSubset { axes: signal_axes },
            min_subset_size: 1,
            seed,
        }
    }

    pub fn entity_name(archetype: usize, slot: usize) -> String {
        format!("entity_{archetype:02}_{slot}")
    }

    pub fn archetype_id(&self, archetype: usize) -> String {
        format!("synthetic:{}:{archetype:02}", self.name)
    }

    pub fn dataset(&self) -> SyntheticDataset {
        let records: Vec<ArchetypeRecord> = self
            .archetypes
            .iter()
            .enumerate()
            .filter_map(|(idx, coords)| {
                Some(ArchetypeRecord {
                    id: self.archetype_id(idx),
                    name: Some(format!("Archetype {idx}")),
                    tradition: Some(TRADITIONS[idx % TRADITIONS.len()].to_string()),
                    coordinates: CoordinateVector::new(*coords).ok()?,
                })
            })
            .collect();

        let mut members: Vec<(String, usize)> = Vec::new();
        let mut bindings = Vec::new();
        for archetype in 0..self.archetypes.len() {
            for slot in 0..self.entities_per_archetype {
                let name = Self::entity_name(archetype, slot);
                bindings.push(EntityBinding {
                    entity: name.clone(),
                    archetype_id: self.archetype_id(archetype),
                    confidence: 1.0,
                    method: "synthetic".into(),
                });
                members.push((name, archetype));
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed ^ 0x5EED);
        let mut corpus = MemoryCorpus::new();
        let mut next = 0usize;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let a = &self.archetypes[members[i].1];
                let b = &self.archetypes[members[j].1];
                let count = self.pair_count(a, b, &mut rng);
                for _ in 0..count {
                    corpus.push(
                        format!("seg-{next}"),
                        &[members[i].0.as_str(), members[j].0.as_str()],
                    );
                    next += 1;
                }
            }
        }
        // Every entity appears at least once, whatever its pair counts.
        for (name, _) in &members {
            corpus.push(format!("seg-{next}"), &[name.as_str()]);
            next += 1;
        }

        SyntheticDataset {
            store: CoordinateStore::from_records(records).unwrap_or_default(),
            bindings,
            corpus,
        }
    }

    fn pair_count(&self, a: &[f64; AXIS_COUNT], b: &[f64; AXIS_COUNT], rng: &mut StdRng) -> u64 {
        match &self.signal {
            Signal::InverseDistance { scale } => {
                (scale / (1.0 + axis_gap(a, b, 0..AXIS_COUNT))).round() as u64
            }
            Signal::AxisDecay { axes, scale } => {
                let d = axis_gap(a, b, axes.iter().map(|axis| axis.index()));
                (scale * (-3.0 * d).exp()).round() as u64
            }
            Signal::UniformNoise { max_count } => rng.gen_range(0..=*max_count),
        }
    }

    pub fn config(&self) -> AnalysisConfig {
        let mut cfg = AnalysisConfig::quick();
        cfg.seed = self.seed;
        cfg.min_subset_size = self.min_subset_size;
        cfg.permutation_iterations = 1_000;
        cfg
    }
}

fn axis_gap(a: &[f64; AXIS_COUNT], b: &[f64; AXIS_COUNT], axes: impl Iterator<Item = usize>) -> f64 {
    axes.map(|i| (a[i] - b[i]) * (a[i] - b[i])).sum::<f64>().sqrt()
}

pub fn synthetic_cases() -> Vec<SyntheticCase> {
    vec![
        SyntheticCase::inverse_distance_line(),
        SyntheticCase::uniform_noise(7),
        SyntheticCase::single_axis(SpectralAxis::ActiveReceptive, 11),
        SyntheticCase::two_axis_subset(13),
    ]
}

// =============================================================================
// Running
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub case_name: String,
    pub expectation: Expectation,
    pub passed: bool,
    pub mapped_entities: usize,
    pub raw_pearson_r: Option<f64>,
    pub raw_pearson_p: Option<f64>,
    pub permutation_p: Option<f64>,
    pub calibrated_weights: Option<[f64; AXIS_COUNT]>,
    pub best_subset: Option<Vec<SpectralAxis>>,
    pub verdict: Verdict,
}

pub fn run_synthetic_suite(filter: Option<&str>) -> Result<Vec<EvaluationResult>, PipelineError> {
    synthetic_cases()
        .into_iter()
        .filter(|case| filter.map_or(true, |name| case.name == name))
        .map(|case| run_synthetic_case(&case))
        .collect()
}

pub fn run_synthetic_case(case: &SyntheticCase) -> Result<EvaluationResult, PipelineError> {
    let data = case.dataset();
    let cfg = case.config();
    let inputs = AnalysisInputs::from_parts(data.store, &data.bindings, &data.corpus, 0.0)?;
    let results = run_analysis(&inputs, &cfg)?;

    let raw = results.raw.as_ref().ok();
    let permutation_p = results.permutation.as_ref().ok().map(|p| p.empirical_p);
    let calibrated_weights = results.calibration.as_ref().ok().map(|c| *c.weights.values());
    let best_subset = results
        .dimensionality
        .as_ref()
        .ok()
        .map(|d| d.best.axes.clone());
    let alpha = cfg.engine.alpha;

    let passed = match &case.expectation {
        Expectation::StrongNegative => raw.is_some_and(|r| r.pearson_r < -0.5 && r.pearson_p < alpha),
        Expectation::NoSignal => permutation_p.is_some_and(|p| p >= alpha),
        Expectation::DominantAxis { axis } => calibrated_weights.is_some_and(|w| {
            let others = w
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != axis.index())
                .map(|(_, v)| v)
                .sum::<f64>()
                / (AXIS_COUNT - 1) as f64;
            w[axis.index()] >= 5.0 * others
        }),
        Expectation::BestSubset { axes } => best_subset.as_ref() == Some(axes),
    };

    Ok(EvaluationResult {
        case_name: case.name.clone(),
        expectation: case.expectation.clone(),
        passed,
        mapped_entities: inputs.entities.len(),
        raw_pearson_r: raw.map(|r| r.pearson_r),
        raw_pearson_p: raw.map(|r| r.pearson_p),
        permutation_p,
        calibrated_weights,
        best_subset,
        verdict: results.verdict,
    })
}

/// Write a case's catalog (JSON-LD), bindings and corpus so the CLI can be
/// pointed at them.
pub fn write_inputs(case: &SyntheticCase, dir: &Path) -> std::io::Result<InputPaths> {
    std::fs::create_dir_all(dir)?;
    let data = case.dataset();

    let graph: Vec<serde_json::Value> = data
        .store
        .records()
        .iter()
        .map(|record| {
            let coords: serde_json::Map<String, serde_json::Value> = SpectralAxis::ALL
                .iter()
                .map(|axis| (axis.id().to_string(), json!(record.coordinates.get(*axis))))
                .collect();
            json!({
                "@id": record.id,
                "@type": "Archetype",
                "name": record.name,
                "tradition": record.tradition,
                "spectralCoordinates": coords,
            })
        })
        .collect();
    let catalog = json!({ "@context": { "@vocab": "urn:archetype:" }, "@graph": graph });

    let paths = InputPaths {
        catalog: dir.join("catalog.jsonld"),
        bindings: dir.join("bindings.json"),
        corpus: dir.join("corpus.json"),
    };
    write_pretty(&paths.catalog, &catalog)?;
    write_pretty(&paths.bindings, &json!({ "mappings": data.bindings }))?;
    write_pretty(&paths.corpus, &data.corpus)?;
    Ok(paths)
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooccurrence::CooccurrenceIndex;

    #[test]
    fn inverse_distance_counts_fall_with_distance() {
        let case = SyntheticCase::inverse_distance_line();
        let data = case.dataset();
        let index = CooccurrenceIndex::build(&data.corpus).unwrap();
        let same = index.count("entity_00_0", "entity_00_1");
        let near = index.count("entity_00_0", "entity_01_0");
        let far = index.count("entity_00_0", "entity_03_0");
        assert_eq!(same, 30);
        assert!(same > near && near > far, "{same} {near} {far}");
        assert_eq!(data.store.len(), 4);
        assert_eq!(data.bindings.len(), 12);
    }

    #[test]
    fn datasets_are_reproducible() {
        let a = SyntheticCase::uniform_noise(3).dataset();
        let b = SyntheticCase::uniform_noise(3).dataset();
        assert_eq!(a.corpus.segments, b.corpus.segments);
    }
}
