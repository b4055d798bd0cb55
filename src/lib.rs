#![forbid(unsafe_code)]

//! # archetype-calibration
//!
//! Checks whether an 8-dimensional archetype coordinate system predicts
//! something real: do archetypes that sit close together in coordinate
//! space also have entities that appear together in narrative text?
//!
//! Entities bound to archetypes are paired, each pair gets a coordinate
//! distance and a co-occurrence count, and the two are correlated. A
//! permutation test, a bootstrap interval, k-fold cross-validation and a
//! Mantel matrix test assess significance. A calibration step fits per-axis
//! weights to the observed co-occurrence, and an exhaustive search over
//! axis subsets reports which dimensions carry the signal.

pub mod axes;
pub mod binding;
pub mod calibration;
pub mod catalog;
pub mod config;
pub mod cooccurrence;
pub mod corpus;
pub mod engine;
pub mod evaluation;
pub mod pipeline;
pub mod report;
pub mod sampling;
pub mod significance;
pub mod stats;

pub use axes::{AxisSubset, AxisWeights, CoordinateVector, SpectralAxis, AXIS_COUNT};
pub use binding::{load_bindings, DataQualityWarning, EntityBinding, MappedEntities};
pub use calibration::{calibrate, dimensionality_search, CalibrationConfig, Objective};
pub use catalog::{CatalogError, CoordinateStore};
pub use config::AnalysisConfig;
pub use cooccurrence::{CooccurrenceIndex, CooccurrenceMetric, CooccurrencePair};
pub use corpus::{open_corpus, MemoryCorpus, SegmentCorpus, SqliteCorpus};
pub use engine::{
    distance, CorrelationEngine, CorrelationResult, DistanceMetric, EngineConfig, EngineError,
};
pub use pipeline::{run_analysis, AnalysisInputs, AnalysisResults, InputPaths, PipelineError};
pub use report::{build_report, render_report_markdown, ValidationReport};
pub use significance::Verdict;
