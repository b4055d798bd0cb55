//! Run configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationConfig;
use crate::engine::{DistanceMetric, EngineConfig};

/// Default report path when neither `--out` nor `ARCHETYPE_REPORT_PATH` is
/// given.
pub const DEFAULT_REPORT_FILE: &str = "archetype_report.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a validation run needs besides its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Root seed; every stochastic step derives its own stream from it.
    pub seed: u64,
    /// Pair sampling, minimum sizes, outliers, co-occurrence variant.
    pub engine: EngineConfig,
    /// Metric for the raw (uncalibrated) correlation.
    pub distance_metric: DistanceMetric,
    pub permutation_iterations: usize,
    pub bootstrap_resamples: usize,
    pub mantel_permutations: usize,
    /// Upper bound applied to every resampling loop.
    pub max_resampling_iterations: usize,
    pub folds: usize,
    /// Smallest axis subset the dimensionality search evaluates.
    pub min_subset_size: usize,
    /// Bindings below this confidence are excluded.
    pub min_binding_confidence: f64,
    /// Correlate each catalog tradition separately and correct across them.
    pub stratify: bool,
    pub calibration: CalibrationConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            engine: EngineConfig::default(),
            distance_metric: DistanceMetric::Euclidean,
            permutation_iterations: 1_000,
            bootstrap_resamples: 1_000,
            mantel_permutations: 1_000,
            max_resampling_iterations: 100_000,
            folds: 5,
            min_subset_size: 3,
            min_binding_confidence: 0.0,
            stratify: true,
            calibration: CalibrationConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Reduced iteration counts for fast development loops.
    pub fn quick() -> Self {
        Self::default().into_quick()
    }

    /// Apply the quick profile's sample and iteration limits on top of this
    /// configuration, keeping everything else.
    pub fn into_quick(mut self) -> Self {
        self.engine.sample_cap = self.engine.sample_cap.min(300);
        self.permutation_iterations = self.permutation_iterations.min(100);
        self.bootstrap_resamples = self.bootstrap_resamples.min(100);
        self.mantel_permutations = self.mantel_permutations.min(99);
        self.folds = self.folds.min(3);
        self.calibration.max_iterations = self.calibration.max_iterations.min(20);
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks that abort a run before any computation.
    pub fn validate(&self, available_axes: usize, mapped_entities: usize) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.min_subset_size == 0 || self.min_subset_size > available_axes {
            return invalid(format!(
                "subset size {} exceeds the {available_axes} available axes",
                self.min_subset_size
            ));
        }
        if self.folds < 2 {
            return invalid(format!("fold count must be at least 2, got {}", self.folds));
        }
        if self.folds > mapped_entities {
            return invalid(format!(
                "fold count {} exceeds the {mapped_entities} mapped entities",
                self.folds
            ));
        }
        if self.engine.min_sample < 2 {
            return invalid(format!(
                "minimum sample must be at least 2, got {}",
                self.engine.min_sample
            ));
        }
        if self.engine.sample_cap < self.engine.min_sample {
            return invalid(format!(
                "sample cap {} is below the minimum sample {}",
                self.engine.sample_cap, self.engine.min_sample
            ));
        }
        if !(self.engine.alpha > 0.0 && self.engine.alpha < 1.0) {
            return invalid(format!("alpha {} outside (0, 1)", self.engine.alpha));
        }
        if !(0.0..=1.0).contains(&self.min_binding_confidence) {
            return invalid(format!(
                "binding confidence floor {} outside [0, 1]",
                self.min_binding_confidence
            ));
        }
        self.calibration
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

/// Report path from `ARCHETYPE_REPORT_PATH`, else [`DEFAULT_REPORT_FILE`].
pub fn default_report_path() -> PathBuf {
    if let Ok(path) = std::env::var("ARCHETYPE_REPORT_PATH") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from(DEFAULT_REPORT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"seed": 7, "engine": {"sample_cap": 50}}"#).unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.engine.sample_cap, 50);
        assert_eq!(cfg.engine.min_sample, 10);
        assert_eq!(cfg.folds, 5);
    }

    #[test]
    fn quick_profile_only_lowers_limits() {
        let mut cfg = AnalysisConfig {
            seed: 9,
            permutation_iterations: 5_000,
            bootstrap_resamples: 50,
            stratify: false,
            ..AnalysisConfig::default()
        };
        cfg = cfg.into_quick();
        assert_eq!(cfg.permutation_iterations, 100);
        assert_eq!(cfg.bootstrap_resamples, 50);
        assert_eq!(cfg.seed, 9);
        assert!(!cfg.stratify);
        assert_eq!(AnalysisConfig::quick().mantel_permutations, 99);
    }

    #[test]
    fn oversized_subset_and_fold_counts_are_fatal() {
        let mut cfg = AnalysisConfig::default();
        assert!(cfg.validate(8, 100).is_ok());
        cfg.min_subset_size = 9;
        assert!(cfg.validate(8, 100).is_err());
        cfg.min_subset_size = 3;
        cfg.folds = 20;
        assert!(cfg.validate(8, 12).is_err());
    }
}
