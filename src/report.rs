//! Versioned validation report and its markdown rendering.
//!
//! Assembly is pure serialization: every number comes from
//! [`AnalysisResults`]; this module only arranges it and records, per
//! section, whether it was computed.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::binding::DataQualityWarning;
use crate::calibration::{AblationResult, CalibrationOutcome, DimensionalityResult};
use crate::config::AnalysisConfig;
use crate::engine::{AnomalyKind, CorrelationResult, EngineError, MetricVariant, PairAnomaly};
use crate::pipeline::{AnalysisInputs, AnalysisResults};
use crate::significance::{
    BootstrapResult, CrossValidationResult, MantelResult, PermutationResult, StratifiedResult,
    Verdict,
};

/// Bumped whenever a field is renamed or removed.
pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Complete,
    Partial,
    NotComputed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Section<T> {
    pub status: SectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub result: Option<T>,
}

impl<T> Section<T> {
    fn from_result(result: Result<T, EngineError>, partial: impl Fn(&T) -> Option<String>) -> Self {
        match result {
            Ok(value) => match partial(&value) {
                Some(detail) => Self {
                    status: SectionStatus::Partial,
                    detail: Some(detail),
                    result: Some(value),
                },
                None => Self {
                    status: SectionStatus::Complete,
                    detail: None,
                    result: Some(value),
                },
            },
            Err(err) => Self {
                status: SectionStatus::NotComputed,
                detail: Some(err.to_string()),
                result: None,
            },
        }
    }

    fn complete_or_missing(result: Result<T, EngineError>) -> Self {
        Self::from_result(result, |_| None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_archetypes: usize,
    pub bindings: usize,
    pub mapped_entities: usize,
    pub unmapped_entities: usize,
    pub corpus_segments: usize,
    pub cooccurring_pairs: usize,
    pub sampled_pairs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportStamp {
    pub seed: u64,
    pub config: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportVerdicts {
    pub headline: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stratified: Option<Verdict>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutlier {
    pub entity_a: String,
    pub entity_b: String,
    pub archetype_a: String,
    pub archetype_b: String,
    pub distance: f64,
    pub cooccurrence: f64,
    pub anomaly_score: f64,
    pub kind: AnomalyKind,
    pub interpretation: String,
}

impl From<&PairAnomaly> for ReportOutlier {
    fn from(anomaly: &PairAnomaly) -> Self {
        Self {
            entity_a: anomaly.entity_a.clone(),
            entity_b: anomaly.entity_b.clone(),
            archetype_a: anomaly.archetype_a.clone(),
            archetype_b: anomaly.archetype_b.clone(),
            distance: anomaly.distance,
            cooccurrence: anomaly.cooccurrence,
            anomaly_score: anomaly.anomaly_score,
            kind: anomaly.kind,
            interpretation: format!(
                "{} and {} ({} / {}): {} (distance {:.3}, co-occurrence {:.1})",
                anomaly.entity_a,
                anomaly.entity_b,
                anomaly.archetype_a,
                anomaly.archetype_b,
                anomaly.kind.describe(),
                anomaly.distance,
                anomaly.cooccurrence
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub report_version: u32,
    pub generated_at: String,
    pub input_fingerprint: String,
    pub run_stamp: ReportStamp,
    pub summary: ReportSummary,
    pub verdicts: ReportVerdicts,
    pub raw_correlation: Section<CorrelationResult>,
    pub calibrated_correlation: Section<CorrelationResult>,
    pub calibration: Section<CalibrationOutcome>,
    pub permutation_test: Section<PermutationResult>,
    pub bootstrap: Section<BootstrapResult>,
    pub cross_validation: Section<CrossValidationResult>,
    pub mantel_test: Section<MantelResult>,
    pub stratified: Section<StratifiedResult>,
    pub dimensionality_search: Section<DimensionalityResult>,
    pub axis_ablation: Section<AblationResult>,
    pub metric_comparison: Section<Vec<MetricVariant>>,
    pub top_outliers: Vec<ReportOutlier>,
    pub warnings: Vec<DataQualityWarning>,
}

pub fn build_report(inputs: &AnalysisInputs, results: AnalysisResults) -> ValidationReport {
    let top_outliers = results
        .raw
        .as_ref()
        .map(|raw| raw.outliers.iter().map(ReportOutlier::from).collect())
        .unwrap_or_default();

    ValidationReport {
        report_version: REPORT_VERSION,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        input_fingerprint: inputs.fingerprint.clone(),
        run_stamp: ReportStamp {
            seed: results.config.seed,
            config: results.config.clone(),
        },
        summary: ReportSummary {
            total_archetypes: inputs.store.len(),
            bindings: inputs.entities.binding_count(),
            mapped_entities: inputs.entities.len(),
            unmapped_entities: inputs.entities.unmapped_count(),
            corpus_segments: inputs.cooccurrence.segments_scanned(),
            cooccurring_pairs: inputs.cooccurrence.pair_count(),
            sampled_pairs: results.sampled_pairs,
        },
        verdicts: ReportVerdicts {
            headline: results.verdict,
            stratified: results.stratified_verdict,
        },
        raw_correlation: Section::complete_or_missing(results.raw),
        calibrated_correlation: Section::complete_or_missing(results.calibrated),
        calibration: Section::complete_or_missing(results.calibration),
        permutation_test: Section::complete_or_missing(results.permutation),
        bootstrap: Section::from_result(results.bootstrap, |b| {
            (b.valid_resamples < b.resamples).then(|| {
                format!(
                    "{} of {} resamples were degenerate",
                    b.resamples - b.valid_resamples,
                    b.resamples
                )
            })
        }),
        cross_validation: Section::from_result(results.cross_validation, |cv| {
            (cv.completed_folds < cv.k)
                .then(|| format!("{} of {} folds evaluated", cv.completed_folds, cv.k))
        }),
        mantel_test: Section::complete_or_missing(results.mantel),
        stratified: Section::from_result(results.stratified, |s| {
            (s.tests < s.strata.len())
                .then(|| format!("{} of {} strata tested", s.tests, s.strata.len()))
        }),
        dimensionality_search: Section::complete_or_missing(results.dimensionality),
        axis_ablation: Section::complete_or_missing(results.ablation),
        metric_comparison: Section::complete_or_missing(results.metric_comparison),
        top_outliers,
        warnings: inputs.entities.warnings().to_vec(),
    }
}

/// blake3 over the bytes of every input file; directories are walked in
/// path order.
pub fn fingerprint_paths(paths: &[&Path]) -> String {
    let mut hasher = blake3::Hasher::new();
    for path in paths {
        let mut files: Vec<_> = WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "input entry left out of the fingerprint");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();
        for file in files {
            hasher.update(file.to_string_lossy().as_bytes());
            match std::fs::read(&file) {
                Ok(bytes) => {
                    hasher.update(&bytes);
                }
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "input file left out of the fingerprint");
                }
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

pub fn write_report(path: impl AsRef<Path>, report: &ValidationReport) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

fn status_label(status: SectionStatus) -> &'static str {
    match status {
        SectionStatus::Complete => "complete",
        SectionStatus::Partial => "partial",
        SectionStatus::NotComputed => "not computed",
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "n/a".to_string())
}

fn push_missing<T>(out: &mut String, title: &str, section: &Section<T>) {
    out.push_str(&format!(
        "- {title}: {} ({})\n",
        status_label(section.status),
        section.detail.as_deref().unwrap_or("no detail")
    ));
}

fn push_correlation(out: &mut String, title: &str, section: &Section<CorrelationResult>) {
    match &section.result {
        Some(c) => out.push_str(&format!(
            "- {title}: Pearson r = {:.4} (p = {:.4}), Spearman r = {:.4} (p = {:.4}), n = {}, {}\n",
            c.pearson_r,
            c.pearson_p,
            c.spearman_r,
            c.spearman_p,
            c.sample_size,
            c.interpretation.message
        )),
        None => push_missing(out, title, section),
    }
}

pub fn render_report_markdown(report: &ValidationReport) -> String {
    let mut out = String::new();
    out.push_str("# Coordinate Validation Report\n\n");
    out.push_str(&format!("- Report version: {}\n", report.report_version));
    out.push_str(&format!("- Generated: {}\n", report.generated_at));
    out.push_str(&format!("- Input fingerprint: `{}`\n", report.input_fingerprint));
    out.push_str(&format!("- Seed: {}\n", report.run_stamp.seed));

    let s = &report.summary;
    out.push_str("\n## Summary\n\n");
    out.push_str(&format!("- Archetypes: {}\n", s.total_archetypes));
    out.push_str(&format!(
        "- Entities mapped/unmapped: {}/{} (of {} bindings)\n",
        s.mapped_entities, s.unmapped_entities, s.bindings
    ));
    out.push_str(&format!(
        "- Corpus segments: {} ({} co-occurring pairs)\n",
        s.corpus_segments, s.cooccurring_pairs
    ));
    out.push_str(&format!("- Sampled pairs: {}\n", s.sampled_pairs));

    out.push_str("\n## Verdict\n\n");
    out.push_str(&format!("- Hypothesis: **{}**\n", report.verdicts.headline));
    if let Some(stratified) = report.verdicts.stratified {
        out.push_str(&format!("- Per-tradition: **{stratified}**\n"));
    }

    out.push_str("\n## Correlation\n\n");
    push_correlation(&mut out, "Raw", &report.raw_correlation);
    push_correlation(&mut out, "Calibrated", &report.calibrated_correlation);
    if let Some(cal) = &report.calibration.result {
        let weights: Vec<String> = cal.weights.values().iter().map(|w| format!("{w:.2}")).collect();
        out.push_str(&format!(
            "- Calibrated weights: [{}] after {} iterations ({:?})\n",
            weights.join(", "),
            cal.iterations,
            cal.stop_reason
        ));
        if !cal.pruned_axes.is_empty() {
            let pruned: Vec<&str> = cal.pruned_axes.iter().map(|a| a.id()).collect();
            out.push_str(&format!("- Pruned axes: {}\n", pruned.join(", ")));
        }
    }

    out.push_str("\n## Significance\n\n");
    match &report.permutation_test.result {
        Some(p) => out.push_str(&format!(
            "- Permutation: empirical p = {:.4} ({} iterations), parametric p = {:.4}\n",
            p.empirical_p, p.iterations, p.parametric_p
        )),
        None => push_missing(&mut out, "Permutation", &report.permutation_test),
    }
    match &report.bootstrap.result {
        Some(b) => out.push_str(&format!(
            "- Bootstrap: Spearman r = {:.4}, 95% CI [{:.4}, {:.4}] ({})\n",
            b.spearman_r,
            b.ci_lower,
            b.ci_upper,
            if b.robust { "robust" } else { "includes zero" }
        )),
        None => push_missing(&mut out, "Bootstrap", &report.bootstrap),
    }
    match &report.cross_validation.result {
        Some(cv) => out.push_str(&format!(
            "- Cross-validation: held-out Spearman r = {:.4} ± {:.4} over {}/{} folds (unit weights {:.4})\n",
            cv.mean_spearman, cv.std_spearman, cv.completed_folds, cv.k, cv.baseline_mean_spearman
        )),
        None => push_missing(&mut out, "Cross-validation", &report.cross_validation),
    }
    match &report.mantel_test.result {
        Some(m) => out.push_str(&format!(
            "- Mantel: r = {:.4}, p = {:.4} ({} entities, {} permutations)\n",
            m.r, m.p_value, m.entities, m.permutations
        )),
        None => push_missing(&mut out, "Mantel", &report.mantel_test),
    }

    if let Some(strata) = &report.stratified.result {
        push_strata(&mut out, strata);
    }

    if let Some(dims) = &report.dimensionality_search.result {
        out.push_str(&format!(
            "\n## Dimensionality search ({} subsets, size >= {})\n\n",
            dims.evaluated, dims.min_size
        ));
        for row in dims.table.iter().take(10) {
            let axes: Vec<&str> = row.axes.iter().map(|a| a.id()).collect();
            out.push_str(&format!("- {{{}}}: Spearman r = {}\n", axes.join(", "), fmt_opt(row.spearman_r)));
        }
    }

    if let Some(variants) = &report.metric_comparison.result {
        out.push_str("\n## Metric comparison\n\n");
        out.push_str("| Distance | Co-occurrence | Pearson r | Spearman r |\n");
        out.push_str("|---|---|---:|---:|\n");
        for v in variants {
            out.push_str(&format!(
                "| {} | {:?} | {} | {} |\n",
                v.metric,
                v.cooccurrence_metric,
                fmt_opt(v.pearson_r),
                fmt_opt(v.spearman_r)
            ));
        }
    }

    out.push_str("\n## Top outliers\n\n");
    if report.top_outliers.is_empty() {
        out.push_str("- none\n");
    }
    for outlier in &report.top_outliers {
        out.push_str(&format!(
            "- score {:.2}: {}\n",
            outlier.anomaly_score, outlier.interpretation
        ));
    }

    if !report.warnings.is_empty() {
        out.push_str(&format!(
            "\n## Data-quality warnings ({})\n\n",
            report.warnings.len()
        ));
        for warning in report.warnings.iter().take(20) {
            out.push_str(&format!("- {}: {:?}\n", warning.entity(), warning));
        }
    }

    out
}

fn push_strata(out: &mut String, strata: &StratifiedResult) {
    out.push_str("\n## By tradition\n\n");
    out.push_str("| Tradition | Entities | r | p | Bonferroni | BH |\n");
    out.push_str("|---|---:|---:|---:|---|---|\n");
    for stratum in &strata.strata {
        match &stratum.correlation {
            Some(c) => out.push_str(&format!(
                "| {} | {} | {:.4} | {:.4} | {} | {} |\n",
                stratum.label,
                stratum.entities,
                c.pearson_r,
                c.pearson_p,
                survival(stratum.significant, stratum.survives_bonferroni),
                survival(stratum.significant, stratum.survives_benjamini_hochberg),
            )),
            None => out.push_str(&format!(
                "| {} | {} | n/a | n/a | skipped | skipped |\n",
                stratum.label, stratum.entities
            )),
        }
    }

    let lost: Vec<String> = strata
        .lost_to_correction()
        .map(|s| {
            format!(
                "{} (p = {}, Bonferroni {}, BH {})",
                s.label,
                fmt_opt(s.correlation.as_ref().map(|c| c.pearson_p)),
                fmt_opt(s.p_bonferroni),
                fmt_opt(s.q_benjamini_hochberg)
            )
        })
        .collect();
    if !lost.is_empty() {
        out.push_str(&format!(
            "\nSignificant before correction but lost to it: {}\n",
            lost.join("; ")
        ));
    }
}

fn survival(significant: bool, survives: bool) -> &'static str {
    match (significant, survives) {
        (false, _) => "n.s.",
        (true, true) => "survives",
        (true, false) => "lost",
    }
}
