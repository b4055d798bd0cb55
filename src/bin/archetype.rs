#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use archetype_calibration::config::default_report_path;
use archetype_calibration::corpus::open_corpus;
use archetype_calibration::evaluation::{run_synthetic_suite, synthetic_cases, write_inputs};
use archetype_calibration::pipeline::{analyze_paths, import_corpus};
use archetype_calibration::report::write_report;
use archetype_calibration::{
    build_report, render_report_markdown, AnalysisConfig, CooccurrenceIndex, CooccurrenceMetric,
    DistanceMetric, InputPaths,
};

#[derive(Parser)]
#[command(name = "archetype", version, about = "Archetype coordinate validation CLI")]
struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Euclidean,
    WeightedEuclidean,
    Cosine,
}

impl From<MetricArg> for DistanceMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Euclidean => DistanceMetric::Euclidean,
            MetricArg::WeightedEuclidean => DistanceMetric::WeightedEuclidean,
            MetricArg::Cosine => DistanceMetric::Cosine,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CooccurrenceArg {
    Raw,
    Log,
    Normalized,
}

impl From<CooccurrenceArg> for CooccurrenceMetric {
    fn from(arg: CooccurrenceArg) -> Self {
        match arg {
            CooccurrenceArg::Raw => CooccurrenceMetric::Raw,
            CooccurrenceArg::Log => CooccurrenceMetric::Log,
            CooccurrenceArg::Normalized => CooccurrenceMetric::Normalized,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate catalog coordinates against corpus co-occurrence
    Analyze {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        bindings: PathBuf,
        /// SQLite (.sqlite/.sqlite3/.db) or JSON segment corpus
        #[arg(long)]
        corpus: PathBuf,
        /// Report path (defaults to $ARCHETYPE_REPORT_PATH or archetype_report.json)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the markdown summary here instead of stdout
        #[arg(long)]
        markdown: Option<PathBuf>,
        /// JSON config file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Reduced iteration counts for development runs, applied after --config
        #[arg(long)]
        quick: bool,
        /// Pair sample cap
        #[arg(long)]
        sample_size: Option<usize>,
        /// Iterations for the permutation, bootstrap and Mantel loops
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        folds: Option<usize>,
        #[arg(long, value_enum)]
        metric: Option<MetricArg>,
        #[arg(long, value_enum)]
        cooccurrence: Option<CooccurrenceArg>,
        /// Skip the per-tradition analysis
        #[arg(long)]
        no_stratify: bool,
    },
    /// Run the synthetic evaluation suite
    Eval {
        #[arg(long)]
        case: Option<String>,
        /// JSONL results
        #[arg(long)]
        out: PathBuf,
        /// Also write each case's catalog/bindings/corpus under this directory
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Export the co-occurrence index of a corpus to JSONL
    CooccurrenceExport {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Convert a JSON segment corpus to SQLite
    CorpusImport {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Analyze {
            catalog,
            bindings,
            corpus,
            out,
            markdown,
            config,
            quick,
            sample_size,
            iterations,
            seed,
            folds,
            metric,
            cooccurrence,
            no_stratify,
        } => {
            let mut cfg = match config {
                Some(path) => AnalysisConfig::load(path)?,
                None => AnalysisConfig::default(),
            };
            if quick {
                cfg = cfg.into_quick();
            }
            if let Some(cap) = sample_size {
                cfg.engine.sample_cap = cap;
            }
            if let Some(n) = iterations {
                cfg.permutation_iterations = n;
                cfg.bootstrap_resamples = n;
                cfg.mantel_permutations = n;
            }
            if let Some(seed) = seed {
                cfg.seed = seed;
            }
            if let Some(k) = folds {
                cfg.folds = k;
            }
            if let Some(metric) = metric {
                cfg.distance_metric = metric.into();
            }
            if let Some(variant) = cooccurrence {
                cfg.engine.cooccurrence_metric = variant.into();
            }
            if no_stratify {
                cfg.stratify = false;
            }

            let paths = InputPaths {
                catalog,
                bindings,
                corpus,
            };
            let (inputs, results) = analyze_paths(&paths, &cfg)?;
            let report = build_report(&inputs, results);

            let out = out.unwrap_or_else(default_report_path);
            write_report(&out, &report)?;
            eprintln!("Wrote report to {}", out.display());

            let summary = render_report_markdown(&report);
            match markdown {
                Some(path) => std::fs::write(path, summary)?,
                None => println!("{summary}"),
            }
        }
        Commands::Eval {
            case,
            out,
            export_dir,
        } => {
            let results = run_synthetic_suite(case.as_deref())?;
            let mut file = File::create(out)?;
            for result in &results {
                let line = serde_json::to_string(result)?;
                writeln!(file, "{line}")?;
            }
            if let Some(dir) = export_dir {
                for synthetic in synthetic_cases()
                    .iter()
                    .filter(|c| case.as_deref().map_or(true, |name| c.name == name))
                {
                    write_inputs(synthetic, &dir.join(&synthetic.name))?;
                }
            }
            let failed = results.iter().filter(|r| !r.passed).count();
            eprintln!("{} cases, {} failed", results.len(), failed);
        }
        Commands::CooccurrenceExport { corpus, out } => {
            let corpus = open_corpus(&corpus)?;
            let index = CooccurrenceIndex::build(corpus.as_ref())?;
            let rows = index.export_jsonl(&out)?;
            eprintln!("Exported {rows} pairs to {}", out.display());
        }
        Commands::CorpusImport { input, out } => {
            let segments = import_corpus(&input, &out)?;
            eprintln!("Imported {segments} segments into {}", out.display());
        }
    }

    Ok(())
}
