//! pii-eval: merge recorded recognizer outputs and score them against a dataset
//!
//! Usage: pii-eval <command> --dataset <file> [options]
//!
//! Recognizers run offline and leave one predictions file each; this binary
//! only reconciles and evaluates. Logs go to stderr (`RUST_LOG` overrides the
//! default `info` level), results to stdout and CSV files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pii_core::consensus::ConsensusMerger;
use pii_core::metrics::{evaluate_corpus, MetricsReport};
use pii_core::recognizer::{PrecomputedRecognizer, Recognizer};
use pii_core::refine::refine;
use pii_core::report::{combined_file_name, metrics_file_name, write_report_file, CombinedReport};
use pii_core::{Anonymizer, Dataset, EvalConfig, Predictions, Span};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Method and source name of merged predictions.
const HYBRID: &str = "hybrid";

#[derive(Parser)]
#[command(name = "pii-eval")]
#[command(about = "Consensus merging and evaluation of personal-data recognizers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print dataset statistics
    Stats {
        #[arg(long)]
        dataset: PathBuf,
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Merge several predictions files into one
    Merge {
        #[arg(long)]
        dataset: PathBuf,
        /// One predictions file per recognizer
        #[arg(long, num_args = 1.., required = true)]
        predictions: Vec<PathBuf>,
        /// JSON config (sources, weights, thresholds)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the merged predictions
        #[arg(long)]
        out: PathBuf,
    },

    /// Score predictions against the dataset and write CSV reports
    Evaluate {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, num_args = 1.., required = true)]
        predictions: Vec<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also evaluate the consensus merge of all predictions
        #[arg(long)]
        hybrid: bool,
        /// Only evaluate these methods (repeatable)
        #[arg(long = "method")]
        methods: Vec<String>,
        /// Directory for per-method and combined CSV reports
        #[arg(long, default_value = "reports")]
        report_dir: PathBuf,
    },

    /// Print dialogs with detected spans replaced by placeholders
    Anonymize {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// 0.0 keeps everything, above 0.3 replaces every type
        #[arg(long, default_value_t = 0.8)]
        aggressiveness: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Stats { dataset, json } => stats(&dataset, json),
        Command::Merge {
            dataset,
            predictions,
            config,
            out,
        } => merge(&dataset, &predictions, config.as_deref(), &out),
        Command::Evaluate {
            dataset,
            predictions,
            config,
            hybrid,
            methods,
            report_dir,
        } => evaluate(&dataset, &predictions, config.as_deref(), hybrid, &methods, &report_dir),
        Command::Anonymize {
            dataset,
            predictions,
            config,
            aggressiveness,
        } => anonymize(&dataset, &predictions, config.as_deref(), aggressiveness),
    }
}

fn load_config(path: Option<&Path>) -> Result<EvalConfig> {
    match path {
        Some(path) => EvalConfig::load(path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(EvalConfig::default()),
    }
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    Dataset::load(path).with_context(|| format!("loading dataset {}", path.display()))
}

fn load_recognizers(paths: &[PathBuf], dataset: &Dataset) -> Result<Vec<PrecomputedRecognizer>> {
    let mut recognizers: Vec<PrecomputedRecognizer> = Vec::with_capacity(paths.len());
    for path in paths {
        let predictions = Predictions::load(path).with_context(|| format!("loading predictions {}", path.display()))?;
        if recognizers.iter().any(|r| r.name() == predictions.source) {
            bail!("source '{}' appears in more than one predictions file", predictions.source);
        }
        recognizers.push(predictions.to_recognizer(dataset));
    }
    Ok(recognizers)
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

// === stats ===

fn stats(dataset: &Path, json: bool) -> Result<()> {
    let dataset = load_dataset(dataset)?;
    let stats = dataset.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("dialogs:          {}", stats.total_dialogs);
    println!("with PD:          {} ({:.1}%)", stats.pd_dialogs, stats.pd_percentage);
    println!("without PD:       {}", stats.non_pd_dialogs);
    println!("entities:         {}", stats.total_entities);
    println!("invalid (dropped): {}", dataset.invalid_spans);
    for (ty, count) in &stats.entity_types {
        println!("  {ty:<16} {count}");
    }
    Ok(())
}

// === merge ===

/// Merges every dialog; dialogs no source could handle get `None`.
fn merge_dataset(
    merger: &ConsensusMerger,
    recognizers: &[PrecomputedRecognizer],
    dataset: &Dataset,
) -> Result<Vec<Option<Vec<Span>>>> {
    for recognizer in recognizers {
        if merger.weight(recognizer.name()).is_none() {
            bail!(
                "source '{}' has no weight; add it to the config's sources",
                recognizer.name()
            );
        }
    }
    let refs: Vec<&dyn Recognizer> = recognizers.iter().map(|r| r as &dyn Recognizer).collect();

    let mut merged = Vec::with_capacity(dataset.len());
    let mut failed = 0;
    for dialog in &dataset.dialogs {
        match merger.merge_with(&refs, &dialog.text) {
            Ok(outcome) => merged.push(Some(outcome.spans)),
            Err(pii_core::Error::NoRecognizerAvailable { .. }) => {
                warn!(dialog = %dialog.id, "no recognizer produced output");
                failed += 1;
                merged.push(None);
            }
            Err(err) => return Err(err).with_context(|| format!("merging dialog {}", dialog.id)),
        }
    }
    info!(dialogs = dataset.len(), failed, mode = ?merger.mode(), "merge finished");
    Ok(merged)
}

fn merge(dataset: &Path, predictions: &[PathBuf], config: Option<&Path>, out: &Path) -> Result<()> {
    let config = load_config(config)?;
    let dataset = load_dataset(dataset)?;
    let recognizers = load_recognizers(predictions, &dataset)?;
    let merger = config.merger()?;

    let merged = merge_dataset(&merger, &recognizers, &dataset)?;

    let mut file = Predictions::new(HYBRID);
    for (dialog, spans) in dataset.dialogs.iter().zip(merged) {
        match spans {
            Some(spans) => file.push_spans(dialog.id.clone(), &spans),
            None => file.push_error(dialog.id.clone(), "no recognizer produced output"),
        }
    }
    file.write(out)
        .with_context(|| format!("writing merged predictions {}", out.display()))?;
    info!(path = %out.display(), "wrote merged predictions");
    Ok(())
}

// === evaluate ===

fn score(
    method: &str,
    dataset: &Dataset,
    predictions: Vec<Option<Vec<Span>>>,
    config: &EvalConfig,
) -> Result<MetricsReport> {
    let documents: Vec<(Vec<Span>, Vec<Span>)> = dataset
        .dialogs
        .iter()
        .zip(predictions)
        .map(|(dialog, pred)| {
            let pred = pred.unwrap_or_default();
            let pred = if config.refine_predictions {
                refine(pred, &dialog.text)
            } else {
                pred
            };
            (dialog.entities.clone(), pred)
        })
        .collect();

    let report = evaluate_corpus(&documents, config.policy()?).with_configured_types(config.entity_types.iter().cloned());
    info!(
        method,
        f1_micro = report.micro.f1,
        f1_macro = report.macro_avg.f1,
        "evaluated"
    );
    Ok(report)
}

fn recorded_outputs(recognizer: &PrecomputedRecognizer, dataset: &Dataset) -> Vec<Option<Vec<Span>>> {
    dataset
        .dialogs
        .iter()
        .map(|dialog| match recognizer.extract(&dialog.text) {
            Ok(spans) => Some(spans),
            Err(err) => {
                warn!(source = %recognizer.name(), dialog = %dialog.id, "{err}, scoring as no predictions");
                None
            }
        })
        .collect()
}

fn evaluate(
    dataset_path: &Path,
    predictions: &[PathBuf],
    config: Option<&Path>,
    hybrid: bool,
    methods: &[String],
    report_dir: &Path,
) -> Result<()> {
    let config = load_config(config)?;
    let dataset = load_dataset(dataset_path)?;
    let recognizers = load_recognizers(predictions, &dataset)?;
    let name = dataset_name(dataset_path);

    std::fs::create_dir_all(report_dir).with_context(|| format!("creating {}", report_dir.display()))?;
    let combined_path = report_dir.join(combined_file_name(&name));
    let mut combined = if combined_path.exists() {
        CombinedReport::load(&combined_path).with_context(|| format!("reading {}", combined_path.display()))?
    } else {
        CombinedReport::new()
    };

    let wanted = |method: &str| methods.is_empty() || methods.iter().any(|m| m == method);

    let mut runs: Vec<(String, Vec<Option<Vec<Span>>>)> = recognizers
        .iter()
        .filter(|r| wanted(r.name()))
        .map(|r| (r.name().to_string(), recorded_outputs(r, &dataset)))
        .collect();
    if hybrid && wanted(HYBRID) {
        let merger = config.merger()?;
        runs.push((HYBRID.to_string(), merge_dataset(&merger, &recognizers, &dataset)?));
    }
    if runs.is_empty() {
        bail!("no method left to evaluate");
    }

    let mut summary = Vec::with_capacity(runs.len());
    for (method, outputs) in runs {
        if combined.contains_method(&method) {
            info!(method = %method, "already in combined report, skipping");
            continue;
        }
        let report = score(&method, &dataset, outputs, &config)?;

        let path = report_dir.join(metrics_file_name(&name, &method));
        write_report_file(&path, &report).with_context(|| format!("writing {}", path.display()))?;
        combined.add(&method, &report);
        summary.push((method, report));
    }

    combined
        .write(&combined_path)
        .with_context(|| format!("writing {}", combined_path.display()))?;
    info!(path = %combined_path.display(), "wrote combined report");

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &[(String, MetricsReport)]) {
    if summary.is_empty() {
        return;
    }
    println!(
        "{:<16} {:>9} {:>9} {:>9} {:>9}",
        "method", "precision", "recall", "f1_micro", "f1_macro"
    );
    for (method, report) in summary {
        println!(
            "{:<16} {:>9.3} {:>9.3} {:>9.3} {:>9.3}",
            method, report.micro.precision, report.micro.recall, report.micro.f1, report.macro_avg.f1
        );
    }
}

// === anonymize ===

fn anonymize(dataset: &Path, predictions: &Path, config: Option<&Path>, aggressiveness: f64) -> Result<()> {
    let config = load_config(config)?;
    let dataset = load_dataset(dataset)?;
    let recognizer = load_recognizers(&[predictions.to_path_buf()], &dataset)?
        .pop()
        .context("no predictions loaded")?;
    let resolver = config.resolver();
    let anonymizer = Anonymizer::new(aggressiveness);

    for dialog in &dataset.dialogs {
        let spans = match recognizer.extract(&dialog.text) {
            Ok(spans) => resolver.resolve(spans),
            Err(err) => {
                warn!(dialog = %dialog.id, "{err}, left as is");
                Vec::new()
            }
        };
        let text = anonymizer
            .anonymize(&dialog.text, &spans)
            .with_context(|| format!("anonymizing dialog {}", dialog.id))?;
        println!("[{}] {}", dialog.id, text);
    }
    Ok(())
}
