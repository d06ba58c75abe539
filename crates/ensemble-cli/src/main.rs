//! `llm-ensemble`: run, re-aggregate and score LLM relevance ensembles.
//!
//! ## Commands
//!
//! - `run`: judge every example with every configured model
//! - `validate`: check a run file without calling any model
//! - `formats`: list prompt formats, strategies and provider types
//! - `aggregate`: re-aggregate an existing judgements file
//! - `evaluate`: score ensemble results against gold labels

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use ensemble_core::{
    codes, evaluate, AggregationEngine, EnsembleResult, EvaluationMetrics, Example, FormatRegistry,
    Judgement, LabelSpace, ModelConfig, RunConfig, StrategyRegistry,
};
use ensemble_runtime::{
    InferenceOrchestrator, NdjsonSink, NdjsonSource, OrchestratorError, ProviderRegistry, RunPlan,
};

#[derive(Parser)]
#[command(name = "llm-ensemble")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Judge query/document relevance with an ensemble of LLMs", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge every example with every configured model
    Run {
        /// Run configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Examples, one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for judgements, ensemble results and summary
        #[arg(short, long)]
        out: PathBuf,

        /// Process at most this many examples
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Validate a run configuration and resolve its providers, without calling them
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List prompt formats, aggregation strategies and provider types
    Formats,

    /// Re-aggregate an existing judgements file with a run configuration
    Aggregate {
        #[arg(short, long)]
        config: PathBuf,

        /// judgements.ndjson from a previous run
        #[arg(short, long)]
        judgements: PathBuf,

        /// Examples file, used only to attach gold labels
        #[arg(long)]
        examples: Option<PathBuf>,

        /// Where to write the ensemble results (NDJSON)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Score ensemble results against their gold labels
    Evaluate {
        /// ensemble.ndjson from a run or from `aggregate`
        #[arg(short, long)]
        results: PathBuf,

        /// Take the label space from this run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print metrics as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Logs go to stderr; RUST_LOG overrides the level chosen by flags.
fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.log_json, level);

    match cli.command {
        Commands::Run {
            config,
            input,
            out,
            limit,
        } => cmd_run(&config, &input, &out, limit).await,
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Formats => {
            cmd_formats();
            Ok(())
        }
        Commands::Aggregate {
            config,
            judgements,
            examples,
            out,
        } => cmd_aggregate(&config, &judgements, examples.as_deref(), &out),
        Commands::Evaluate {
            results,
            config,
            json,
        } => cmd_evaluate(&results, config.as_deref(), json),
    }
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_yaml_file(path)
        .with_context(|| format!("Failed to load run configuration {}", path.display()))
}

async fn cmd_run(config_path: &Path, input: &Path, out: &Path, limit: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let plan = RunPlan::resolve_default(&config).context("Failed to resolve run plan")?;

    let mut builder = InferenceOrchestrator::builder().plan(plan);
    if let Some(limit) = limit {
        builder = builder.limit(limit);
    }
    let orchestrator = builder.build()?;

    let mut sink = NdjsonSink::create(out)
        .await
        .with_context(|| format!("Failed to create output directory {}", out.display()))?;
    let source = NdjsonSource::new(input);

    let (summary, failure) = match orchestrator.run(&source, &mut sink).await {
        Ok(summary) => (summary, None),
        Err(OrchestratorError::DeadlineExceeded(summary)) => {
            (*summary, Some("run deadline exceeded; pending judgements were cancelled"))
        }
        Err(e) => return Err(e).context("Inference run failed"),
    };

    let summary_path = out.join("summary.json");
    write_json(&summary_path, &summary)?;

    info!(
        examples = summary.examples,
        judgements = summary.judgements,
        out = %out.display(),
        "Wrote run output"
    );
    for model in &summary.models {
        println!(
            "{:<24} ok {:>6}  abstained {:>6}  retries {:>6}  mean latency {:>8.1} ms",
            model.model_id,
            model.successes,
            model.abstentions,
            model.total_retries,
            model.mean_latency_ms
        );
    }
    for warning in &summary.warnings {
        println!("warning: {}", warning);
    }

    if let Some(reason) = failure {
        bail!("{} (summary at {})", reason, summary_path.display());
    }
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let plan = RunPlan::resolve_default(&config).context("Failed to resolve run plan")?;

    println!("Configuration OK: {}", config_path.display());
    println!("  format:      {}", plan.format.name);
    println!("  aggregation: {}", plan.engine.strategy_name());
    println!("  concurrency: {}", plan.concurrency);
    for model in &plan.models {
        println!(
            "  model:       {} via {} (weight {})",
            model.model_id(),
            model.client.provider_name(),
            model.weight
        );
    }
    Ok(())
}

fn cmd_formats() {
    let formats = FormatRegistry::with_defaults();
    println!("Prompt formats:");
    for name in formats.available() {
        let description = formats.get(name).map(|f| f.description()).unwrap_or_default();
        println!("  {:<18} {}", name, description);
    }

    println!("Aggregation strategies:");
    for name in StrategyRegistry::with_defaults().available() {
        println!("  {}", name);
    }

    let providers = ProviderRegistry::with_defaults();
    println!("Provider types:");
    for name in providers.available_types() {
        let description = providers
            .get_factory(name)
            .map(|f| f.description())
            .unwrap_or_default();
        println!("  {:<18} {}", name, description);
    }
}

fn cmd_aggregate(
    config_path: &Path,
    judgements_path: &Path,
    examples_path: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let config = load_config(config_path)?;
    let strategy = StrategyRegistry::with_defaults().create(&config.aggregation)?;
    let engine = AggregationEngine::new(strategy, config.weights());

    let judgements: Vec<Judgement> = read_ndjson(judgements_path)?;
    let gold = match examples_path {
        Some(path) => gold_labels(read_ndjson::<Example>(path)?),
        None => HashMap::new(),
    };

    let groups = group_judgements(judgements, &config.models)?;

    let file = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for ((query_id, docid), votes) in groups {
        let gold_label = gold.get(&(query_id.clone(), docid.clone())).copied();
        let result = engine.aggregate(&query_id, &docid, gold_label, votes);
        serde_json::to_writer(&mut writer, &result)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;

    info!(results = written, out = %out.display(), "Wrote ensemble results");
    Ok(())
}

fn cmd_evaluate(results_path: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let labels = match config_path {
        Some(path) => load_config(path)?.labels,
        None => LabelSpace::default(),
    };
    let results: Vec<EnsembleResult> = read_ndjson(results_path)?;
    let metrics = evaluate(&results, labels);

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_metrics(&metrics, labels);
    }
    Ok(())
}

fn print_metrics(metrics: &EvaluationMetrics, labels: LabelSpace) {
    println!("evaluated {}  skipped {}", metrics.evaluated, metrics.skipped);
    println!("coverage  {:.3}", metrics.coverage);
    println!("accuracy  {:.3}", metrics.accuracy);
    println!("macro-F1  {:.3}", metrics.macro_f1);
    println!("micro-F1  {:.3}", metrics.micro_f1);
    println!();
    println!("{:>6} {:>9} {:>9} {:>9} {:>8}", "label", "precision", "recall", "f1", "support");
    for (label, class) in &metrics.per_class {
        println!(
            "{:>6} {:>9.3} {:>9.3} {:>9.3} {:>8}",
            label, class.precision, class.recall, class.f1, class.support
        );
    }
    println!();
    println!("confusion (rows gold, columns predicted):");
    let header: Vec<String> = labels.labels().map(|l| format!("{:>6}", l)).collect();
    println!("{:>6}{}", "", header.join(""));
    for (label, row) in labels.labels().zip(&metrics.confusion_matrix) {
        let cells: Vec<String> = row.iter().map(|c| format!("{:>6}", c)).collect();
        println!("{:>6}{}", label, cells.join(""));
    }
}

fn read_ndjson<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), idx + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))
}

type PairKey = (String, String);

fn gold_labels(examples: Vec<Example>) -> HashMap<PairKey, u8> {
    examples
        .into_iter()
        .filter_map(|e| e.gold_label.map(|g| ((e.query_id, e.docid), g)))
        .collect()
}

/// Group judgements by `(query_id, docid)` in first-seen order.
///
/// Each group holds exactly one vote per configured model, in config order.
/// A model with no judgement for the pair votes as an abstention carrying
/// `missing_judgement`. Judgements from models outside the config are
/// dropped; two judgements from the same model for one pair are an error.
fn group_judgements(
    judgements: Vec<Judgement>,
    models: &[ModelConfig],
) -> Result<Vec<(PairKey, Vec<Judgement>)>> {
    let mut groups: Vec<(PairKey, Vec<Option<Judgement>>)> = Vec::new();
    let mut index: HashMap<PairKey, usize> = HashMap::new();
    let mut dropped: BTreeMap<String, usize> = BTreeMap::new();

    for judgement in judgements {
        let Some(position) = models.iter().position(|m| m.model_id == judgement.model_id) else {
            *dropped.entry(judgement.model_id).or_default() += 1;
            continue;
        };

        let key = (judgement.query_id.clone(), judgement.docid.clone());
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, vec![None; models.len()]));
            groups.len() - 1
        });

        let (key, votes) = &mut groups[slot];
        if votes[position].is_some() {
            bail!(
                "Duplicate judgement from model '{}' for ({}, {})",
                judgement.model_id,
                key.0,
                key.1
            );
        }
        votes[position] = Some(judgement);
    }

    for (model_id, count) in &dropped {
        warn!(model = %model_id, judgements = count, "Ignoring judgements from unconfigured model");
    }

    Ok(groups
        .into_iter()
        .map(|((query_id, docid), votes)| {
            let example = Example::new(query_id.as_str(), docid.as_str());
            let votes = votes
                .into_iter()
                .zip(models)
                .map(|(vote, model)| {
                    vote.unwrap_or_else(|| {
                        Judgement::abstention(
                            &example,
                            &model.generation_params(),
                            vec![codes::MISSING_JUDGEMENT.to_string()],
                        )
                    })
                })
                .collect();
            ((query_id, docid), votes)
        })
        .collect())
}
