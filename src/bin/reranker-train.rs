//! Reranker training driver

use anyhow::{anyhow, Context};
use clap::Parser;
use reranker::{
    CandidateSetSource, Environment, ExtractingSource, FactoryRegistry, FeatureExtractor, FeatureExtractorFamily,
    Interpreter, JsonLinesSource, JsonModelCodec, ModelCodec, ModelFamily, PerceptronModel, TrainOptions,
    TrainingConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Train an averaged perceptron reranker over JSON-lines candidate sets
///
/// Examples:
///   reranker-train --model 'Linear(kernel=Dot())' --train train.jsonl --output model.json
///   reranker-train --resume model.json --train train.jsonl --devtest dev.jsonl --epochs 5
#[derive(Parser, Debug)]
#[command(name = "reranker-train")]
#[command(version)]
struct Args {
    /// Model spec text, or @path to read it from a file
    #[arg(long, required_unless_present_any = ["resume", "list_factories"])]
    model: Option<String>,

    /// Training candidate sets, one JSON record per line
    #[arg(long, required_unless_present = "list_factories")]
    train: Option<PathBuf>,

    /// Held-out candidate sets evaluated after every epoch
    #[arg(long)]
    devtest: Option<PathBuf>,

    /// Number of epochs; overrides the config file and environment
    #[arg(long)]
    epochs: Option<u32>,

    /// JSON training configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feature extractor spec applied to candidate text
    #[arg(long)]
    extractor: Option<String>,

    /// Continue training a model written by --output
    #[arg(long, conflicts_with = "model")]
    resume: Option<PathBuf>,

    /// Where to write the trained model
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print every registered factory and its members, then exit
    #[arg(long)]
    list_factories: bool,
}

/// `@path` reads the spec from a file; anything else is the spec itself.
fn spec_text(arg: &str) -> anyhow::Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read spec file {}", path)),
        None => Ok(arg.to_string()),
    }
}

fn load_model(args: &Args, registry: &FactoryRegistry) -> anyhow::Result<PerceptronModel> {
    if let Some(path) = &args.resume {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read model {}", path.display()))?;
        let model = JsonModelCodec::new(registry)
            .read(&bytes)
            .with_context(|| format!("Failed to decode model {}", path.display()))?;
        info!("resuming {} at time {}", model.name(), model.time());
        return Ok(model);
    }

    let spec = args
        .model
        .as_deref()
        .ok_or_else(|| anyhow!("one of --model or --resume is required"))?;
    let text = spec_text(spec)?;
    let mut env = Environment::new();
    let component = Interpreter::new(registry)
        .parse_and_build(&text, &mut env)
        .context("Failed to build model from spec")?;
    let family = component.family();
    component
        .to_owned_object::<ModelFamily>()
        .ok_or_else(|| anyhow!("spec builds a {}, not a Model", family))
}

fn run(args: Args) -> anyhow::Result<()> {
    let registry = FactoryRegistry::with_builtins().context("Failed to register built-in factories")?;
    if args.list_factories {
        print!("{}", registry.describe());
        return Ok(());
    }

    let mut config = TrainingConfig::load(args.config.as_deref())?;
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }

    let mut model = load_model(&args, &registry)?;
    info!("model: {}", model.spec());

    let train_path = args.train.clone().ok_or_else(|| anyhow!("--train is required"))?;
    let open = |path: PathBuf| {
        JsonLinesSource::new(path)
            .with_max_candidates(config.max_candidates)
            .with_reporting_interval(config.reporting_interval)
    };

    let extractor = match &args.extractor {
        Some(spec) => {
            let mut env = Environment::new();
            let component = Interpreter::new(&registry)
                .parse_and_build(&spec_text(spec)?, &mut env)
                .context("Failed to build feature extractor from spec")?;
            let family = component.family();
            Some(
                component
                    .downcast::<FeatureExtractorFamily>()
                    .ok_or_else(|| anyhow!("--extractor builds a {}, not a FeatureExtractor", family))?,
            )
        }
        None => None,
    };

    let train = TrainingSource::new(open(train_path), extractor.clone());
    let devtest = args
        .devtest
        .clone()
        .map(|path| TrainingSource::new(open(path), extractor.clone()));

    let options = TrainOptions {
        devtest: devtest.as_ref().map(|d| d.as_source()),
        ..config.train_options()
    };
    let report = model
        .train(train.as_source(), config.epochs, &options)
        .context("Training failed")?;

    info!(
        "trained {} epochs over {} examples: {} updates, {} without reference, {} skipped records",
        report.epochs_completed, report.examples, report.updates, report.no_reference, report.skipped_records
    );
    for warning in &report.warnings {
        info!("warning: {}", warning);
    }
    if let Some(best) = model.stats().best_epoch {
        info!("best devtest epoch: {}", best);
    }

    if let Some(path) = &args.output {
        let bytes = JsonModelCodec::new(&registry).write(&model)?;
        std::fs::write(path, bytes).with_context(|| format!("Failed to write model {}", path.display()))?;
        info!("wrote model to {}", path.display());
    }
    Ok(())
}

/// A JSON-lines source, optionally piped through a feature extractor.
enum TrainingSource {
    Plain(JsonLinesSource),
    Extracting(ExtractingSource<JsonLinesSource>),
}

impl TrainingSource {
    fn new(source: JsonLinesSource, extractor: Option<Arc<dyn FeatureExtractor>>) -> Self {
        match extractor {
            Some(extractor) => Self::Extracting(ExtractingSource::new(source, extractor)),
            None => Self::Plain(source),
        }
    }

    fn as_source(&self) -> &dyn CandidateSetSource {
        match self {
            Self::Plain(s) => s,
            Self::Extracting(s) => s,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
