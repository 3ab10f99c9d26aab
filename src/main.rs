use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env, Target};
use geobma_bma::{
    enumerate, load_models, read_baseline_predictions, read_model_scores, subset_count, Baseline,
    BmaConfig, BmaResult, CancelToken, FittedModel, GprBmaFactory, KrigingModel, ModelFileFormat,
    SpatialDataset, GEOBMA_LOG,
};
use log::{info, warn};
use std::path::PathBuf;

/// Spatial regression with Bayesian model averaging of Gaussian processes
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit every predictor subset, average, evaluate and export results
    Run(RunArgs),
    /// Recompute weights and predictions from saved models and scores
    Replay(ReplayArgs),
    /// Print the predictor subsets
    Enumerate(EnumerateArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Input dataset (CSV with header)
    #[arg(long)]
    data: PathBuf,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output directory
    #[arg(short, long)]
    outdir: Option<PathBuf>,
    /// Response column
    #[arg(long)]
    response: Option<String>,
    /// Candidate predictors, every numeric column when not given
    #[arg(long, value_delimiter = ',')]
    predictors: Vec<String>,
    /// Largest subset size
    #[arg(long)]
    max_size: Option<usize>,
    /// Number of worker threads
    #[arg(long)]
    threads: Option<usize>,
    /// GWR predictions (CSV) to compare with
    #[arg(long)]
    gwr: Option<PathBuf>,
    /// Save fitted models in the given format
    #[arg(long, value_enum)]
    save_models: Option<FormatArg>,
    /// Number of models listed per criterion
    #[arg(long)]
    top_n: Option<usize>,
    /// On interruption, average over the models fitted so far
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Args)]
struct ReplayArgs {
    /// Input dataset (CSV with header)
    #[arg(long)]
    data: PathBuf,
    /// Saved fitted models (.json or .bin)
    #[arg(long)]
    models: PathBuf,
    /// Model scores table
    #[arg(long)]
    scores: PathBuf,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output directory
    #[arg(short, long)]
    outdir: Option<PathBuf>,
    /// GWR predictions (CSV) to compare with
    #[arg(long)]
    gwr: Option<PathBuf>,
}

#[derive(Args)]
struct EnumerateArgs {
    /// Candidate predictors
    #[arg(long, value_delimiter = ',', required = true)]
    predictors: Vec<String>,
    /// Largest subset size
    #[arg(long)]
    max_size: Option<usize>,
    /// Print subsets as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Binary,
}

impl From<FormatArg> for ModelFileFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => ModelFileFormat::Json,
            FormatArg::Binary => ModelFileFormat::Binary,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BmaConfig> {
    match path {
        Some(path) => BmaConfig::from_file(path)
            .with_context(|| format!("reading configuration {}", path.display())),
        None => Ok(BmaConfig::default()),
    }
}

fn cancel_on_ctrlc() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        warn!("Interrupted, waiting for running fits to finish");
        token.cancel();
    }) {
        warn!("Ctrl-C handler not installed: {err}");
    }
    cancel
}

fn read_gwr(path: Option<&PathBuf>, config: &BmaConfig) -> Result<Vec<Baseline>> {
    path.map(|path| {
        read_baseline_predictions(path, "GWR", config.baseline_column_name())
            .with_context(|| format!("reading GWR predictions {}", path.display()))
    })
    .into_iter()
    .collect()
}

fn print_summary<M>(result: &BmaResult<M>) {
    let summary = &result.summary;
    println!(
        "{} models scored out of {} predictor sets ({} skipped)",
        summary.n_scored,
        summary.n_enumerated,
        summary.skipped.len()
    );
    for skipped in summary.skipped.iter() {
        println!("  {} skipped: {} ({})", skipped.model, skipped.kind, skipped.reason);
    }
    for (rank, method) in result.evaluation.ranking.iter().enumerate() {
        println!("{}. {} RMSE = {:.6}", rank + 1, method.method, method.rmse);
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(outdir) = args.outdir.as_ref() {
        config = config.outdir(outdir);
    }
    if let Some(response) = args.response.as_deref() {
        config = config.response(response);
    }
    if !args.predictors.is_empty() {
        config = config.predictors(&args.predictors);
    }
    if let Some(max_size) = args.max_size {
        config = config.max_size(max_size);
    }
    if let Some(threads) = args.threads {
        config = config.n_threads(threads);
    }
    if let Some(format) = args.save_models {
        config = config.save_models(format.into());
    }
    if let Some(top_n) = args.top_n {
        config = config.top_n(top_n);
    }
    if args.allow_partial {
        config = config.allow_partial(true);
    }

    let dataset = SpatialDataset::from_csv(&args.data, config.dataset_columns())
        .with_context(|| format!("loading dataset {}", args.data.display()))?;
    let baselines = read_gwr(args.gwr.as_ref(), &config)?;
    let bma = GprBmaFactory::new()
        .configure(|_| config)
        .cancel_token(cancel_on_ctrlc())
        .kriging();
    let result = bma.run(&dataset, &baselines)?;
    bma.export(&result, &dataset)?;
    print_summary(&result);
    Ok(())
}

fn replay(args: ReplayArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(outdir) = args.outdir.as_ref() {
        config = config.outdir(outdir);
    }
    let dataset = SpatialDataset::from_csv(&args.data, config.dataset_columns())
        .with_context(|| format!("loading dataset {}", args.data.display()))?;
    let baselines = read_gwr(args.gwr.as_ref(), &config)?;

    let format = ModelFileFormat::from_path(&args.models);
    let models: Vec<FittedModel<KrigingModel>> = load_models(&args.models, format)
        .with_context(|| format!("loading models {}", args.models.display()))?;
    let records = read_model_scores(&args.scores)
        .with_context(|| format!("loading scores {}", args.scores.display()))?;
    info!("{} models and {} score records loaded", models.len(), records.len());

    let bma = GprBmaFactory::new().configure(|_| config).kriging();
    let result = bma.replay(&dataset, models, &records, &baselines)?;
    bma.export(&result, &dataset)?;
    print_summary(&result);
    Ok(())
}

fn list_sets(args: EnumerateArgs) -> Result<()> {
    let max_size = args.max_size.unwrap_or(args.predictors.len());
    let sets = enumerate(&args.predictors, 1..=max_size)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
    } else {
        for set in sets.iter() {
            println!("{set}");
        }
    }
    info!(
        "{} predictor sets",
        subset_count(args.predictors.len(), 1..=max_size)
    );
    Ok(())
}

fn main() -> Result<()> {
    let env = Env::new().filter_or(GEOBMA_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(Target::Stdout);
    builder.try_init().ok();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Replay(args) => replay(args),
        Command::Enumerate(args) => list_sets(args),
    }
}
