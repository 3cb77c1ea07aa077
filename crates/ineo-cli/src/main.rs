mod display;
mod pipeline;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ineo_label::CommandEvaluator;
use ineo_store::AssessmentCache;
use ineo_sync::solr::{
    DEFAULT_COMMIT_WITHIN_MS, DEFAULT_FETCH_CONCURRENCY, DEFAULT_WINDOW_SIZE,
    DEFAULT_WRITE_CONCURRENCY,
};
use ineo_sync::{ClientOptions, MappingSource, SolrClient, load_mapping};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{
    DEFAULT_BATCH_SIZE, DEFAULT_QUERY, Pipeline, PipelineError, PipelineOptions, RunSummary,
};

/// Label Solr records as INEO records and run FAIR assessments.
#[derive(Parser)]
#[command(name = "ineo-label", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, label, assess, and write back all matching records.
    Run(RunArgs),
    /// Fetch and validate the mapping document, then print it.
    Mapping(MappingArgs),
}

#[derive(Args)]
struct MappingArgs {
    /// Mapping document URL or path.
    #[arg(long, env = "INEO_MAPPING")]
    mapping: String,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    mapping: MappingArgs,

    /// Solr core URL, e.g. http://localhost:8983/solr/vlo-index.
    #[arg(long, env = "SOLR_URL")]
    solr_url: String,

    #[arg(long, env = "SOLR_USER")]
    solr_user: Option<String>,

    #[arg(long, env = "SOLR_PASSWORD", hide_env_values = true)]
    solr_password: Option<String>,

    /// Directory of cached assessment artifacts.
    #[arg(long, env = "INEO_CACHE_DIR", default_value = "/srv/vlo-data/ttl")]
    cache_dir: PathBuf,

    /// Evaluator program. Without one, no assessments are run.
    #[arg(long, env = "INEO_EVALUATOR")]
    evaluator: Option<PathBuf>,

    /// Extra argument passed to the evaluator before the file reference.
    #[arg(long = "evaluator-arg", allow_hyphen_values = true)]
    evaluator_args: Vec<String>,

    /// Solr query selecting the records to label.
    #[arg(long, env = "INEO_QUERY", default_value = DEFAULT_QUERY)]
    query: String,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Rows per Solr fetch request.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: usize,

    #[arg(long, default_value_t = DEFAULT_FETCH_CONCURRENCY)]
    fetch_concurrency: usize,

    #[arg(long, default_value_t = DEFAULT_WRITE_CONCURRENCY)]
    write_concurrency: usize,

    #[arg(long, default_value_t = DEFAULT_COMMIT_WITHIN_MS)]
    commit_within_ms: u64,

    /// Label and assess without writing to Solr.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("ineo-label v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args).await.map(|summary| {
            print!("{}", display::render_summary(&summary));
        }),
        Command::Mapping(args) => show_mapping(args).await,
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn show_mapping(args: MappingArgs) -> anyhow::Result<()> {
    let source = MappingSource::parse(&args.mapping);
    let table = load_mapping(&reqwest::Client::new(), &source)
        .await
        .context("loading mapping")?;
    print!("{}", display::render_mapping(&table));
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<RunSummary> {
    info!("starting the labelling process");
    let summary = label(args).await.context("labelling failed")?;
    info!("labelling process completed");
    Ok(summary)
}

async fn label(args: RunArgs) -> Result<RunSummary, PipelineError> {
    let source = MappingSource::parse(&args.mapping.mapping);

    let options = ClientOptions {
        window_size: args.window_size,
        fetch_concurrency: args.fetch_concurrency,
        write_concurrency: args.write_concurrency,
        commit_within_ms: args.commit_within_ms,
    };
    let mut store = SolrClient::new(args.solr_url).with_options(options);
    if let Some(user) = args.solr_user {
        store = store.with_credentials(user, args.solr_password.unwrap_or_default());
    }

    let cache = AssessmentCache::new(args.cache_dir);
    let evaluator = args
        .evaluator
        .map(|program| CommandEvaluator::new(program).with_args(args.evaluator_args));

    let mut pipeline = Pipeline::new(&store, &cache);
    match &evaluator {
        Some(evaluator) => pipeline = pipeline.with_evaluator(evaluator),
        None => warn!("no evaluator configured, FAIR assessments are disabled"),
    }

    let options = PipelineOptions {
        query: args.query,
        batch_size: args.batch_size,
        dry_run: args.dry_run,
    };
    pipeline.run(&reqwest::Client::new(), &source, &options).await
}
