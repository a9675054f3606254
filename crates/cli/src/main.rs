use anyhow::{Context as AnyhowContext, Result};
use attack_ingest::{
    EmbeddingMode, InboxWatcher, IngestError, IngestOutcome, Ingestor, Normalizer,
    PipelineConfig, StoreBackend,
};
use attack_vector_store::{
    Embedder, FileCollectionStore, HttpEmbedder, MilvusRestStore, StubEmbedder, VectorStore,
};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit status for clap parse failures and wrong arguments.
const USAGE_EXIT: u8 = 1;

#[derive(Parser)]
#[command(name = "attack-pipeline")]
#[command(about = "Normalize, embed and index attack-pattern submissions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (YAML, TOML or JSON); overrides ATTACK_PIPELINE_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, classify and version one inbox submission
    Normalize(NormalizeArgs),

    /// Embed a dataset file and upsert it into the vector collection
    Ingest(IngestArgs),

    /// Watch the inbox and run normalize + ingest for each new submission
    Watch(WatchArgs),
}

#[derive(Args)]
struct NormalizeArgs {
    /// Submission file (.json or .jsonl)
    path: PathBuf,
}

#[derive(Args)]
struct IngestArgs {
    /// Dataset file (.jsonl)
    #[arg(required_unless_present = "pending", conflicts_with = "pending")]
    path: Option<PathBuf>,

    /// Ingest every dataset file without a checkpoint or lock
    #[arg(long)]
    pending: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args)]
struct WatchArgs {
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args)]
struct StoreArgs {
    /// Vector store host (Milvus)
    #[arg(long)]
    host: Option<String>,

    /// Vector store port (Milvus)
    #[arg(long)]
    port: Option<u16>,

    /// Use the file-backed store rooted at this directory
    #[arg(long, conflicts_with_all = ["host", "port"])]
    store_dir: Option<PathBuf>,
}

impl StoreArgs {
    fn apply(self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(dir) = self.store_dir {
            config.store.backend = StoreBackend::File;
            config.store.dir = Some(dir);
        }
        if let Some(host) = self.host {
            config.store.backend = StoreBackend::Milvus;
            config.store.host = host;
        }
        if let Some(port) = self.port {
            config.store.backend = StoreBackend::Milvus;
            config.store.port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version are reported through the same path.
            let code = if err.use_stderr() { USAGE_EXIT } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<IngestError>()
        .map_or(2, |e| u8::try_from(e.exit_code()).unwrap_or(2))
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Normalize(args) => run_normalize(args, config).await,
        Commands::Ingest(args) => run_ingest(args, config).await,
        Commands::Watch(args) => run_watch(args, config).await,
    }
}

async fn run_normalize(args: NormalizeArgs, config: PipelineConfig) -> Result<()> {
    let outcome = Normalizer::new(config.layout())
        .normalize(&args.path)
        .await?;
    println!("OK: {}", outcome.destination.display());
    Ok(())
}

async fn run_ingest(args: IngestArgs, config: PipelineConfig) -> Result<()> {
    let config = args.store.apply(config);
    let ingestor = build_ingestor(config).await?;

    if args.pending {
        let sweep = ingestor.ingest_pending().await;
        for report in &sweep.ingested {
            println!(
                "Ingested {} records from {}",
                report.records,
                report.source.display()
            );
        }
        println!(
            "Ingested {} file(s), {} records; {} skipped, {} failed",
            sweep.ingested.len(),
            sweep.records(),
            sweep.skipped,
            sweep.failures.len()
        );
        if let Some((path, reason)) = sweep.failures.first() {
            return Err(IngestError::Other(format!(
                "{} dataset file(s) failed, first: {}: {reason}",
                sweep.failures.len(),
                path.display()
            ))
            .into());
        }
        return Ok(());
    }

    let Some(path) = args.path else {
        return Err(IngestError::Other("no dataset file given".into()).into());
    };
    match ingestor.ingest_file(&path).await? {
        IngestOutcome::Ingested(report) => {
            println!("Total records ingested: {}", report.records);
            println!("Vector dim: {}", report.vector_dim);
            println!("Checkpoint: {}", report.checkpoint.display());
        }
        IngestOutcome::AlreadyIngested { checkpoint } => {
            println!("Already ingested (found): {}", checkpoint.display());
        }
        IngestOutcome::InFlight { lock } => {
            println!("Ingest already in progress (lock: {}), skipping.", lock.display());
        }
    }
    Ok(())
}

async fn run_watch(args: WatchArgs, config: PipelineConfig) -> Result<()> {
    let config = args.store.apply(config);
    let layout = config.layout();
    let settings = config.watch;
    let ingestor = build_ingestor(config).await?;

    let watcher = InboxWatcher::new(Normalizer::new(layout), ingestor, settings);
    let report = watcher
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::warn!("Failed to listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!(
        "Watcher stopped: {} dispatched, {} normalize failures, {} ingested, {} ingest failures",
        report.dispatched, report.normalize_failures, report.ingested, report.ingest_failures
    );
    Ok(())
}

async fn build_ingestor(config: PipelineConfig) -> Result<Ingestor> {
    let embedder = build_embedder(&config)?;
    let store = build_store(&config).await?;
    Ok(Ingestor::new(config, embedder, store)?)
}

fn build_embedder(config: &PipelineConfig) -> Result<Arc<dyn Embedder>> {
    let model = &config.model_name;
    let dim = config.collection.dim;
    match config.embedder.mode {
        EmbeddingMode::Stub => {
            log::info!("Using stub embeddings ({dim}-dim)");
            Ok(Arc::new(StubEmbedder::new(model, dim)))
        }
        EmbeddingMode::Http => {
            let base_url = config.embedder.base_url.clone().ok_or_else(|| {
                IngestError::Dependency(
                    "embedder.base_url is not configured (set it, or ATTACK_EMBEDDING_MODE=stub)"
                        .into(),
                )
            })?;
            let api_key = env::var(&config.embedder.api_key_env).ok();
            log::info!("Using embeddings server {base_url} (model {model})");
            Ok(Arc::new(
                HttpEmbedder::new(base_url, model, dim).with_api_key(api_key),
            ))
        }
    }
}

async fn build_store(config: &PipelineConfig) -> Result<Arc<dyn VectorStore>> {
    match config.store.backend {
        StoreBackend::File => {
            let dir = config.store_dir();
            let store = FileCollectionStore::open(&dir)
                .await
                .map_err(IngestError::from)
                .with_context(|| format!("open vector store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Milvus => {
            let token = env::var(&config.store.token_env).ok();
            let store = MilvusRestStore::new(&config.store.host, config.store.port).with_token(token);
            log::info!("Using Milvus at {}", store.base_url());
            Ok(Arc::new(store))
        }
    }
}
