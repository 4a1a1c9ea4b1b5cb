use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use raqa_core::{
    Answer, Chunker, DocumentLibrary, EmbeddingIndex, EmbeddingManager, Extractor,
    GenerationManager, IngestReport, IngestionPipeline, PromptAssembler, QaEngine, RaqaConfig,
    Retriever,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "raqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(long, env = "RAQA_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Index the given files, or every stored document when none are given.
    Ingest {
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Copy files into the document root, then index them.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Answer a question from the indexed documents.
    Ask {
        question: String,
        /// Use at most this many retrieved chunks.
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List stored documents.
    Documents {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show index, model and storage status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "raqa boot"
    );
    for warning in config.preflight() {
        warn!("{warning}");
    }

    let index = Arc::new(EmbeddingIndex::new(
        &config.storage.index_dir,
        EmbeddingManager::new(config.embedding.clone()),
    ));
    let library = DocumentLibrary::new(&config.storage.document_root, config.limits);

    match cli.command {
        Command::Ingest { paths, json } => {
            let pipeline = build_pipeline(&config, library, Arc::clone(&index));
            let selection = (!paths.is_empty()).then_some(paths.as_slice());
            let report = pipeline.ingest(selection).await;
            print_report(&report, json)?;
        }
        Command::Upload { paths, json } => {
            let mut stored = Vec::new();
            for path in &paths {
                match library.accept(path) {
                    Ok(document) => stored.push(document.path),
                    Err(error) => warn!(path = %path.display(), reason = %error, "upload rejected"),
                }
            }
            if stored.is_empty() {
                anyhow::bail!("none of the {} file(s) could be stored", paths.len());
            }
            let pipeline = build_pipeline(&config, library, Arc::clone(&index));
            let report = pipeline.ingest(Some(stored.as_slice())).await;
            print_report(&report, json)?;
        }
        Command::Ask {
            question,
            top_k,
            json,
        } => {
            let engine = build_engine(&config, Arc::clone(&index))?;
            let answer = engine.answer(&question, top_k).await;
            print_answer(&answer, json)?;
        }
        Command::Documents { json } => {
            let documents = library.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else {
                for document in &documents {
                    println!(
                        "{}\t{}\t{:.2} MB",
                        document.file_name,
                        document.kind,
                        megabytes(document.size)
                    );
                }
                println!(
                    "{} document(s), {:.2} of {:.2} MB used",
                    documents.len(),
                    megabytes(library.total_usage()?),
                    megabytes(library.max_total_bytes())
                );
            }
        }
        Command::Status => {
            let index_stats = match index.load().await {
                Ok(stats) => serde_json::to_value(stats)?,
                Err(error) => serde_json::json!({ "error": error.to_string() }),
            };
            let generation = GenerationManager::from_config(config.generation.clone())
                .context("generation backend is misconfigured")?;
            let prompts = PromptAssembler::new(config.prompt.clone());
            let status = serde_json::json!({
                "index": index_stats,
                "model": generation.get_model_info(),
                "prompt_template": prompts.default_template(),
                "prompt_templates": PromptAssembler::template_names(),
                "available_models": generation.available_models().await,
                "documents": library.list()?.len(),
                "storage_bytes": library.total_usage()?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RaqaConfig> {
    let config = match path {
        Some(path) => RaqaConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RaqaConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn build_pipeline(
    config: &RaqaConfig,
    library: DocumentLibrary,
    index: Arc<EmbeddingIndex>,
) -> IngestionPipeline {
    IngestionPipeline::new(
        Extractor::new(config.limits.max_file_bytes()),
        Chunker::new(config.chunking.into()),
        library,
        index,
        config.limits.max_files,
    )
}

fn build_engine(config: &RaqaConfig, index: Arc<EmbeddingIndex>) -> anyhow::Result<QaEngine> {
    let generation = GenerationManager::from_config(config.generation.clone())
        .context("generation backend is misconfigured")?;
    Ok(QaEngine::new(
        Arc::new(Retriever::new(index, config.retriever)),
        PromptAssembler::new(config.prompt.clone()),
        Arc::new(generation),
    ))
}

fn print_report(report: &IngestReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for error in &report.errors {
        println!("error: {} - {}", error.file_name, error.message);
    }
    println!("{}", report.summary);
    Ok(())
}

fn print_answer(answer: &Answer, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("sources:");
        for source in &answer.sources {
            println!("  - {}", source.file_name);
        }
    }
    println!(
        "({} chunk(s), {} ms)",
        answer.metadata.retrieved_documents, answer.metadata.processing_time_ms
    );
    Ok(())
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
