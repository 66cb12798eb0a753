use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_rag_core::persistence::load_index;
use pdf_rag_core::{
    discover_indexes, discover_pdf_files, write_clean_text, Chatter, EmbedderKind, Embedder,
    EngineConfig, IndexStrategy, IndexingPipeline, LopdfSource, RecursiveChunker, Retriever,
    RunContext, SimilarityMetric, TextCleaner, VectorPolicy,
};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder holding incoming PDFs, the indexes and the archive.
    #[arg(long, env = "RAG_DATA_DIR", default_value = "rag_project/data")]
    data_dir: PathBuf,

    /// Index directory name used by the single-index strategy.
    #[arg(long, default_value = "vector_store")]
    index_dir_name: String,

    #[arg(long, default_value = "archive")]
    archive_dir_name: String,

    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Drop extracted lines shorter than this many characters.
    #[arg(long)]
    min_line_chars: Option<usize>,

    /// cosine or l2
    #[arg(long, default_value = "cosine")]
    metric: SimilarityMetric,

    /// single-consolidated-index or per-document-index
    #[arg(long, default_value = "single-consolidated-index")]
    strategy: IndexStrategy,

    /// reuse stored vectors when the embedder matches, or re-embed everything
    #[arg(long, default_value = "reuse")]
    vector_policy: VectorPolicy,

    /// ollama or ngram (offline)
    #[arg(long, default_value = "ollama")]
    embedder: EmbedderKind,

    #[arg(long, default_value = "mxbai-embed-large")]
    embedding_model: String,

    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    #[arg(long, default_value = "32")]
    embed_batch_size: usize,

    #[arg(long, default_value = "gpt-4")]
    generation_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, default_value = "5")]
    top_k: usize,

    #[arg(long, default_value = "2048")]
    max_context_chars: usize,

    /// Also append logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Index every PDF in the data directory, then archive it.
    Index,
    /// Print the chunks closest to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Answer one question from the indexed documents.
    Ask {
        #[arg(long)]
        query: String,
    },
    /// Interactive question loop. Type `exit` or `quit` to leave.
    Chat,
    /// Write the cleaned text of each PDF in a folder to `<stem>.txt`.
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// List the indexes found under the data directory.
    Stats,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            data_dir: self.data_dir.clone(),
            index_dir_name: self.index_dir_name.clone(),
            archive_dir_name: self.archive_dir_name.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_line_chars: self.min_line_chars,
            metric: self.metric,
            strategy: self.strategy,
            vector_policy: self.vector_policy,
            top_k: self.top_k,
            max_context_chars: self.max_context_chars,
            ..EngineConfig::default()
        };
        config.embedder.kind = self.embedder;
        config.embedder.model = self.embedding_model.clone();
        config.embedder.endpoint = self.ollama_url.clone();
        config.embedder.batch_size = self.embed_batch_size;
        config.generator.model = self.generation_model.clone();
        config.generator.endpoint = self.openai_base_url.clone();
        config.generator.api_key = self.openai_api_key.clone();
        config
    }
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let config = cli.engine_config();
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Index => run_index(&config),
        Command::Search { query, top_k } => run_search(&config, &query, top_k.unwrap_or(config.top_k)),
        Command::Ask { query } => {
            let chatter = build_chatter(&config)?;
            println!("{}", chatter.answer(&query));
            Ok(())
        }
        Command::Chat => run_chat(&config),
        Command::Extract { input, output } => run_extract(&config, &input, &output),
        Command::Stats => run_stats(&config),
    }
}

fn run_index(config: &EngineConfig) -> anyhow::Result<()> {
    let source = LopdfSource::new(TextCleaner::new(config.min_line_chars)?);
    let chunker = RecursiveChunker::new(config.chunking()?)?;
    let embedder = config.build_embedder()?;
    let pipeline = IndexingPipeline::new(source, embedder, chunker, config.pipeline_options());

    let report = pipeline.run(&RunContext::new("indexer"))?;
    for document in &report.documents {
        match &document.failure {
            None => println!(
                "{}: {} chunks -> {}",
                document.path.display(),
                document.chunk_count,
                document
                    .index_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default()
            ),
            Some(failure) => println!(
                "{}: {:?}, {failure}",
                document.path.display(),
                document.state
            ),
        }
    }
    println!(
        "{} archived, {} failed, {} chunks indexed",
        report.archived(),
        report.failures().count(),
        report.indexed_chunks()
    );
    Ok(())
}

fn open_retriever(
    config: &EngineConfig,
    component: &'static str,
) -> anyhow::Result<Retriever<Box<dyn Embedder>>> {
    let embedder = config.build_embedder()?;
    Ok(Retriever::open(
        &config.data_dir,
        embedder,
        &config.retriever_options(),
        RunContext::new(component),
    ))
}

fn run_search(config: &EngineConfig, query: &str, top_k: usize) -> anyhow::Result<()> {
    let retriever = open_retriever(config, "retriever")?;
    if !retriever.is_ready() {
        println!("no indexed documents under {}", config.data_dir.display());
        return Ok(());
    }

    let hits = retriever.retrieve_scored(query, top_k);
    if hits.is_empty() {
        println!("no results");
    }
    for hit in hits {
        println!(
            "[{}] score={:.4} {} p.{}-{} chunk={}",
            hit.id,
            hit.score,
            hit.chunk.title,
            hit.chunk.page_start,
            hit.chunk.page_end,
            hit.chunk.chunk_index
        );
        println!("{}\n", hit.chunk.text);
    }
    Ok(())
}

fn build_chatter(
    config: &EngineConfig,
) -> anyhow::Result<Chatter<Box<dyn Embedder>, pdf_rag_core::OpenAiGenerator>> {
    let generator = config
        .build_generator()
        .context("chat needs a generation provider")?;
    let retriever = open_retriever(config, "chatter")?;
    Ok(Chatter::new(
        retriever,
        generator,
        config.top_k,
        config.max_context_chars,
        RunContext::new("chatter"),
    ))
}

fn run_chat(config: &EngineConfig) -> anyhow::Result<()> {
    let chatter = build_chatter(config)?;
    println!("Ask a question, or type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("You: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }
        println!("Assistant: {}\n", chatter.answer(question));
    }
    Ok(())
}

fn run_extract(config: &EngineConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    if !input.is_dir() {
        bail!("input directory not found: {}", input.display());
    }
    let source = LopdfSource::new(TextCleaner::new(config.min_line_chars)?);

    let mut written = 0usize;
    for pdf in discover_pdf_files(input)? {
        match write_clean_text(&source, &pdf, output) {
            Ok(path) => {
                println!("{} -> {}", pdf.display(), path.display());
                written += 1;
            }
            Err(error) => warn!(path = %pdf.display(), error = %error, "extraction failed"),
        }
    }
    println!("{written} text files written to {}", output.display());
    Ok(())
}

fn run_stats(config: &EngineConfig) -> anyhow::Result<()> {
    let locations = discover_indexes(&config.data_dir, &config.archive_dir_name);
    if locations.is_empty() {
        println!("no indexes under {}", config.data_dir.display());
        return Ok(());
    }

    for location in locations {
        match load_index(&location) {
            Ok(persisted) => {
                let index = &persisted.index;
                let documents = persisted
                    .manifest
                    .as_ref()
                    .map(|manifest| manifest.documents.len().to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}: {} entries, {} documents, dim={}, metric={:?}, embedder={}",
                    location.display(),
                    index.len(),
                    documents,
                    index
                        .dimension()
                        .map(|dim| dim.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    index.metric(),
                    index.embedder().unwrap_or("unknown")
                );
            }
            Err(error) => println!("{}: unreadable ({error})", location.display()),
        }
    }
    Ok(())
}
