use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_rag_core::{
    build_file_index, connect, load_file_index, Agent, Answer, BackendConfig, BackendKind,
    ChunkingConfig, Embedder, GenerationParams, Generator, ProjectBuilder, ProjectLayout,
    QueryError, QueryPipeline, RetrievedChunk, DEFAULT_TOP_K, RAG_TOP_K,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding one subdirectory per project.
    #[arg(long, global = true, env = "PDF_RAG_PROJECTS_ROOT", default_value = "projects")]
    projects_root: PathBuf,

    /// Name of the PDF folder inside each project.
    #[arg(long, global = true, default_value = "pdfs")]
    pdf_dir: String,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args)]
struct BackendArgs {
    /// Model backend: remote (OpenAI-compatible API) or local (Ollama).
    #[arg(long, global = true, env = "PDF_RAG_BACKEND", default_value = "remote")]
    backend: BackendKind,

    /// Override the backend base URL.
    #[arg(long, global = true, env = "PDF_RAG_BASE_URL")]
    base_url: Option<String>,

    /// API key for the remote backend.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File containing the API key, used when no key is given directly.
    #[arg(long, global = true)]
    api_key_file: Option<PathBuf>,

    #[arg(long, global = true, env = "PDF_RAG_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Requested embedding size, for models that support shortening.
    #[arg(long, global = true)]
    embedding_dimensions: Option<u32>,

    #[arg(long, global = true, env = "PDF_RAG_GENERATION_MODEL")]
    generation_model: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Retries for transient backend failures.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Upper bound on generated tokens per answer.
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    #[arg(long, global = true)]
    temperature: Option<f32>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk, embed and index PDFs for one project or for all of them.
    Build {
        /// Project to build. Every project under the root when omitted.
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 500)]
        chunk_size: usize,
        #[arg(long, default_value_t = 50)]
        chunk_overlap: usize,
    },
    /// Answer a question from a project's documents.
    Ask {
        #[arg(long)]
        project: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = RAG_TOP_K)]
        top_k: usize,
    },
    /// Show the chunks closest to a query, with scores.
    Search {
        #[arg(long)]
        project: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Rebuild the file listing of every project.
    FileIndex,
    /// Route free-form requests to a project summary or file listing.
    Agent {
        /// Handle a single request instead of reading them from stdin.
        #[arg(long)]
        query: Option<String>,
    },
}

impl BackendArgs {
    fn resolve(self) -> anyhow::Result<BackendConfig> {
        let api_key = match (self.api_key, &self.api_key_file) {
            (Some(key), _) => Some(key),
            (None, Some(path)) => {
                let key = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read api key file {}", path.display()))?;
                Some(key.trim().to_string())
            }
            (None, None) => None,
        };

        let mut config = BackendConfig::for_kind(self.backend, api_key);
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(model) = self.embedding_model {
            config.embedding_model = model;
        }
        if let Some(model) = self.generation_model {
            config.generation_model = model;
        }
        if self.embedding_dimensions.is_some() {
            config.embedding_dimensions = self.embedding_dimensions;
        }
        if let Some(seconds) = self.timeout_secs {
            config.timeout = Duration::from_secs(seconds);
        }
        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.generation.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.generation.temperature = temperature;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let layout = ProjectLayout::new(&cli.projects_root).with_pdf_dir(cli.pdf_dir);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        root = %layout.root.display(),
        "pdf-rag boot"
    );

    if let Command::FileIndex = cli.command {
        let index = build_file_index(&layout)?;
        for (project, files) in &index {
            println!("{project}: {} file(s)", files.len());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli.backend.resolve()?;
    let params = config.generation;
    let (embedder, generator) = connect(&config)?;
    info!(
        backend = %config.kind,
        embedding_model = %embedder.model_id(),
        generation_model = %generator.model_id(),
        "backend ready"
    );

    match cli.command {
        Command::Build {
            project,
            chunk_size,
            chunk_overlap,
        } => {
            let builder = ProjectBuilder::new(layout, embedder).with_chunking(ChunkingConfig {
                chunk_size,
                chunk_overlap,
            });
            let reports = match project {
                Some(project) => vec![builder.build_project(&project).await?],
                None => builder.build_all().await?,
            };
            for report in reports {
                println!(
                    "{}: {} document(s), {} chunk(s), {} dimensions, model {} at {}",
                    report.project,
                    report.documents,
                    report.chunks,
                    report.dimensions,
                    report.embedding_model,
                    report.finished_at.to_rfc3339()
                );
            }
        }
        Command::Ask {
            project,
            query,
            top_k,
        } => {
            let answer =
                ask(&layout, embedder, generator.as_ref(), &project, &query, top_k, params).await;
            match answer {
                Ok(answer) => print_answer(&answer),
                Err(error) => {
                    eprintln!("error: {error}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Search {
            project,
            query,
            top_k,
        } => {
            let hits = search(&layout, embedder, &project, &query, top_k).await;
            match hits {
                Ok(hits) => {
                    for hit in hits {
                        println!(
                            "[{}] score={:.4} source={} page={}",
                            hit.position,
                            hit.score,
                            hit.chunk.metadata.source,
                            hit.chunk.metadata.page_number
                        );
                        println!("  {}", hit.chunk.content);
                    }
                }
                Err(error) => {
                    eprintln!("error: {error}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Agent { query } => {
            let file_index_path = layout.file_index();
            let file_index = if file_index_path.is_file() {
                load_file_index(&file_index_path)?
            } else {
                build_file_index(&layout)?
            };
            let agent = Agent::new(layout, file_index, embedder, generator, params);

            match query {
                Some(query) => println!("{}", agent.handle(&query).await),
                None => agent_repl(&agent).await?,
            }
        }
        Command::FileIndex => {}
    }

    Ok(ExitCode::SUCCESS)
}

async fn ask(
    layout: &ProjectLayout,
    embedder: Arc<dyn Embedder>,
    generator: &dyn Generator,
    project: &str,
    query: &str,
    top_k: usize,
    params: GenerationParams,
) -> Result<Answer, QueryError> {
    let pipeline = QueryPipeline::load(&layout.project(project), embedder)?;
    pipeline.answer(generator, query, top_k, params).await
}

async fn search(
    layout: &ProjectLayout,
    embedder: Arc<dyn Embedder>,
    project: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, QueryError> {
    let pipeline = QueryPipeline::load(&layout.project(project), embedder)?;
    pipeline.retrieve(query, top_k).await
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        for source in &answer.sources {
            println!(
                "Source: {} (Page {})",
                source.chunk.metadata.source, source.chunk.metadata.page_number
            );
        }
    }
}

async fn agent_repl(agent: &Agent) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("Enter your query (or 'exit' to quit): ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("exit") {
            break;
        }
        if query.is_empty() {
            continue;
        }
        println!("{}", agent.handle(query).await);
    }
    Ok(())
}
