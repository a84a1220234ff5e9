use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vaultrag_models::OllamaGenerator;
use vaultrag_retriever::{
    config::RagConfig,
    retrieval::{
        date_parser::{DateParser, GenerationFallback},
        indexing_mode::IndexMode,
    },
    service::{RagService, split_by_date},
};

/// Index a Markdown vault and query it by meaning, date and name.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file. Defaults plus environment overrides apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vault root, overriding the config
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Directory of the index database, overriding the config
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index the whole vault
    Index {
        /// full re-indexes every note, scan only new and modified ones
        #[arg(short, long, default_value = "scan")]
        mode: IndexMode,
    },
    /// Re-index specific notes; missing ones are removed from the index
    IndexFiles {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Retrieve the chunks best matching a query
    Retrieve {
        query: String,
        /// Number of chunks to return (defaults to retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the date range a query would be filtered on
    ParseDate {
        text: String,
        /// Reference day (YYYY-MM-DD) instead of today
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Only use the pattern rules
        #[arg(long)]
        no_fallback: bool,
    },
    /// Split a note on its date headings
    SplitByDate { file: PathBuf },
    /// Watch the vault and re-index changed notes until interrupted
    Watch,
    /// List the tracked notes
    State,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<RagConfig> {
    let mut config = RagConfig::resolve(args.config.as_deref())?;
    if let Some(vault) = &args.vault {
        config.vault.path = vault.clone();
    }
    if let Some(dir) = &args.index_dir {
        config.index.dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    match args.command {
        Commands::Index { mode } => {
            let service = RagService::open(config).await?;
            let report = match mode {
                IndexMode::Full => service.reindex_full().await?,
                IndexMode::Scan => service.reindex_scan().await?,
                IndexMode::Files => {
                    anyhow::bail!("Use `index-files <paths>` to index specific notes")
                }
            };
            println!("{report}");
            for failure in &report.failures {
                println!("  {} [{}] {}", failure.path, failure.kind, failure.message);
            }
            Ok(())
        }
        Commands::IndexFiles { paths } => {
            let service = RagService::open(config).await?;
            let report = service.reindex_files(&paths).await?;
            println!("{report}");
            for failure in &report.failures {
                println!("  {} [{}] {}", failure.path, failure.kind, failure.message);
            }
            Ok(())
        }
        Commands::Retrieve { query, k, format } => {
            let k = k.unwrap_or(config.retrieval.top_k);
            let service = RagService::open(config).await?;
            let hits = service.retrieve(&query, k).await?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&hits)?),
                OutputFormat::Text => {
                    println!("Found {} chunks:", hits.len());
                    for hit in hits {
                        let date = hit
                            .entry_date()
                            .map_or_else(|| "undated".to_string(), |d| d.to_string());
                        println!(
                            "  Score: {:.3} | {} | {} | {}",
                            hit.chunk.score,
                            date,
                            hit.source(),
                            hit.title()
                        );
                        println!(
                            "    {}",
                            hit.body().chars().take(160).collect::<String>().replace('\n', " ")
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::ParseDate {
            text,
            today,
            no_fallback,
        } => {
            let today = today.unwrap_or_else(|| config.date_parser.today());
            let mut parser = DateParser::new();
            if config.date_parser.llm_fallback && !no_fallback {
                let generator = OllamaGenerator::new(config.models.ollama.clone())?;
                parser = parser.with_fallback(
                    GenerationFallback::new(Arc::new(generator))
                        .with_timeout(config.date_parser.fallback_timeout())
                        .with_retries(config.date_parser.fallback_retries),
                );
            }
            let range = parser.parse(&text, today).await;
            println!("{}", serde_json::to_string_pretty(&range)?);
            Ok(())
        }
        Commands::SplitByDate { file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            println!("{}", serde_json::to_string_pretty(&split_by_date(&text))?);
            Ok(())
        }
        Commands::Watch => {
            let service = Arc::new(RagService::open(config).await?);
            let report = service.reindex_scan().await?;
            println!("{report}");

            let watcher = service.watch()?;
            tokio::signal::ctrl_c().await?;
            watcher.stop().await?;
            Ok(())
        }
        Commands::State => {
            let service = RagService::open(config).await?;
            let entries = service.state_entries().await?;
            println!("Tracked notes: {}", entries.len());
            for entry in entries {
                let status = if entry.is_dirty() { "dirty" } else { "ok" };
                println!(
                    "  {} | chunks: {} | {} | indexed: {}",
                    entry.path,
                    entry.chunk_count,
                    status,
                    entry.indexed_at.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}
