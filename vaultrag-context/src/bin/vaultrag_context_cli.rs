use chrono::NaiveDate;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use vaultrag_context::text::{ChunkingConfig, NoteChunker};

/// A CLI tool to chunk a Markdown note into JSON output using vaultrag-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input note. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Vault-relative source path recorded on every chunk.
    #[arg(short, long, default_value = "unknown_source")]
    source: String,

    /// Note title recorded on every chunk.
    #[arg(short, long, default_value = "untitled")]
    title: String,

    /// Target chunk size in characters.
    #[arg(short = 'c', long, default_value_t = 900)]
    chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[arg(short = 'o', long, default_value_t = 150)]
    chunk_overlap: usize,

    /// Minimum chunk length kept when it is not the last in its section.
    #[arg(short = 'm', long, default_value_t = 40)]
    min_chunk_chars: usize,

    /// Date (YYYY-MM-DD) for sections without a date heading.
    #[arg(short = 'd', long)]
    fallback_date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct SerializableTextChunk<'a> {
    chunk_index: usize,
    entry_date: Option<NaiveDate>,
    text: &'a str,
    passage: String,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let note = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let config = ChunkingConfig::new(args.chunk_size)
        .with_chunk_overlap(args.chunk_overlap)
        .with_min_chunk_chars(args.min_chunk_chars);
    let chunker =
        NoteChunker::new(args.source, args.title, config).with_fallback_date(args.fallback_date);

    let chunks = chunker.get_chunks(&note);
    let serializable_chunks: Vec<SerializableTextChunk> = chunks
        .iter()
        .map(|c| SerializableTextChunk {
            chunk_index: c.chunk_index,
            entry_date: c.entry_date,
            text: &c.text,
            passage: c.build(),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{json_output}");

    Ok(())
}
