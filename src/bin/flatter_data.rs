//! flatter-data: Flatten JSON documents into per-entity rows
//!
//! Usage:
//!   # Flatten one document, rows to stdout tagged with their entity
//!   flatter-data --schema schema.json --name orders order.json
//!
//!   # Flatten NDJSON into one .jsonl file per entity
//!   flatter-data --schema schema.json --name orders --ndjson orders.jsonl --output-dir ./rows
//!
//!   # Print one chunk per document, each entity wrapped with its metadata
//!   cat orders.jsonl | flatter-data --schema schema.json --name orders --ndjson --metadata

mod common;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use common::NamingArgs;
use schema_flatter::{DataFlattener, EntityWriter, FlattenStream, SingleWriter};
use serde_json::Value;
use std::fs::File;
use std::io::{stdin, stdout, BufWriter, Read, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flatter-data")]
#[command(about = "Flatten JSON documents into relational rows", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// JSON Schema describing the documents
    #[arg(long, short = 's', value_name = "FILE")]
    schema: String,

    /// Name of the root entity
    #[arg(long, short = 'n')]
    name: String,

    /// Process newline-delimited JSON (one JSON object per line)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for separate .jsonl files per entity
    /// If omitted, writes to stdout as a single stream tagged with `_entity`
    #[arg(long, short = 'o')]
    output_dir: Option<String>,

    /// Print one chunk per document with entity metadata (stdout only)
    #[arg(long, conflicts_with = "output_dir")]
    metadata: bool,

    /// Stop at the first document that fails to flatten instead of skipping it
    #[arg(long)]
    abort_on_error: bool,

    #[command(flatten)]
    naming: NamingArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut schema_content = std::fs::read(&args.schema)
        .with_context(|| format!("Failed to read schema: {}", args.schema))?;
    let schema: Value = simd_json::serde::from_slice(&mut schema_content)
        .context("Failed to parse schema")?;
    let flattener = DataFlattener::new(schema, &args.name, args.naming.naming_options()?)?;

    let mut content = Vec::new();
    match &args.input {
        Some(path) => File::open(path)
            .with_context(|| format!("Failed to open input: {}", path))?
            .read_to_end(&mut content),
        None => stdin().read_to_end(&mut content),
    }
    .context("Failed to read input")?;
    let documents = parse_documents(content, args.ndjson)?;
    let total = documents.len();
    if total == 0 {
        warn!("no JSON documents found in input");
    }

    let stream = FlattenStream::new(&flattener, documents.into_iter())
        .include_metadata(args.metadata)
        .abort_on_error(args.abort_on_error);

    let mut flattened = 0;
    if let Some(output_dir) = &args.output_dir {
        let mut writer = EntityWriter::new_file_writer(output_dir)?;
        for chunk in stream {
            writer.write_chunk(&chunk?)?;
            flattened += 1;
        }
        writer.flush()?;
    } else if args.metadata {
        let mut out = BufWriter::new(stdout().lock());
        for chunk in stream {
            let line = serde_json::to_string(&chunk?).context("Failed to serialize chunk")?;
            writeln!(out, "{}", line).context("Failed to write chunk")?;
            flattened += 1;
        }
        out.flush()?;
    } else {
        let mut writer = SingleWriter::new(BufWriter::new(stdout().lock()));
        for chunk in stream {
            let chunk = chunk?;
            let rows = chunk
                .into_iter()
                .map(|(entity, flattened)| (entity, flattened.rows().to_vec()))
                .collect();
            writer.write_rows(&rows)?;
            flattened += 1;
        }
        writer.flush()?;
    }

    info!(documents = total, flattened, "done");
    Ok(())
}

/// Splits input into documents using SIMD-accelerated parsing
///
/// A top-level array is treated as a stream of documents. Input that does not
/// parse as a single JSON value falls back to one document per line.
fn parse_documents(content: Vec<u8>, ndjson: bool) -> Result<Vec<Value>> {
    if !ndjson {
        if let Ok(value) = simd_json::serde::from_slice::<Value>(&mut content.clone()) {
            return Ok(match value {
                Value::Array(documents) => documents,
                document => vec![document],
            });
        }
    }

    let text = String::from_utf8_lossy(&content);
    let mut documents = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut bytes = line.as_bytes().to_vec();
        let document = simd_json::serde::from_slice::<Value>(&mut bytes)
            .with_context(|| format!("Failed to parse JSON on line {}", index + 1))?;
        documents.push(document);
    }
    Ok(documents)
}
