//! flatter-schema: Compile a JSON Schema into flat, relationally-linked entities
//!
//! Usage:
//!   # Print the entity map
//!   flatter-schema schema.json --name orders
//!
//!   # Print a JSON Schema describing the rows of every entity
//!   flatter-schema schema.json --name orders --output json-schema
//!
//!   # Print entity names in insert order (owners first)
//!   flatter-schema schema.json --name orders --output order

mod common;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use common::NamingArgs;
use schema_flatter::{order_entities, SchemaFlattener};
use serde_json::Value;
use std::fs::File;
use std::io::{stdin, Read};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Output {
    /// Flattened entities with fields and relations
    Entities,
    /// JSON Schema of the flattened rows
    JsonSchema,
    /// Entity names ordered along relations
    Order,
}

#[derive(Parser, Debug)]
#[command(name = "flatter-schema")]
#[command(about = "Compile a JSON Schema into flat relational entities", long_about = None)]
struct Args {
    /// Schema file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    schema: Option<String>,

    /// Name of the root entity
    #[arg(long, short = 'n')]
    name: String,

    /// What to print
    #[arg(long, value_enum, default_value_t = Output::Entities)]
    output: Output,

    /// With --output order, list owned entities before their owners
    #[arg(long)]
    owned_first: bool,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,

    #[command(flatten)]
    naming: NamingArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut content = Vec::new();
    match &args.schema {
        Some(path) => File::open(path)
            .with_context(|| format!("Failed to open schema: {}", path))?
            .read_to_end(&mut content),
        None => stdin().read_to_end(&mut content),
    }
    .context("Failed to read schema")?;
    let schema: Value = simd_json::serde::from_slice(&mut content)
        .context("Failed to parse schema")?;

    let flattener = SchemaFlattener::new(args.naming.naming_options()?);
    let entities = flattener.flatten(&schema, &args.name)?;
    info!(root = %args.name, entities = entities.len(), "flattened schema");

    let output = match args.output {
        Output::Entities => serde_json::to_value(&entities)?,
        Output::JsonSchema => SchemaFlattener::to_json_schema(&entities),
        Output::Order => serde_json::to_value(order_entities(&entities, !args.owned_first))?,
    };

    let output = if args.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", output);

    Ok(())
}
