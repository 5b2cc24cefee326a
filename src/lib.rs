//! # Schema Flatter - relational flattening of JSON documents
//!
//! Converts documents described by a nested JSON Schema into flat,
//! relationally-linked rows, one table per structural entity, with generated
//! foreign-key fields that let the rows be joined back together.
//!
//! ## Modules
//!
//! - **schema**: Compile a JSON Schema into flat entities and derive a JSON Schema of their rows
//! - **melt**: Flatten documents against a schema into entity rows
//! - **ordering**: Order entities along their relations for inserts and deletes
//!
//! ## Quick Start
//!
//! ### Schema Flattening
//!
//! ```rust
//! use schema_flatter::SchemaFlattener;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "id": {"type": "integer"},
//!         "tags": {"type": "array", "items": {"type": "string"}}
//!     },
//!     "required": ["id"]
//! });
//!
//! let entities = SchemaFlattener::default().flatten(&schema, "collection")?;
//!
//! // "collection" (id) and "collection/tags[@]" ($collection~id, $value)
//! assert_eq!(entities.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ### Data Flattening
//!
//! ```rust
//! use schema_flatter::{DataFlattener, NamingOptions};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "id": {"type": "integer"},
//!         "tags": {"type": "array", "items": {"type": "string"}}
//!     },
//!     "required": ["id"]
//! });
//!
//! let flattener = DataFlattener::new(schema, "collection", NamingOptions::default())?;
//! let rows = flattener.flatten(json!({"id": 42, "tags": ["a", "b"]}))?;
//!
//! assert_eq!(rows["collection/tags[@]"][1]["$value"], "b");
//! assert_eq!(rows["collection/tags[@]"][1]["$collection~id"], 42);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufWriter};

pub mod error;
pub mod melt;
pub mod naming;
pub mod ordering;
pub mod schema;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{FlattenError, Violation};
pub use melt::{
    strip_metadata, transform_rows, AdapterError, CompiledSchema, DataFlattener, EntityWriter,
    FlattenStream, SingleWriter,
};
pub use naming::{FlatterNaming, NamingOptions};
pub use ordering::order_entities;
pub use schema::{to_json_schema, SchemaFlattener};
pub use types::{
    Entity, EntityData, EntityMap, Field, FieldType, Flattened, FlattenedEntity, FlattenedRows,
    Reference, ReferenceMode, Relation, RelationKind, Row,
};

/// Main entry point: flatten a JSON Lines stream into entity files
///
/// Returns the number of documents flattened.
pub fn flatten_json<R: BufRead>(
    reader: R,
    flattener: &DataFlattener,
    writer: &mut EntityWriter<BufWriter<File>>,
) -> Result<usize> {
    let mut documents = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSON on line {}", index + 1))?;

        let rows = flattener
            .flatten(value)
            .with_context(|| format!("Failed to flatten document on line {}", index + 1))?;
        writer.write_rows(&rows)?;
        documents += 1;
    }

    Ok(documents)
}
