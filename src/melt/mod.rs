//! Data melting - flatten JSON documents into entity rows
//!
//! This module walks documents with a compiled schema and emits one row per
//! visited sub-object into the entity the schema flattener compiled it to.
//!
//! ## Processing streams
//!
//! Build one `DataFlattener` per schema and reuse it: compiling the schema is
//! the expensive part, flattening a document only walks it once to validate
//! and once to collect rows.

pub mod flattener;
pub mod plan;
pub mod stream;
pub mod walker;
pub mod writer;

pub use flattener::DataFlattener;
pub use plan::{FieldDeclaration, FlattenDeclaration, FlattenPlan};
pub use stream::{strip_metadata, transform_rows, AdapterError, FlattenStream};
pub use walker::{CompiledSchema, NodeId};
pub use writer::{EntityWriter, SingleWriter};
