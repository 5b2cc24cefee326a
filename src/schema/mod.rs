//! Schema flattening
//!
//! Compiles a nested JSON Schema into a set of flat entities and converts the
//! result back to a JSON Schema describing the rows of every entity.

pub mod flattener;
pub mod json_schema;
pub mod pointer;

pub use flattener::SchemaFlattener;
pub use json_schema::to_json_schema;
