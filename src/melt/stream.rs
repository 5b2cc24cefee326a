//! Adapters over sequences of flattened documents
//!
//! [`FlattenStream`] turns an iterator of documents into an iterator of
//! per-document chunks. [`strip_metadata`] and [`transform_rows`] post-process
//! such chunks.

use crate::error::FlattenError;
use crate::melt::flattener::DataFlattener;
use crate::types::{Entity, EntityMap, Flattened, FlattenedEntity, Row};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

/// Errors raised by the chunk adapters
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Invalid object format of '{entity}'")]
    InvalidFormat { entity: String },

    #[error("No metadata for '{entity}'")]
    MissingMetadata { entity: String },

    #[error(transparent)]
    Flatten(#[from] FlattenError),
}

/// Flattens documents one at a time, yielding one chunk per document
///
/// Documents that fail to flatten are logged and skipped, unless
/// `abort_on_error` is set, in which case the error is yielded and the stream
/// ends.
pub struct FlattenStream<'a, I> {
    flattener: &'a DataFlattener,
    documents: I,
    include_metadata: bool,
    abort_on_error: bool,
    finished: bool,
}

impl<'a, I> FlattenStream<'a, I>
where
    I: Iterator<Item = Value>,
{
    pub fn new(flattener: &'a DataFlattener, documents: I) -> Self {
        FlattenStream {
            flattener,
            documents,
            include_metadata: false,
            abort_on_error: false,
            finished: false,
        }
    }

    /// Wrap each entity's rows together with its metadata
    pub fn include_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }

    pub fn abort_on_error(mut self, abort_on_error: bool) -> Self {
        self.abort_on_error = abort_on_error;
        self
    }
}

impl<I> Iterator for FlattenStream<'_, I>
where
    I: Iterator<Item = Value>,
{
    type Item = Result<Flattened, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        for document in self.documents.by_ref() {
            let logged = tracing::enabled!(tracing::Level::DEBUG).then(|| document.to_string());
            match self.flattener.flatten_chunk(document, self.include_metadata) {
                Ok(chunk) => return Some(Ok(chunk)),
                Err(e) => {
                    error!(collection = self.flattener.root_name(), error = %e, "failed to flatten document");
                    if let Some(document) = logged {
                        debug!(document = %document, "rejected document");
                    }
                    if self.abort_on_error {
                        self.finished = true;
                        return Some(Err(e.into()));
                    }
                }
            }
        }

        self.finished = true;
        None
    }
}

/// Replaces `{data, metadata}` wrapping with bare rows
///
/// Bare row lists are rejected unless `fault_tolerant` is set.
pub fn strip_metadata(chunk: Flattened, fault_tolerant: bool) -> Result<Flattened, AdapterError> {
    chunk
        .into_iter()
        .map(|(entity, flattened)| match flattened {
            FlattenedEntity::WithMetadata(wrapped) => Ok((entity, FlattenedEntity::Rows(wrapped.data))),
            FlattenedEntity::Rows(rows) if fault_tolerant => Ok((entity, FlattenedEntity::Rows(rows))),
            FlattenedEntity::Rows(_) => Err(AdapterError::InvalidFormat { entity }),
        })
        .collect()
}

/// Maps every row of a chunk through `transform`, dropping rows mapped to `None`
///
/// The entity handed to `transform` comes from `metadata` when given, otherwise
/// from the chunk's own wrapping. The wrapping of each entity is preserved.
pub fn transform_rows<F>(
    chunk: Flattened,
    metadata: Option<&EntityMap>,
    mut transform: F,
) -> Result<Flattened, AdapterError>
where
    F: FnMut(Row, &Entity, &str) -> Option<Row>,
{
    let mut transformed = Flattened::new();
    for (name, flattened) in chunk {
        let entity = metadata
            .and_then(|entities| entities.get(&name))
            .or_else(|| flattened.metadata())
            .cloned()
            .ok_or_else(|| AdapterError::MissingMetadata {
                entity: name.clone(),
            })?;

        let mut apply = |rows: Vec<Row>| -> Vec<Row> {
            rows.into_iter()
                .filter_map(|row| transform(row, &entity, &name))
                .collect()
        };
        let flattened = match flattened {
            FlattenedEntity::WithMetadata(mut wrapped) => {
                wrapped.data = apply(wrapped.data);
                FlattenedEntity::WithMetadata(wrapped)
            }
            FlattenedEntity::Rows(rows) => FlattenedEntity::Rows(apply(rows)),
        };
        transformed.insert(name, flattened);
    }
    Ok(transformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingOptions;
    use crate::types::EntityData;
    use serde_json::json;

    fn flattener() -> DataFlattener {
        DataFlattener::new(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["id"]
            }),
            "collection",
            NamingOptions::default(),
        )
        .unwrap()
    }

    fn documents() -> Vec<Value> {
        vec![
            json!({"id": 1, "tags": ["a"]}),
            json!({"id": "broken"}),
            json!({"id": 2}),
        ]
    }

    #[test]
    fn test_stream_skips_failing_documents() {
        let flattener = flattener();
        let chunks: Vec<Flattened> = FlattenStream::new(&flattener, documents().into_iter())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0]["collection/tags[@]"].rows().len(), 1);
        assert_eq!(chunks[1]["collection"].rows()[0]["id"], json!(2));
    }

    #[test]
    fn test_stream_aborts_on_error() {
        let flattener = flattener();
        let mut stream = FlattenStream::new(&flattener, documents().into_iter())
            .include_metadata(true)
            .abort_on_error(true);

        let first = stream.next().unwrap().unwrap();
        assert!(first["collection"].metadata().is_some());
        assert!(matches!(
            stream.next(),
            Some(Err(AdapterError::Flatten(FlattenError::DataValidation { .. })))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_strip_metadata() {
        let flattener = flattener();
        let wrapped = flattener
            .flatten_with_metadata(json!({"id": 1, "tags": ["a"]}))
            .unwrap();

        let stripped = strip_metadata(wrapped, false).unwrap();
        assert_eq!(
            serde_json::to_value(&stripped).unwrap(),
            json!({
                "collection": [{"id": 1}],
                "collection/tags[@]": [{"$collection~id": 1, "$value": "a"}]
            })
        );

        let error = strip_metadata(stripped.clone(), false).unwrap_err();
        assert!(error.to_string().contains("Invalid object format"));
        assert_eq!(strip_metadata(stripped.clone(), true).unwrap(), stripped);
    }

    #[test]
    fn test_transform_rows() {
        let flattener = flattener();
        let chunk = flattener
            .flatten_chunk(json!({"id": 1, "tags": ["a", "b"]}), false)
            .unwrap();

        let transformed = transform_rows(chunk.clone(), Some(flattener.entities()), |mut row, entity, name| {
            if row.get("$value") == Some(&json!("b")) {
                return None;
            }
            row.insert("_origin".to_string(), json!(entity.origin));
            row.insert("_entity".to_string(), json!(name));
            Some(row)
        })
        .unwrap();

        let tags = transformed["collection/tags[@]"].rows();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["_origin"], json!("#/properties/tags/items"));
        assert_eq!(tags[0]["_entity"], json!("collection/tags[@]"));

        let error = transform_rows(chunk, None, |row, _, _| Some(row)).unwrap_err();
        assert!(matches!(error, AdapterError::MissingMetadata { .. }));
    }

    #[test]
    fn test_transform_rows_uses_wrapped_metadata() {
        let mut chunk = Flattened::new();
        chunk.insert(
            "entity".to_string(),
            FlattenedEntity::WithMetadata(EntityData {
                data: vec![json!({"id": 1}).as_object().cloned().unwrap()],
                metadata: Entity::new("#/definitions/entity"),
            }),
        );

        let transformed = transform_rows(chunk, None, |row, entity, _| {
            assert_eq!(entity.origin, "#/definitions/entity");
            Some(row)
        })
        .unwrap();
        assert_eq!(transformed["entity"].rows().len(), 1);
        assert!(transformed["entity"].metadata().is_some());
    }
}
