//! Schema-driven flattening of JSON documents into entity rows
//!
//! A [`DataFlattener`] is built once per schema. It flattens the schema, attaches
//! the resulting [`FlattenDeclaration`]s to the compiled schema nodes they
//! originate from, and then turns any number of documents into rows.

use crate::error::FlattenError;
use crate::melt::plan::{FlattenDeclaration, FlattenPlan};
use crate::melt::walker::{CompiledSchema, NodeId};
use crate::naming::{FlatterNaming, NamingOptions};
use crate::schema::pointer::{self, PathSegment};
use crate::schema::SchemaFlattener;
use crate::types::{
    EntityData, EntityMap, Flattened, FlattenedEntity, FlattenedRows, Reference, ReferenceMode, Row,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Flattens documents conforming to one schema
///
/// Holds no per-document state, so one instance can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct DataFlattener {
    schema: Value,
    root_name: String,
    naming: FlatterNaming,
    entities: EntityMap,
    compiled: CompiledSchema,
    declarations: HashMap<NodeId, FlattenDeclaration>,
}

impl DataFlattener {
    /// Builds a flattener for documents described by `schema`
    ///
    /// Fails if the schema can not be flattened.
    pub fn new(schema: Value, root_name: &str, options: NamingOptions) -> Result<Self, FlattenError> {
        let schema_flattener = SchemaFlattener::new(options);
        let entities = schema_flattener.flatten(&schema, root_name)?;
        let compiled = CompiledSchema::compile(&schema)?;

        let plan = FlattenPlan::from_entities(&entities);
        let mut declarations = HashMap::with_capacity(plan.len());
        for (origin, declaration) in plan.declarations {
            let node = compiled.node_at(&origin).ok_or_else(|| {
                FlattenError::schema(format!(
                    "'{}' originates from '{}', which is not reachable from the schema root",
                    declaration.entity, origin
                ))
            })?;
            declarations.insert(node, declaration);
        }

        debug!(
            root = root_name,
            entities = entities.len(),
            nodes = compiled.len(),
            "compiled data flattener"
        );

        Ok(DataFlattener {
            schema,
            root_name: root_name.to_string(),
            naming: schema_flattener.naming().clone(),
            entities,
            compiled,
            declarations,
        })
    }

    /// Flattened entities rows are produced for
    pub fn entities(&self) -> &EntityMap {
        &self.entities
    }

    pub fn naming(&self) -> &FlatterNaming {
        &self.naming
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Compiled walker over the schema, usable for plain validation
    pub fn compiled_schema(&self) -> &CompiledSchema {
        &self.compiled
    }

    /// Validates a document and collects its rows per entity
    ///
    /// Defaults declared in the schema are applied first. Entities without
    /// rows are absent from the result.
    pub fn flatten(&self, data: Value) -> Result<FlattenedRows, FlattenError> {
        if !data.is_object() {
            return Err(FlattenError::InvalidArgument(
                "data must be a JSON object".to_string(),
            ));
        }

        let mut data = data;
        self.compiled.prepare(&mut data)?;

        let mut rows = FlattenedRows::new();
        self.compiled
            .visit(&data, &mut |node, value: &Value, path: &[PathSegment]| {
                let Some(declaration) = self.declarations.get(&node) else {
                    return Ok(());
                };
                if value.is_null() {
                    return Ok(());
                }
                let row = build_row(&data, declaration, value, path)?;
                rows.entry(declaration.entity.clone()).or_default().push(row);
                Ok::<(), FlattenError>(())
            })?;

        debug!(entities = rows.len(), "flattened document");
        Ok(rows)
    }

    /// Like [`flatten`](Self::flatten), with each entity's metadata next to its rows
    pub fn flatten_with_metadata(&self, data: Value) -> Result<Flattened, FlattenError> {
        self.flatten_chunk(data, true)
    }

    /// Flattens a document into a stream chunk, optionally carrying metadata
    pub fn flatten_chunk(&self, data: Value, include_metadata: bool) -> Result<Flattened, FlattenError> {
        let rows = self.flatten(data)?;
        rows.into_iter()
            .map(|(name, data)| {
                if !include_metadata {
                    return Ok((name, FlattenedEntity::Rows(data)));
                }
                let metadata = self.entities.get(&name).cloned().ok_or_else(|| {
                    FlattenError::schema(format!("No metadata for '{}'", name))
                })?;
                Ok((name, FlattenedEntity::WithMetadata(EntityData { data, metadata })))
            })
            .collect()
    }
}

fn build_row(
    root: &Value,
    declaration: &FlattenDeclaration,
    value: &Value,
    path: &[PathSegment],
) -> Result<Row, FlattenError> {
    let mut row = Row::new();
    for (name, field) in &declaration.fields {
        let resolved = match &field.reference {
            None => value.get(name).cloned(),
            Some(reference) => Some(resolve_reference(root, reference, path, name)?),
        };
        let resolved = resolved
            .or_else(|| field.default.clone())
            .or_else(|| field.nullable.then_some(Value::Null));
        if let Some(resolved) = resolved {
            row.insert(name.clone(), resolved);
        }
    }
    Ok(row)
}

/// Recovers a field value from an ancestor of the current location
fn resolve_reference(
    root: &Value,
    reference: &Reference,
    path: &[PathSegment],
    field_name: &str,
) -> Result<Value, FlattenError> {
    let unresolved = |message: String| FlattenError::DataResolution {
        path: pointer::data_pointer(path),
        message,
    };

    if reference.depth > path.len() {
        return Err(unresolved(format!(
            "field '{}' ascends {} levels from a depth of {}",
            field_name,
            reference.depth,
            path.len()
        )));
    }
    let ancestor = &path[..path.len() - reference.depth];

    let resolved = match &reference.mode {
        ReferenceMode::FieldName => ancestor.last().map(|segment| Value::String(segment.name())),
        ReferenceMode::AncestorValue => pointer::locate(root, ancestor).cloned(),
        ReferenceMode::ByName(name) => pointer::locate(root, ancestor)
            .and_then(|value| value.get(name))
            .cloned(),
    };
    resolved.ok_or_else(|| unresolved(format!("field '{}' has no value", field_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flatten(schema: Value, data: Value) -> Value {
        let flattener = DataFlattener::new(schema, "collection", NamingOptions::default()).unwrap();
        serde_json::to_value(flattener.flatten(data).unwrap()).unwrap()
    }

    #[test]
    fn test_tuple_array_schema() {
        let error = DataFlattener::new(
            json!({
                "type": "object",
                "properties": {
                    "simpleProperty": {"type": "integer"},
                    "array": {"type": "array", "items": [{"type": "integer"}, {"type": "string"}]}
                },
                "required": ["simpleProperty"]
            }),
            "collection",
            NamingOptions::default(),
        )
        .unwrap_err();
        assert!(error.to_string().contains("tuple array"));
    }

    #[test]
    fn test_basic_data() {
        let data = json!({
            "booleanProperty": true,
            "integerProperty": 0,
            "stringProperty": "value",
            "enumProperty": "option1",
            "objectProperty": {}
        });
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "booleanProperty": {"type": "boolean"},
                    "integerProperty": {"type": "integer"},
                    "stringProperty": {"type": "string"},
                    "enumProperty": {"enum": ["option1", "option2"]},
                    "objectProperty": {"type": "object"}
                }
            }),
            data.clone(),
        );
        assert_eq!(flattened, json!({"collection": [data]}));
    }

    #[test]
    fn test_defaults_and_nullables() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "booleanProperty": {"type": "boolean", "default": true},
                    "enumProperty": {"enum": ["option1", "option2"], "default": "option1"},
                    "objectProperty": {"type": "object", "default": {}},
                    "integerProperty": {"type": ["integer", "null"]},
                    "nullableEnum": {"enum": ["option1", null]},
                    "optional": {"type": "string"}
                }
            }),
            json!({}),
        );
        assert_eq!(
            flattened,
            json!({
                "collection": [{
                    "booleanProperty": true,
                    "enumProperty": "option1",
                    "objectProperty": {},
                    "integerProperty": null,
                    "nullableEnum": null
                }]
            })
        );
    }

    #[test]
    fn test_basic_arrays() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "identityProperty": {"type": "integer"},
                    "booleanProperty": {"type": "array", "items": {"type": "boolean"}},
                    "enumProperty": {"type": "array", "items": {"enum": ["option1", "option2"]}},
                    "objectProperty": {"type": "array", "items": {"type": "object"}}
                },
                "required": ["identityProperty"]
            }),
            json!({
                "identityProperty": 42,
                "booleanProperty": [true],
                "enumProperty": ["option1", "option2"],
                "objectProperty": [{}]
            }),
        );
        assert_eq!(
            flattened,
            json!({
                "collection": [{"identityProperty": 42}],
                "collection/booleanProperty[@]": [
                    {"$collection~identityProperty": 42, "$value": true}
                ],
                "collection/enumProperty[@]": [
                    {"$collection~identityProperty": 42, "$value": "option1"},
                    {"$collection~identityProperty": 42, "$value": "option2"}
                ],
                "collection/objectProperty[@]": [
                    {"$collection~identityProperty": 42, "$value": {}}
                ]
            })
        );
    }

    #[test]
    fn test_null_complex_values_emit_no_rows() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "complex": {
                    "type": ["object", "null"],
                    "properties": {
                        "property": {"type": "string"},
                        "nested": {
                            "type": "object",
                            "properties": {"deep": {"type": "integer"}}
                        }
                    }
                },
                "array": {"type": ["array", "null"], "items": {"type": "integer"}}
            },
            "required": ["id"]
        });
        assert_eq!(
            flatten(schema, json!({"id": 42, "complex": null, "array": null})),
            json!({"collection": [{"id": 42}]})
        );
    }

    #[test]
    fn test_complex_data() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "properties": {"otherSimpleProperty": {"type": "integer"}}
                    },
                    "array": {
                        "type": "array",
                        "items": {"type": "object", "properties": {"value": {"type": "string"}}}
                    }
                },
                "required": ["id"]
            }),
            json!({
                "id": 0,
                "complexObject": {"otherSimpleProperty": 1},
                "array": [{"value": "a"}, {"value": "b"}]
            }),
        );
        assert_eq!(
            flattened,
            json!({
                "collection": [{"id": 0}],
                "collection/complexObject": [{"$collection~id": 0, "otherSimpleProperty": 1}],
                "collection/array[@]": [
                    {"$collection~id": 0, "value": "a"},
                    {"$collection~id": 0, "value": "b"}
                ]
            })
        );
    }

    #[test]
    fn test_default_additional_properties() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "complexObject": {"type": "object", "additionalProperties": true}
                },
                "required": ["id"]
            }),
            json!({
                "id": 42,
                "complexObject": {
                    "booleanProperty": true,
                    "integerProperty": 0,
                    "stringProperty": "value",
                    "objectProperty": {}
                }
            }),
        );
        assert_eq!(
            flattened,
            json!({
                "collection": [{"id": 42}],
                "collection/complexObject": [{"$collection~id": 42}],
                "collection/complexObject[@0]": [
                    {"$collection~id": 42, "$property": "booleanProperty", "$value": true},
                    {"$collection~id": 42, "$property": "integerProperty", "$value": 0},
                    {"$collection~id": 42, "$property": "stringProperty", "$value": "value"},
                    {"$collection~id": 42, "$property": "objectProperty", "$value": {}}
                ]
            })
        );
    }

    #[test]
    fn test_complex_additional_properties() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "additionalProperties": {
                            "type": "object",
                            "properties": {"otherValue": {"type": "integer"}}
                        }
                    }
                },
                "required": ["id"]
            }),
            json!({
                "id": 42,
                "complexObject": {
                    "objectProperty0": {"otherValue": 0},
                    "objectProperty1": {"otherValue": 1}
                }
            }),
        );
        assert_eq!(
            flattened["collection/complexObject[@0]"],
            json!([
                {"$collection~id": 42, "$property": "objectProperty0", "otherValue": 0},
                {"$collection~id": 42, "$property": "objectProperty1", "otherValue": 1}
            ])
        );
    }

    #[test]
    fn test_pattern_properties() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "patternProperties": {"^.*$": {"type": "integer"}}
                    }
                },
                "required": ["id"]
            }),
            json!({
                "id": 42,
                "complexObject": {"integerProperty0": 0, "integerProperty1": 1}
            }),
        );
        assert_eq!(
            flattened["collection/complexObject[@0]"],
            json!([
                {"$collection~id": 42, "$property": "integerProperty0", "$value": 0},
                {"$collection~id": 42, "$property": "integerProperty1", "$value": 1}
            ])
        );
    }

    #[test]
    fn test_dynamic_key_reaches_nested_entities() {
        let flattened = flatten(
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "patternProperties": {
                            "^.*$": {
                                "type": "object",
                                "properties": {
                                    "anotherComplexObject": {
                                        "type": "object",
                                        "properties": {
                                            "otherId": {"type": "integer"},
                                            "otherValue": {"type": "integer"}
                                        },
                                        "required": ["otherId"]
                                    }
                                }
                            }
                        }
                    }
                },
                "required": ["id"]
            }),
            json!({
                "id": 42,
                "complexObject": {
                    "key": {"anotherComplexObject": {"otherId": 1, "otherValue": 2}}
                }
            }),
        );
        assert_eq!(
            flattened["collection/complexObject[@0]/anotherComplexObject"],
            json!([{
                "$collection~id": 42,
                "$collection/complexObject[@0]~$property": "key",
                "otherId": 1,
                "otherValue": 2
            }])
        );
    }

    #[test]
    fn test_metadata() {
        let flattener = DataFlattener::new(
            json!({
                "type": "object",
                "properties": {
                    "simpleProperty": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "properties": {"otherSimpleProperty": {"type": "integer"}}
                    }
                },
                "required": ["simpleProperty"]
            }),
            "collection",
            NamingOptions::default(),
        )
        .unwrap();
        let flattened = flattener
            .flatten_with_metadata(json!({
                "simpleProperty": 0,
                "complexObject": {"otherSimpleProperty": 0}
            }))
            .unwrap();

        assert_eq!(
            serde_json::to_value(&flattened).unwrap(),
            json!({
                "collection": {
                    "data": [{"simpleProperty": 0}],
                    "metadata": {
                        "fields": {"simpleProperty": {"identity": true, "type": "integer"}},
                        "origin": "#",
                        "relations": {"collection/complexObject": "one-to-one"}
                    }
                },
                "collection/complexObject": {
                    "data": [{"$collection~simpleProperty": 0, "otherSimpleProperty": 0}],
                    "metadata": {
                        "fields": {
                            "$collection~simpleProperty": {
                                "identity": true,
                                "reference": {"depth": 1, "entity": "collection", "field": "simpleProperty"},
                                "relation": {"entity": "collection", "field": "simpleProperty"},
                                "type": "integer"
                            },
                            "otherSimpleProperty": {"type": "integer"}
                        },
                        "origin": "#/properties/complexObject"
                    }
                }
            })
        );
    }

    #[test]
    fn test_invalid_data() {
        let flattener = DataFlattener::new(
            json!({
                "type": "object",
                "properties": {
                    "simpleProperty": {"type": "integer"},
                    "complexObject": {
                        "type": "object",
                        "properties": {"otherSimpleProperty": {"type": "integer"}}
                    }
                },
                "additionalProperties": false,
                "required": ["simpleProperty"]
            }),
            "collection",
            NamingOptions::default(),
        )
        .unwrap();

        let error = flattener
            .flatten(json!({
                "simpleProperty": 0,
                "complexObject": {"otherSimpleProperty": "zero"},
                "extraProperty": true
            }))
            .unwrap_err();
        assert!(error.to_string().starts_with("Invalid data"));
        match error {
            FlattenError::DataValidation { violations } => assert_eq!(violations.len(), 2),
            other => panic!("unexpected error: {}", other),
        }

        assert!(matches!(
            flattener.flatten(json!([1])),
            Err(FlattenError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_reference_errors() {
        let root = json!({"a": {"b": 1}});
        let path = vec![PathSegment::Key("a".to_string())];

        let too_deep = Reference::new(2, ReferenceMode::AncestorValue);
        assert!(matches!(
            resolve_reference(&root, &too_deep, &path, "x"),
            Err(FlattenError::DataResolution { .. })
        ));

        let at_root = Reference::new(1, ReferenceMode::FieldName);
        assert!(resolve_reference(&root, &at_root, &path, "x").is_err());

        let missing = Reference::new(0, ReferenceMode::ByName("c".to_string()));
        assert!(resolve_reference(&root, &missing, &path, "x").is_err());

        let present = Reference::new(0, ReferenceMode::ByName("b".to_string()));
        assert_eq!(resolve_reference(&root, &present, &path, "x").unwrap(), json!(1));
    }
}
