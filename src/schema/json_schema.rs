//! Conversion of flattened entities into a JSON Schema of their rows

use crate::schema::pointer;
use crate::types::{EntityMap, Field, FieldType};
use serde_json::{json, Map, Value};

/// Builds a JSON Schema of a document holding the rows of every entity
///
/// The document has one array property per entity, each item referencing the
/// entity's definition under `#/definitions`.
pub fn to_json_schema(entities: &EntityMap) -> Value {
    let mut definitions = Map::new();
    let mut properties = Map::new();

    for (name, entity) in entities {
        let mut field_properties = Map::new();
        let mut required = Vec::new();
        for (field_name, field) in &entity.fields {
            if field.identity {
                required.push(Value::String(field_name.clone()));
            }
            field_properties.insert(field_name.clone(), field_schema(field));
        }

        let mut definition = Map::new();
        definition.insert("type".to_string(), json!("object"));
        if !field_properties.is_empty() {
            definition.insert("properties".to_string(), Value::Object(field_properties));
        }
        if !required.is_empty() {
            definition.insert("required".to_string(), Value::Array(required));
        }
        definitions.insert(name.clone(), Value::Object(definition));

        properties.insert(
            name.clone(),
            json!({
                "type": "array",
                "items": {"$ref": format!("#/definitions/{}", pointer::escape(name))}
            }),
        );
    }

    json!({
        "type": "object",
        "definitions": definitions,
        "properties": properties,
    })
}

fn field_schema(field: &Field) -> Value {
    let mut property = Map::new();

    let (type_name, format) = match &field.field_type {
        FieldType::Enum { values } => {
            let mut values = values.clone();
            if field.nullable {
                values.push(Value::Null);
            }
            property.insert("enum".to_string(), Value::Array(values));
            (None, None)
        }
        FieldType::Boolean => (Some("boolean"), None),
        FieldType::Integer => (Some("integer"), None),
        FieldType::Number => (Some("number"), None),
        FieldType::String => (Some("string"), None),
        FieldType::Date => (Some("string"), Some("date")),
        FieldType::Time => (Some("string"), Some("time")),
        FieldType::Datetime => (Some("string"), Some("date-time")),
        FieldType::Timestamp => (Some("integer"), Some("timestamp")),
        // Free-form values may hold any JSON type
        FieldType::Json => (None, None),
    };

    if let Some(type_name) = type_name {
        let mut types = vec![json!(type_name)];
        if field.nullable {
            types.push(json!("null"));
        }
        property.insert("type".to_string(), Value::Array(types));
    }
    if let Some(format) = format {
        property.insert("format".to_string(), json!(format));
    }
    if let Some(default) = &field.default {
        property.insert("default".to_string(), default.clone());
    }

    Value::Object(property)
}
