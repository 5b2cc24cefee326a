//! Schema-driven walker pairing schema nodes with data nodes
//!
//! A [`CompiledSchema`] is an arena of nodes, one per schema location reachable
//! from the root. Walking a document happens in two passes: [`CompiledSchema::prepare`]
//! applies defaults and collects every violation, then [`CompiledSchema::visit`]
//! walks the prepared document and reports each (node, value, path) triple.

use crate::error::{FlattenError, Violation};
use crate::schema::pointer::{self, PathSegment};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d\d\d\d-[0-1]\d-[0-3]\d$").unwrap()
});

static TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[0-2]\d:[0-5]\d:[0-5]\d|23:59:60)(?:\.\d+)?(?:z|[+-]\d\d(?::?\d\d)?)?$").unwrap()
});

static DATE_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\d\d\d\d-[0-1]\d-[0-3]\d[t\s](?:[0-2]\d:[0-5]\d:[0-5]\d|23:59:60)(?:\.\d+)?(?:z|[+-]\d\d(?::?\d\d)?)$",
    )
    .unwrap()
});

/// Index of a node in a [`CompiledSchema`]
pub type NodeId = usize;

/// Type identifier for JSON values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    fn to_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Integral floats count as integers
    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Null, Value::Null) => true,
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Number, Value::Number(_)) => true,
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (JsonType::String, Value::String(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// String formats checked during validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Date,
    Time,
    DateTime,
}

impl Format {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "date" => Some(Format::Date),
            "time" => Some(Format::Time),
            "date-time" => Some(Format::DateTime),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Format::Date => "date",
            Format::Time => "time",
            Format::DateTime => "date-time",
        }
    }

    /// Checks the shape of `text` only
    ///
    /// Field ranges are bounded per digit, so impossible calendar dates such
    /// as `2020-19-39` pass. This is the lenient "fast" format mode of common
    /// JSON Schema validators.
    fn matches(self, text: &str) -> bool {
        match self {
            Format::Date => DATE_REGEX.is_match(text),
            Format::Time => TIME_REGEX.is_match(text),
            Format::DateTime => DATE_TIME_REGEX.is_match(text),
        }
    }
}

/// Treatment of object keys matched by neither `properties` nor `patternProperties`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Additional {
    Allowed,
    Forbidden,
    Schema(NodeId),
}

#[derive(Debug, Clone)]
struct SchemaNode {
    types: Vec<JsonType>,
    enum_values: Option<Vec<Value>>,
    format: Option<Format>,
    required: Vec<String>,
    properties: HashMap<String, NodeId>,
    /// Property names in declaration order, for default application
    property_order: Vec<String>,
    pattern_properties: Vec<(Regex, NodeId)>,
    additional: Additional,
    items: Option<NodeId>,
}

#[derive(Debug, Clone)]
enum NodeKind {
    /// `true` or `{}`
    Any,
    /// `false`
    Never,
    Ref(NodeId),
    Schema(Box<SchemaNode>),
}

#[derive(Debug, Clone)]
struct Node {
    pointer: String,
    /// Default declared on this very node, `$ref` siblings included
    default: Option<Value>,
    kind: NodeKind,
}

/// A schema compiled into a walkable arena of nodes
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
}

impl CompiledSchema {
    /// Compiles every node reachable from the schema root
    pub fn compile(schema: &Value) -> Result<Self, FlattenError> {
        let mut compiled = CompiledSchema {
            nodes: Vec::new(),
            index: HashMap::new(),
        };
        compiled.compile_node(schema, "#".to_string(), schema)?;
        Ok(compiled)
    }

    /// Node compiled at a canonical schema pointer
    pub fn node_at(&self, pointer: &str) -> Option<NodeId> {
        self.index.get(pointer).copied()
    }

    /// Canonical schema pointer of a node
    pub fn pointer(&self, node: NodeId) -> &str {
        &self.nodes[node].pointer
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validates a document without modifying it
    pub fn validate(&self, data: &Value) -> Result<(), FlattenError> {
        self.prepare(&mut data.clone())
    }

    /// Applies declared defaults, then fails with every violation found
    pub fn prepare(&self, data: &mut Value) -> Result<(), FlattenError> {
        let mut violations = Vec::new();
        let mut path = Vec::new();
        self.check(0, data, &mut path, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(FlattenError::DataValidation { violations })
        }
    }

    /// Walks a prepared document in pre-order, calling `visitor` for every node
    ///
    /// `$ref` nodes are reported as their final target. Null values and values
    /// under `true` schemas are reported but not descended into.
    pub fn visit<E, F>(&self, data: &Value, visitor: &mut F) -> Result<(), E>
    where
        F: FnMut(NodeId, &Value, &[PathSegment]) -> Result<(), E>,
    {
        let mut path = Vec::new();
        self.visit_node(0, data, &mut path, visitor)
    }

    fn compile_node(&mut self, root: &Value, pointer: String, schema: &Value) -> Result<NodeId, FlattenError> {
        if let Some(&id) = self.index.get(&pointer) {
            return Ok(id);
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            pointer: pointer.clone(),
            default: schema.get("default").cloned(),
            kind: NodeKind::Any,
        });
        self.index.insert(pointer.clone(), id);

        let kind = match schema {
            Value::Bool(true) => NodeKind::Any,
            Value::Bool(false) => NodeKind::Never,
            Value::Object(map) => match map.get("$ref").and_then(Value::as_str) {
                Some(reference) => {
                    let target = pointer::normalize_ref(reference)?;
                    let definition = pointer::lookup(root, &target).ok_or_else(|| {
                        FlattenError::schema(format!(
                            "Failed to resolve reference '{}' at '{}'",
                            reference, pointer
                        ))
                    })?;
                    NodeKind::Ref(self.compile_node(root, target, definition)?)
                }
                None => NodeKind::Schema(Box::new(self.compile_schema(root, &pointer, map)?)),
            },
            _ => {
                return Err(FlattenError::schema(format!(
                    "Schema at '{}' must be an object or a boolean",
                    pointer
                )))
            }
        };
        self.nodes[id].kind = kind;
        Ok(id)
    }

    fn compile_schema(
        &mut self,
        root: &Value,
        pointer: &str,
        map: &Map<String, Value>,
    ) -> Result<SchemaNode, FlattenError> {
        let types = match map.get("type") {
            Some(Value::String(name)) => vec![parse_type(pointer, name)?],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| parse_type(pointer, name))
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let mut properties = HashMap::new();
        let mut property_order = Vec::new();
        if let Some(declared) = map.get("properties").and_then(Value::as_object) {
            for (name, property) in declared {
                let child = self.compile_node(root, pointer::child(pointer, &["properties", name]), property)?;
                properties.insert(name.clone(), child);
                property_order.push(name.clone());
            }
        }

        let mut pattern_properties = Vec::new();
        if let Some(declared) = map.get("patternProperties").and_then(Value::as_object) {
            for (pattern, property) in declared {
                let regex = compile_pattern(pointer, pattern)?;
                let child = self.compile_node(
                    root,
                    pointer::child(pointer, &["patternProperties", pattern]),
                    property,
                )?;
                pattern_properties.push((regex, child));
            }
        }

        let additional = match map.get("additionalProperties") {
            None | Some(Value::Null) => Additional::Allowed,
            Some(Value::Bool(false)) => Additional::Forbidden,
            Some(schema) => Additional::Schema(self.compile_node(
                root,
                pointer::child(pointer, &["additionalProperties"]),
                schema,
            )?),
        };

        let items = match map.get("items") {
            None => None,
            Some(Value::Array(_)) => {
                return Err(FlattenError::schema(format!(
                    "Not supported: tuple 'items' at '{}'",
                    pointer
                )))
            }
            Some(schema) => Some(self.compile_node(root, pointer::child(pointer, &["items"]), schema)?),
        };

        Ok(SchemaNode {
            types,
            enum_values: map.get("enum").and_then(Value::as_array).cloned(),
            format: map.get("format").and_then(Value::as_str).and_then(Format::from_name),
            required: map
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default(),
            properties,
            property_order,
            pattern_properties,
            additional,
            items,
        })
    }

    /// Follows `$ref` nodes to the node that describes the value
    fn target(&self, mut node: NodeId) -> NodeId {
        // Reference chains were bounded at compile time by the pointer index,
        // a chain longer than the arena can only be a cycle
        for _ in 0..self.nodes.len() {
            match self.nodes[node].kind {
                NodeKind::Ref(next) => node = next,
                _ => return node,
            }
        }
        node
    }

    fn check(&self, node: NodeId, value: &mut Value, path: &mut Vec<PathSegment>, violations: &mut Vec<Violation>) {
        let node = self.target(node);
        let schema = match &self.nodes[node].kind {
            NodeKind::Any => return,
            NodeKind::Never => {
                violations.push(Violation::new(pointer::data_pointer(path), "boolean schema is false"));
                return;
            }
            NodeKind::Ref(_) => {
                violations.push(Violation::new(
                    pointer::data_pointer(path),
                    "circular reference in schema",
                ));
                return;
            }
            NodeKind::Schema(schema) => schema,
        };

        if !schema.types.is_empty() && !schema.types.iter().any(|t| t.matches(value)) {
            let expected: Vec<&str> = schema.types.iter().map(|t| t.to_str()).collect();
            violations.push(Violation::new(
                pointer::data_pointer(path),
                format!("must be {}", expected.join(",")),
            ));
            return;
        }

        if let Some(allowed) = &schema.enum_values {
            if !allowed.contains(value) {
                violations.push(Violation::new(
                    pointer::data_pointer(path),
                    "must be equal to one of the allowed values",
                ));
            }
        }

        match value {
            Value::String(text) => {
                if let Some(format) = schema.format {
                    if !format.matches(text) {
                        violations.push(Violation::new(
                            pointer::data_pointer(path),
                            format!("must match format \"{}\"", format.name()),
                        ));
                    }
                }
            }
            Value::Object(map) => {
                for name in &schema.property_order {
                    if map.contains_key(name) {
                        continue;
                    }
                    if let Some(default) = &self.nodes[schema.properties[name]].default {
                        map.insert(name.clone(), default.clone());
                    }
                }

                for name in &schema.required {
                    if !map.contains_key(name) {
                        violations.push(Violation::new(
                            pointer::data_pointer(path),
                            format!("must have required property '{}'", name),
                        ));
                    }
                }

                for (key, child_value) in map.iter_mut() {
                    path.push(PathSegment::Key(key.clone()));
                    match object_children(schema, key) {
                        Children::Nodes(children) => {
                            for child in children {
                                self.check(child, child_value, path, violations);
                            }
                        }
                        Children::Forbidden => {
                            path.pop();
                            violations.push(Violation::new(
                                pointer::data_pointer(path),
                                format!("must NOT have additional property '{}'", key),
                            ));
                            continue;
                        }
                    }
                    path.pop();
                }
            }
            Value::Array(items) => {
                if let Some(item_node) = schema.items {
                    for (index, item) in items.iter_mut().enumerate() {
                        path.push(PathSegment::Index(index));
                        self.check(item_node, item, path, violations);
                        path.pop();
                    }
                }
            }
            _ => {}
        }
    }

    fn visit_node<E, F>(&self, node: NodeId, value: &Value, path: &mut Vec<PathSegment>, visitor: &mut F) -> Result<(), E>
    where
        F: FnMut(NodeId, &Value, &[PathSegment]) -> Result<(), E>,
    {
        let node = self.target(node);
        visitor(node, value, path)?;

        let NodeKind::Schema(schema) = &self.nodes[node].kind else {
            return Ok(());
        };

        match value {
            Value::Object(map) => {
                for (key, child_value) in map {
                    if let Children::Nodes(children) = object_children(schema, key) {
                        path.push(PathSegment::Key(key.clone()));
                        for child in children {
                            self.visit_node(child, child_value, path, visitor)?;
                        }
                        path.pop();
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_node) = schema.items {
                    for (index, item) in items.iter().enumerate() {
                        path.push(PathSegment::Index(index));
                        self.visit_node(item_node, item, path, visitor)?;
                        path.pop();
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

enum Children {
    Nodes(Vec<NodeId>),
    Forbidden,
}

/// Schema nodes applying to one key of an object
///
/// A declared property and every matching pattern apply; `additionalProperties`
/// applies only when neither did.
fn object_children(schema: &SchemaNode, key: &str) -> Children {
    let mut children = Vec::new();
    if let Some(&child) = schema.properties.get(key) {
        children.push(child);
    }
    children.extend(
        schema
            .pattern_properties
            .iter()
            .filter(|(regex, _)| regex.is_match(key))
            .map(|(_, child)| *child),
    );
    if children.is_empty() {
        match schema.additional {
            Additional::Allowed => {}
            Additional::Forbidden => return Children::Forbidden,
            Additional::Schema(child) => children.push(child),
        }
    }
    Children::Nodes(children)
}

fn parse_type(pointer: &str, name: &str) -> Result<JsonType, FlattenError> {
    JsonType::from_name(name).ok_or_else(|| {
        FlattenError::schema(format!("Unknown type '{}' at '{}'", name, pointer))
    })
}

fn compile_pattern(pointer: &str, pattern: &str) -> Result<Regex, FlattenError> {
    Regex::new(pattern).map_err(|e| {
        FlattenError::schema(format!("Invalid pattern '{}' at '{}': {}", pattern, pointer, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violations(schema: Value, data: Value) -> Vec<String> {
        let compiled = CompiledSchema::compile(&schema).unwrap();
        match compiled.validate(&data) {
            Ok(()) => Vec::new(),
            Err(FlattenError::DataValidation { violations }) => {
                violations.iter().map(ToString::to_string).collect()
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_type_checks() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "name": {"type": ["string", "null"]}
            }
        });
        assert!(violations(schema.clone(), json!({"count": 3.0, "name": null})).is_empty());
        assert_eq!(
            violations(schema, json!({"count": 1.5, "name": 2})),
            vec!["'/count' must be integer", "'/name' must be string,null"]
        );
    }

    #[test]
    fn test_formats() {
        let schema = json!({
            "type": "object",
            "properties": {
                "day": {"type": "string", "format": "date"},
                "clock": {"type": "string", "format": "time"},
                "at": {"type": "string", "format": "date-time"},
                "epoch": {"type": "integer", "format": "timestamp"}
            }
        });
        assert!(violations(
            schema.clone(),
            json!({"day": "2020-01-31", "clock": "10:20:30Z", "at": "2020-01-31T10:20:30.5+01:00", "epoch": 1}),
        )
        .is_empty());
        assert_eq!(
            violations(schema, json!({"day": "31.01.2020", "at": "2020-01-31"})),
            vec![
                "'/day' must match format \"date\"",
                "'/at' must match format \"date-time\""
            ]
        );
    }

    #[test]
    fn test_formats_check_shape_only() {
        let schema = json!({
            "type": "object",
            "properties": {
                "day": {"type": "string", "format": "date"},
                "at": {"type": "string", "format": "date-time"}
            }
        });
        assert!(violations(schema.clone(), json!({"day": "2020-19-39", "at": "2020-02-31T10:20:30Z"})).is_empty());
        assert_eq!(
            violations(schema, json!({"day": "2020-29-01", "at": "2020-01-01T10:20:30"})),
            vec![
                "'/day' must match format \"date\"",
                "'/at' must match format \"date-time\""
            ]
        );
    }

    #[test]
    fn test_required_and_additional() {
        let schema = json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}},
            "required": ["id"],
            "additionalProperties": false
        });
        assert_eq!(
            violations(schema, json!({"extra": true})),
            vec![
                "must have required property 'id'",
                "must NOT have additional property 'extra'"
            ]
        );
    }

    #[test]
    fn test_enum_and_items() {
        let schema = json!({
            "type": "array",
            "items": {"enum": ["a", "b", null]}
        });
        assert!(violations(schema.clone(), json!(["a", null])).is_empty());
        assert_eq!(
            violations(schema, json!(["a", "c"])),
            vec!["'/1' must be equal to one of the allowed values"]
        );
    }

    #[test]
    fn test_pattern_properties_and_refs() {
        let schema = json!({
            "type": "object",
            "definitions": {"number": {"type": "number"}},
            "patternProperties": {"^n_": {"$ref": "#/definitions/number"}},
            "additionalProperties": {"type": "string"}
        });
        assert!(violations(schema.clone(), json!({"n_a": 1, "other": "x"})).is_empty());
        assert_eq!(
            violations(schema, json!({"n_a": "x", "other": 1})),
            vec!["'/n_a' must be number", "'/other' must be string"]
        );
    }

    #[test]
    fn test_prepare_applies_defaults() {
        let compiled = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer", "default": 7},
                "nested": {
                    "type": "object",
                    "properties": {"flag": {"type": "boolean", "default": false}}
                }
            },
            "required": ["id"]
        }))
        .unwrap();

        let mut data = json!({"nested": {}});
        compiled.prepare(&mut data).unwrap();
        assert_eq!(data, json!({"nested": {"flag": false}, "id": 7}));
    }

    #[test]
    fn test_visit_order_and_paths() {
        let compiled = CompiledSchema::compile(&json!({
            "type": "object",
            "definitions": {"item": {"type": "object", "properties": {"v": {"type": "integer"}}}},
            "properties": {
                "items": {"type": "array", "items": {"$ref": "#/definitions/item"}},
                "meta": {"type": "object", "additionalProperties": true}
            }
        }))
        .unwrap();

        let data = json!({"items": [{"v": 1}], "meta": {"k": null}});
        let mut seen = Vec::new();
        compiled
            .visit(&data, &mut |node, _value: &Value, path: &[PathSegment]| {
                seen.push(format!("{} {}", compiled.pointer(node), pointer::data_pointer(path)));
                Ok::<(), FlattenError>(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                "# ",
                "#/properties/items /items",
                "#/definitions/item /items/0",
                "#/definitions/item/properties/v /items/0/v",
                "#/properties/meta /meta",
                "#/properties/meta/additionalProperties /meta/k",
            ]
        );
        assert!(compiled.node_at("#/definitions/item").is_some());
        assert!(compiled.node_at("#/definitions").is_none());
    }

    #[test]
    fn test_compile_errors() {
        assert!(CompiledSchema::compile(&json!({"type": "decimal"})).is_err());
        assert!(CompiledSchema::compile(&json!({"properties": {"a": {"$ref": "#/missing"}}})).is_err());
        assert!(CompiledSchema::compile(&json!({"patternProperties": {"(": {}}})).is_err());
    }
}
