//! Compiles a nested JSON Schema into flat, relationally-linked entities
//!
//! Every object, array item and variadic (`additionalProperties` /
//! `patternProperties`) declaration becomes an entity. Required properties of
//! an entity are threaded into all of its descendants as inherited fields,
//! each carrying a [`Reference`] that tells the data flattener how many path
//! segments to ascend to find the value.

use crate::error::FlattenError;
use crate::naming::{FlatterNaming, NamingOptions};
use crate::schema::json_schema;
use crate::schema::pointer;
use crate::types::{
    Entity, EntityMap, Field, FieldType, Reference, ReferenceMode, Relation, RelationKind,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Fields threaded from ancestors into a sub-entity, keyed by field name
type InheritedFields = BTreeMap<String, Field>;

/// State of one top-level `flatten` call
struct FlattenContext<'s> {
    schema: &'s Value,
    root_name: &'s str,
    entities: EntityMap,
    /// Entities currently being flattened, outermost first
    stack: Vec<String>,
}

/// State of one entity while its definition is processed
struct EntityContext {
    origin: String,
    fields: BTreeMap<String, Field>,
    relations: BTreeMap<String, RelationKind>,
    inherited: InheritedFields,
    variadic_index: usize,
}

/// A property definition after `$ref` resolution
struct ResolvedProperty<'d> {
    name: String,
    referenced: bool,
    /// Canonical pointer of the resolved definition
    pointer: String,
    definition: &'d Value,
}

enum PropertyKind<'d> {
    Field,
    Object(ResolvedProperty<'d>),
    Array(ResolvedProperty<'d>),
}

/// Flattens schemas into a set of entities with scalar fields
#[derive(Debug, Clone, Default)]
pub struct SchemaFlattener {
    naming: FlatterNaming,
}

impl SchemaFlattener {
    pub fn new(options: NamingOptions) -> Self {
        Self::with_naming(FlatterNaming::new(options))
    }

    pub fn with_naming(naming: FlatterNaming) -> Self {
        SchemaFlattener { naming }
    }

    pub fn naming(&self) -> &FlatterNaming {
        &self.naming
    }

    /// Flattens a schema into entities, the root one named `root_name`
    pub fn flatten(&self, schema: &Value, root_name: &str) -> Result<EntityMap, FlattenError> {
        if !schema.is_object() {
            return Err(FlattenError::InvalidArgument(
                "schema must be a JSON object".to_string(),
            ));
        }
        if root_name.is_empty() {
            return Err(FlattenError::InvalidArgument(
                "root entity name must not be empty".to_string(),
            ));
        }

        let mut context = FlattenContext {
            schema,
            root_name,
            entities: EntityMap::new(),
            stack: Vec::new(),
        };
        self.flatten_entity(&mut context, root_name, "#", schema, &InheritedFields::new())?;

        debug!(
            root = root_name,
            entities = context.entities.len(),
            "flattened schema"
        );
        Ok(context.entities)
    }

    /// Flattens a schema and converts the result to a JSON Schema of the rows
    pub fn flatten_to_json_schema(&self, schema: &Value, root_name: &str) -> Result<Value, FlattenError> {
        Ok(Self::to_json_schema(&self.flatten(schema, root_name)?))
    }

    /// Builds a JSON Schema describing the rows of every entity
    pub fn to_json_schema(entities: &EntityMap) -> Value {
        json_schema::to_json_schema(entities)
    }

    fn flatten_entity<'s: 'd, 'd>(
        &self,
        context: &mut FlattenContext<'s>,
        entity_fq_name: &str,
        origin: &str,
        definition: &'d Value,
        inherited_fields: &InheritedFields,
    ) -> Result<(), FlattenError> {
        // Several references into the same definition share one entity
        if let Some(entity) = context.entities.get(entity_fq_name) {
            if entity.origin == origin {
                return Ok(());
            }
            return Err(FlattenError::schema(format!(
                "'{}' has duplicate definition at '{}', previously seen at '{}'",
                entity_fq_name, origin, entity.origin
            )));
        }

        let types = type_names(definition);
        if !types.contains(&"object") {
            return Err(FlattenError::schema(format!(
                "'{}' definition must have an 'object' type",
                entity_fq_name
            )));
        }
        let unsupported: Vec<&str> = types
            .iter()
            .copied()
            .filter(|t| *t != "object" && *t != "null")
            .collect();
        if !unsupported.is_empty() {
            return Err(FlattenError::schema(format!(
                "'{}' definition contains unsupported type(s) {}",
                entity_fq_name,
                unsupported.join(", ")
            )));
        }

        debug!(entity = entity_fq_name, origin, "flattening entity");
        context
            .entities
            .insert(entity_fq_name.to_string(), Entity::new(origin));
        context.stack.push(entity_fq_name.to_string());

        // One more pointer hop separates inherited values from this entity
        let mut inherited = inherited_fields.clone();
        for field in inherited.values_mut() {
            deepen(field, 1);
        }
        let fields = inherited.clone();

        // Descendants relate to this entity, not to the original owner
        for (name, field) in inherited.iter_mut() {
            field.relation = Some(Relation {
                entity: entity_fq_name.to_string(),
                field: name.clone(),
            });
        }

        let mut entity_context = EntityContext {
            origin: origin.to_string(),
            fields,
            relations: BTreeMap::new(),
            inherited,
            variadic_index: 0,
        };

        let mut object_properties = Vec::new();
        let mut array_properties = Vec::new();
        if let Some(properties) = definition.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                match self.classify_property(
                    context.schema,
                    &mut entity_context,
                    entity_fq_name,
                    definition,
                    name,
                    property,
                )? {
                    PropertyKind::Field => {}
                    PropertyKind::Object(resolved) => object_properties.push(resolved),
                    PropertyKind::Array(resolved) => array_properties.push(resolved),
                }
            }
        }

        if !object_properties.is_empty() {
            ensure_identifiable(entity_fq_name, &entity_context, "defined object properties")?;
            for property in object_properties {
                self.flatten_object_property(context, &mut entity_context, entity_fq_name, property)?;
            }
        }

        if !array_properties.is_empty() {
            ensure_identifiable(entity_fq_name, &entity_context, "defined array properties")?;
            for property in array_properties {
                self.flatten_array_property(context, &mut entity_context, entity_fq_name, property)?;
            }
        }

        if has_additional_properties(definition) {
            ensure_identifiable(entity_fq_name, &entity_context, "additional properties")?;
            if let Some(declaration) = definition.get("additionalProperties") {
                let declaration_pointer = pointer::child(origin, &["additionalProperties"]);
                self.flatten_variadic_properties(
                    context,
                    &mut entity_context,
                    entity_fq_name,
                    declaration_pointer,
                    declaration,
                )?;
            }
        }

        if let Some(patterns) = non_empty_object(definition, "patternProperties") {
            ensure_identifiable(entity_fq_name, &entity_context, "pattern properties")?;
            for (pattern, declaration) in patterns {
                let declaration_pointer = pointer::child(origin, &["patternProperties", pattern]);
                self.flatten_variadic_properties(
                    context,
                    &mut entity_context,
                    entity_fq_name,
                    declaration_pointer,
                    declaration,
                )?;
            }
        }

        let entity = context.entities.get_mut(entity_fq_name).ok_or_else(|| {
            FlattenError::schema(format!("'{}' vanished during flattening", entity_fq_name))
        })?;
        entity.fields = entity_context.fields;
        entity.relations = entity_context.relations;

        match context.stack.pop() {
            Some(top) if top == entity_fq_name => Ok(()),
            _ => Err(FlattenError::schema("Stack corrupted during flattening")),
        }
    }

    /// Turns a declared property into a field, or defers it as a sub-entity
    fn classify_property<'s: 'd, 'd>(
        &self,
        schema: &'s Value,
        entity_context: &mut EntityContext,
        entity_fq_name: &str,
        definition: &Value,
        name: &str,
        property: &'d Value,
    ) -> Result<PropertyKind<'d>, FlattenError> {
        let resolved = resolve_property(schema, &entity_context.origin, name, property)?;
        let property = resolved.definition;

        let types = type_names(property);
        let valid_types: Vec<&str> = types.iter().copied().filter(|t| *t != "null").collect();
        if valid_types.len() > 1 {
            return Err(FlattenError::schema(format!(
                "Not supported: '{}' of '{}' has multiple types",
                name, entity_fq_name
            )));
        }
        if valid_types.is_empty() && !types.is_empty() {
            return Err(FlattenError::schema(format!(
                "Not supported: '{}' of '{}' has unsupported type(s) {}",
                name,
                entity_fq_name,
                types.join(", ")
            )));
        }
        let primary = valid_types.first().copied();

        match primary {
            Some("object") if has_nested_structure(property) => return Ok(PropertyKind::Object(resolved)),
            Some("array") => return Ok(PropertyKind::Array(resolved)),
            _ => {}
        }

        let enum_values = property
            .get("enum")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let nullable = types.contains(&"null") || enum_values.contains(&Value::Null);

        let field_type = scalar_field_type(primary, property, enum_values).ok_or_else(|| {
            FlattenError::schema(format!(
                "Not supported: '{}' of '{}' has '{}' type",
                name,
                entity_fq_name,
                primary.unwrap_or("no")
            ))
        })?;

        let mut field = Field::new(field_type);
        field.nullable = nullable;
        field.default = property.get("default").cloned();
        field.identity = is_required(definition, name);

        if field.identity {
            // Own identity becomes a foreign key of every descendant
            let inherited_name = self.naming.get_inherited_field_name(entity_fq_name, name);
            let mut inherited = field.clone();
            inherited.reference = Some(Reference {
                depth: 0,
                entity: Some(entity_fq_name.to_string()),
                mode: ReferenceMode::ByName(name.to_string()),
            });
            inherited.relation = Some(Relation {
                entity: entity_fq_name.to_string(),
                field: name.to_string(),
            });
            entity_context.inherited.insert(inherited_name, inherited);
        }
        entity_context.fields.insert(name.to_string(), field);

        Ok(PropertyKind::Field)
    }

    fn flatten_object_property<'s: 'd, 'd>(
        &self,
        context: &mut FlattenContext<'s>,
        entity_context: &mut EntityContext,
        entity_fq_name: &str,
        property: ResolvedProperty<'d>,
    ) -> Result<(), FlattenError> {
        let subentity_fq_name = if property.referenced {
            self.referenced_entity_fq_name(context, &property.pointer)
        } else {
            self.naming.get_entity_fq_name(&[entity_fq_name, &property.name])
        };
        ensure_no_cycle(context, entity_fq_name, &subentity_fq_name, &property.name)?;

        self.flatten_entity(
            context,
            &subentity_fq_name,
            &property.pointer,
            property.definition,
            &entity_context.inherited,
        )?;
        entity_context
            .relations
            .insert(subentity_fq_name, RelationKind::OneToOne);
        Ok(())
    }

    fn flatten_array_property<'s: 'd, 'd>(
        &self,
        context: &mut FlattenContext<'s>,
        entity_context: &mut EntityContext,
        entity_fq_name: &str,
        property: ResolvedProperty<'d>,
    ) -> Result<(), FlattenError> {
        let items = match property.definition.get("items") {
            Some(Value::Array(_)) => {
                return Err(FlattenError::schema(format!(
                    "Not supported: '{}' has a tuple array in '{}' property",
                    entity_fq_name, property.name
                )))
            }
            Some(items) => items,
            None => {
                return Err(FlattenError::schema(format!(
                    "Not supported: '{}' has an array without 'items' in '{}' property",
                    entity_fq_name, property.name
                )))
            }
        };

        let schema = context.schema;
        let (item_pointer, item_definition, referenced): (String, &'d Value, bool) =
            match items.get("$ref").and_then(Value::as_str) {
                Some(reference) => {
                    let (item_pointer, item_definition) =
                        pointer::resolve(schema, &pointer::normalize_ref(reference)?)?;
                    (item_pointer, item_definition, true)
                }
                None => (pointer::child(&property.pointer, &["items"]), items, false),
            };

        let subentity_fq_name = if referenced {
            self.referenced_entity_fq_name(context, &item_pointer)
        } else {
            self.naming.get_entity_fq_name(&[
                entity_fq_name,
                &self.naming.get_array_field_name(&property.name),
            ])
        };
        ensure_no_cycle(context, entity_fq_name, &subentity_fq_name, &property.name)?;

        let generated = if has_nested_structure(item_definition) {
            None
        } else {
            Some(self.generate_array_item_definition(item_definition))
        };

        // The array index adds one more segment between owner and item
        let mut inherited = entity_context.inherited.clone();
        for field in inherited.values_mut() {
            deepen(field, 1);
        }

        self.flatten_entity(
            context,
            &subentity_fq_name,
            &item_pointer,
            generated.as_ref().unwrap_or(item_definition),
            &inherited,
        )?;
        if generated.is_some() {
            set_reference(
                context,
                &subentity_fq_name,
                &self.naming.get_array_item_value_field_name(),
                Reference::new(0, ReferenceMode::AncestorValue),
            )?;
        }

        entity_context
            .relations
            .insert(subentity_fq_name, RelationKind::OneToMany);
        Ok(())
    }

    /// Flattens one `additionalProperties` or `patternProperties` declaration
    fn flatten_variadic_properties<'s: 'd, 'd>(
        &self,
        context: &mut FlattenContext<'s>,
        entity_context: &mut EntityContext,
        entity_fq_name: &str,
        declaration_pointer: String,
        declaration: &'d Value,
    ) -> Result<(), FlattenError> {
        let schema = context.schema;
        let (declaration_pointer, declaration, referenced): (String, &'d Value, bool) =
            match declaration.get("$ref").and_then(Value::as_str) {
                Some(reference) => {
                    let (resolved_pointer, resolved) =
                        pointer::resolve(schema, &pointer::normalize_ref(reference)?)?;
                    (resolved_pointer, resolved, true)
                }
                None => (declaration_pointer, declaration, false),
            };

        let subentity_fq_name = if referenced {
            self.referenced_entity_fq_name(context, &declaration_pointer)
        } else {
            let index = entity_context.variadic_index;
            entity_context.variadic_index += 1;
            self.naming
                .get_variadic_properties_entity_fq_name(entity_fq_name, index)
        };
        if entity_fq_name == subentity_fq_name || context.stack.contains(&subentity_fq_name) {
            return Err(FlattenError::schema(format!(
                "Not supported: '{}' has a relation to itself via variadic property",
                entity_fq_name
            )));
        }

        let value_generated = !has_nested_structure(declaration);
        let definition = if value_generated {
            self.generate_variadic_properties_definition(declaration)
        } else {
            self.with_variadic_key_property(declaration)
        };

        self.flatten_entity(
            context,
            &subentity_fq_name,
            &declaration_pointer,
            &definition,
            &entity_context.inherited,
        )?;

        let key_field_name = self.naming.get_variadic_properties_key_field_name();
        set_reference(
            context,
            &subentity_fq_name,
            &key_field_name,
            Reference::new(0, ReferenceMode::FieldName),
        )?;
        if value_generated {
            set_reference(
                context,
                &subentity_fq_name,
                &self.naming.get_variadic_properties_value_field_name(),
                Reference::new(0, ReferenceMode::AncestorValue),
            )?;
        }

        // Descendants copied the key by field name, but it only exists as a path segment
        for entity in context.entities.values_mut() {
            for field in entity.fields.values_mut() {
                let Some(reference) = field.reference.as_mut() else {
                    continue;
                };
                let copies_key = reference.entity.as_deref() == Some(subentity_fq_name.as_str())
                    && matches!(&reference.mode, ReferenceMode::ByName(name) if *name == key_field_name);
                if copies_key {
                    reference.mode = ReferenceMode::FieldName;
                }
            }
        }

        entity_context
            .relations
            .insert(subentity_fq_name, RelationKind::OneToMany);
        Ok(())
    }

    fn referenced_entity_fq_name(&self, context: &FlattenContext<'_>, definition_pointer: &str) -> String {
        let entity_name = self.naming.pointer_to_entity_name(definition_pointer);
        self.naming
            .get_entity_fq_name(&[context.root_name, entity_name.as_str()])
    }

    /// Wraps a scalar item schema into an object with a single value field
    fn generate_array_item_definition(&self, item: &Value) -> Value {
        let mut properties = Map::new();
        properties.insert(
            self.naming.get_array_item_value_field_name(),
            Value::Object(value_definition(item, false)),
        );
        json!({
            "type": "object",
            "properties": properties,
        })
    }

    /// Key/value wrapper for a variadic declaration without nested structure
    fn generate_variadic_properties_definition(&self, declaration: &Value) -> Value {
        let key = self.naming.get_variadic_properties_key_field_name();
        let mut properties = Map::new();
        properties.insert(key.clone(), json!({"type": "string"}));
        properties.insert(
            self.naming.get_variadic_properties_value_field_name(),
            Value::Object(value_definition(declaration, true)),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": [key],
        })
    }

    /// Adds the required key property to a structured variadic declaration
    fn with_variadic_key_property(&self, declaration: &Value) -> Value {
        let key = self.naming.get_variadic_properties_key_field_name();
        let mut definition = declaration.clone();
        if let Value::Object(map) = &mut definition {
            let properties = map
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(properties) = properties {
                properties.insert(key.clone(), json!({"type": "string"}));
            }
            let required = map
                .entry("required")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(required) = required {
                required.push(Value::String(key));
            }
        }
        definition
    }
}

fn resolve_property<'s: 'd, 'd>(
    schema: &'s Value,
    origin: &str,
    name: &str,
    property: &'d Value,
) -> Result<ResolvedProperty<'d>, FlattenError> {
    match property.get("$ref").and_then(Value::as_str) {
        Some(reference) => {
            let (resolved_pointer, definition) =
                pointer::resolve(schema, &pointer::normalize_ref(reference)?)?;
            Ok(ResolvedProperty {
                name: name.to_string(),
                referenced: true,
                pointer: resolved_pointer,
                definition,
            })
        }
        None => Ok(ResolvedProperty {
            name: name.to_string(),
            referenced: false,
            pointer: pointer::child(origin, &["properties", name]),
            definition: property,
        }),
    }
}

/// Value schema of a generated wrapper, keeping type, enum and format
fn value_definition(source: &Value, default_to_json: bool) -> Map<String, Value> {
    let mut definition = Map::new();
    let field_type = source.get("type").cloned();
    let enum_values = source.get("enum").cloned();
    match (field_type, &enum_values) {
        (Some(field_type), _) => {
            definition.insert("type".to_string(), field_type);
        }
        (None, None) if default_to_json => {
            definition.insert("type".to_string(), json!(["object", "null"]));
        }
        _ => {}
    }
    if let Some(enum_values) = enum_values {
        definition.insert("enum".to_string(), enum_values);
    }
    if let Some(format) = source.get("format") {
        definition.insert("format".to_string(), format.clone());
    }
    definition
}

fn scalar_field_type(primary: Option<&str>, property: &Value, enum_values: Vec<Value>) -> Option<FieldType> {
    if !enum_values.is_empty() {
        return Some(FieldType::Enum {
            values: enum_values.into_iter().filter(|v| !v.is_null()).collect(),
        });
    }

    let format = property.get("format").and_then(Value::as_str);
    match primary? {
        "string" => Some(match format {
            Some("date-time") => FieldType::Datetime,
            Some("date") => FieldType::Date,
            Some("time") => FieldType::Time,
            _ => FieldType::String,
        }),
        "integer" => Some(match format {
            Some("timestamp") => FieldType::Timestamp,
            _ => FieldType::Integer,
        }),
        "boolean" => Some(FieldType::Boolean),
        "number" => Some(FieldType::Number),
        "object" => Some(FieldType::Json),
        _ => None,
    }
}

fn type_names(definition: &Value) -> Vec<&str> {
    match definition.get("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn is_required(definition: &Value, name: &str) -> bool {
    definition
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|required| required.iter().any(|r| r.as_str() == Some(name)))
}

fn non_empty_object<'a>(definition: &'a Value, keyword: &str) -> Option<&'a Map<String, Value>> {
    definition
        .get(keyword)
        .and_then(Value::as_object)
        .filter(|map| !map.is_empty())
}

fn has_additional_properties(definition: &Value) -> bool {
    !matches!(
        definition.get("additionalProperties"),
        None | Some(Value::Null) | Some(Value::Bool(false))
    )
}

/// True if the definition declares anything that becomes a sub-entity
pub(crate) fn has_nested_structure(definition: &Value) -> bool {
    non_empty_object(definition, "properties").is_some()
        || has_additional_properties(definition)
        || non_empty_object(definition, "patternProperties").is_some()
}

fn deepen(field: &mut Field, levels: usize) {
    if let Some(reference) = field.reference.as_mut() {
        reference.depth += levels;
    }
}

fn ensure_identifiable(
    entity_fq_name: &str,
    entity_context: &EntityContext,
    what: &str,
) -> Result<(), FlattenError> {
    if entity_context.inherited.is_empty() {
        return Err(FlattenError::schema(format!(
            "Instance of '{}' is not identifiable and can not have {}",
            entity_fq_name, what
        )));
    }
    Ok(())
}

fn ensure_no_cycle(
    context: &FlattenContext<'_>,
    entity_fq_name: &str,
    subentity_fq_name: &str,
    property_name: &str,
) -> Result<(), FlattenError> {
    let in_progress = context.stack.iter().any(|name| name == subentity_fq_name);
    if entity_fq_name == subentity_fq_name || in_progress {
        return Err(FlattenError::schema(format!(
            "Not supported: '{}' has a relation to itself via '{}' property",
            entity_fq_name, property_name
        )));
    }
    Ok(())
}

fn set_reference(
    context: &mut FlattenContext<'_>,
    entity_fq_name: &str,
    field_name: &str,
    reference: Reference,
) -> Result<(), FlattenError> {
    let field = context
        .entities
        .get_mut(entity_fq_name)
        .and_then(|entity| entity.fields.get_mut(field_name))
        .ok_or_else(|| {
            FlattenError::schema(format!(
                "'{}' is missing generated field '{}'",
                entity_fq_name, field_name
            ))
        })?;
    field.reference = Some(reference);
    Ok(())
}
