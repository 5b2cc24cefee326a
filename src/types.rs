use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flattened entities keyed by fully-qualified entity name
pub type EntityMap = BTreeMap<String, Entity>;

/// One flattened record - a flat object keyed by field name
pub type Row = Map<String, Value>;

/// Rows collected from one document, keyed by entity name
pub type FlattenedRows = BTreeMap<String, Vec<Row>>;

/// Output chunk of the stream adapter, keyed by entity name
pub type Flattened = BTreeMap<String, FlattenedEntity>;

/// A flattened record type - represents one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// JSON Pointer to the schema node this entity was derived from
    pub origin: String,

    /// Columns of this entity
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Field>,

    /// Related (owned) entities
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, RelationKind>,
}

impl Entity {
    pub fn new(origin: impl Into<String>) -> Self {
        Entity {
            origin: origin.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Names of the fields forming the minimal key of an instance
    pub fn identity_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.identity)
            .map(|(name, _)| name.as_str())
    }
}

/// Kind of relation between an owning entity and an owned one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    OneToOne,
    OneToMany,
}

/// Column type of a flattened field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Integer,
    Number,
    String,
    Date,
    Time,
    Datetime,
    Timestamp,
    Enum {
        #[serde(rename = "enum")]
        values: Vec<Value>,
    },
    Json,
}

/// A column of a flattened entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(flatten)]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Part of the minimal key identifying an instance
    #[serde(default, skip_serializing_if = "is_false")]
    pub identity: bool,

    /// How to recover the value from an ancestor location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,

    /// Owning entity and field, if this field realizes a relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

impl Field {
    pub fn new(field_type: FieldType) -> Self {
        Field {
            field_type,
            nullable: false,
            default: None,
            identity: false,
            reference: None,
            relation: None,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// How a referenced value is picked once the ancestor location is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Read the named property of the ancestor
    ByName(String),
    /// Use the ancestor value itself
    AncestorValue,
    /// Use the name of the path segment at the ancestor location
    FieldName,
}

/// Field value resolution rule relative to the current data location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawReference", try_from = "RawReference")]
pub struct Reference {
    /// Number of JSON Pointer segments to ascend
    pub depth: usize,
    /// Entity the value was copied from
    pub entity: Option<String>,
    pub mode: ReferenceMode,
}

impl Reference {
    pub fn new(depth: usize, mode: ReferenceMode) -> Self {
        Reference {
            depth,
            entity: None,
            mode,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReference {
    #[serde(default, skip_serializing_if = "is_zero")]
    depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field_name: Option<bool>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl From<Reference> for RawReference {
    fn from(reference: Reference) -> Self {
        let (field, field_name) = match reference.mode {
            ReferenceMode::ByName(name) => (Some(name), None),
            ReferenceMode::AncestorValue => (Some(String::new()), None),
            ReferenceMode::FieldName => (None, Some(true)),
        };
        RawReference {
            depth: reference.depth,
            entity: reference.entity,
            field,
            field_name,
        }
    }
}

impl TryFrom<RawReference> for Reference {
    type Error = String;

    fn try_from(raw: RawReference) -> Result<Self, Self::Error> {
        let mode = match (raw.field_name, raw.field) {
            (Some(true), _) => ReferenceMode::FieldName,
            (_, Some(field)) if field.is_empty() => ReferenceMode::AncestorValue,
            (_, Some(field)) => ReferenceMode::ByName(field),
            _ => return Err("reference must specify 'field' or 'fieldName'".to_string()),
        };
        Ok(Reference {
            depth: raw.depth,
            entity: raw.entity,
            mode,
        })
    }
}

/// Owning side of a relation realized by a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub entity: String,
    pub field: String,
}

/// Rows of one entity together with its flattened definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub data: Vec<Row>,
    pub metadata: Entity,
}

/// Rows of one entity in a stream chunk, bare or wrapped with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlattenedEntity {
    WithMetadata(EntityData),
    Rows(Vec<Row>),
}

impl FlattenedEntity {
    pub fn rows(&self) -> &[Row] {
        match self {
            FlattenedEntity::WithMetadata(wrapped) => &wrapped.data,
            FlattenedEntity::Rows(rows) => rows,
        }
    }

    pub fn metadata(&self) -> Option<&Entity> {
        match self {
            FlattenedEntity::WithMetadata(wrapped) => Some(&wrapped.metadata),
            FlattenedEntity::Rows(_) => None,
        }
    }
}
