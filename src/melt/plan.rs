//! Schema-derived flatten plans
//!
//! A [`FlattenPlan`] is the minimal projection of flattened entities needed
//! while walking documents: for each schema location that yields rows, the
//! entity it feeds and how to resolve every field.

use crate::types::{EntityMap, Reference};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// How one field value of a row is obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDeclaration {
    /// Ancestor location of the value; `None` reads the current object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Row construction rule attached to one schema location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenDeclaration {
    /// Entity receiving the rows
    pub entity: String,

    /// Fields of each row, in column order
    pub fields: BTreeMap<String, FieldDeclaration>,
}

/// Declarations of all entities keyed by their schema origin
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlattenPlan {
    pub declarations: BTreeMap<String, FlattenDeclaration>,
}

impl FlattenPlan {
    /// Builds the plan from flattened entities
    pub fn from_entities(entities: &EntityMap) -> Self {
        let declarations = entities
            .iter()
            .map(|(name, entity)| {
                let fields = entity
                    .fields
                    .iter()
                    .map(|(field_name, field)| {
                        (
                            field_name.clone(),
                            FieldDeclaration {
                                reference: field.reference.clone(),
                                nullable: field.nullable,
                                default: field.default.clone(),
                            },
                        )
                    })
                    .collect();
                (
                    entity.origin.clone(),
                    FlattenDeclaration {
                        entity: name.clone(),
                        fields,
                    },
                )
            })
            .collect();

        FlattenPlan { declarations }
    }

    /// Declaration attached to a schema location
    pub fn declaration_at(&self, origin: &str) -> Option<&FlattenDeclaration> {
        self.declarations.get(origin)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
