//! Naming of flattened entities and generated fields
//!
//! Both the schema flattener and the data flattener derive every entity and
//! generated field name through [`FlatterNaming`], so the names they produce
//! agree as long as they share the same [`NamingOptions`].

use serde::{Deserialize, Serialize};

/// Configuration of generated names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamingOptions {
    /// Separator between entity name components
    pub path_separator: String,

    /// Prefix of generated fields
    pub generated_field_prefix: String,

    /// Stand-in for array indices and anonymous variadic declarations
    pub placeholder: String,

    /// Separator between owning entity and property in inherited field names
    pub scope_specifier: String,
}

impl Default for NamingOptions {
    fn default() -> Self {
        NamingOptions {
            path_separator: String::from("/"),
            generated_field_prefix: String::from("$"),
            placeholder: String::from("@"),
            scope_specifier: String::from("~"),
        }
    }
}

/// Generates entity and field names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatterNaming {
    options: NamingOptions,
}

impl FlatterNaming {
    pub fn new(options: NamingOptions) -> Self {
        FlatterNaming { options }
    }

    pub fn options(&self) -> NamingOptions {
        self.options.clone()
    }

    pub fn path_separator(&self) -> &str {
        &self.options.path_separator
    }

    pub fn generated_field_prefix(&self) -> &str {
        &self.options.generated_field_prefix
    }

    pub fn placeholder(&self) -> &str {
        &self.options.placeholder
    }

    pub fn scope_specifier(&self) -> &str {
        &self.options.scope_specifier
    }

    /// Converts a JSON Pointer to an entity name
    ///
    /// Trailing array indices are replaced with the placeholder and kept together
    /// with the last named segment, e.g. `#/definitions/items/0` gives `items/@`.
    pub fn pointer_to_entity_name(&self, pointer: &str) -> String {
        let components = pointer_components(pointer);
        if components.is_empty() {
            return String::new();
        }

        let start = components
            .iter()
            .rposition(|component| !is_index(component))
            .unwrap_or(0);

        components[start..]
            .iter()
            .map(|component| self.replace_index(component))
            .collect::<Vec<_>>()
            .join(&self.options.path_separator)
    }

    /// Converts a whole JSON Pointer to a fully-qualified entity name
    pub fn pointer_to_entity_fq_name(&self, pointer: &str) -> String {
        pointer_components(pointer)
            .iter()
            .map(|component| self.replace_index(component))
            .collect::<Vec<_>>()
            .join(&self.options.path_separator)
    }

    /// Joins entity name components
    pub fn get_entity_fq_name<S: AsRef<str>>(&self, components: &[S]) -> String {
        components
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&self.options.path_separator)
    }

    /// Name of the entity holding the n-th anonymous variadic declaration of an entity
    pub fn get_variadic_properties_entity_fq_name(&self, entity_fq_name: &str, index: usize) -> String {
        format!("{}[{}{}]", entity_fq_name, self.options.placeholder, index)
    }

    /// Name of the field a descendant uses to reference a property of an ancestor
    pub fn get_inherited_field_name(&self, entity_name: &str, property_name: &str) -> String {
        format!(
            "{}{}{}{}",
            self.options.generated_field_prefix, entity_name, self.options.scope_specifier, property_name
        )
    }

    /// Entity name suffix for array items
    pub fn get_array_field_name(&self, property_name: &str) -> String {
        format!("{}[{}]", property_name, self.options.placeholder)
    }

    pub fn get_variadic_properties_key_field_name(&self) -> String {
        format!("{}property", self.options.generated_field_prefix)
    }

    pub fn get_variadic_properties_value_field_name(&self) -> String {
        format!("{}value", self.options.generated_field_prefix)
    }

    pub fn get_array_item_value_field_name(&self) -> String {
        format!("{}value", self.options.generated_field_prefix)
    }

    fn replace_index<'a>(&'a self, component: &'a str) -> &'a str {
        if is_index(component) {
            &self.options.placeholder
        } else {
            component
        }
    }
}

fn pointer_components(pointer: &str) -> Vec<&str> {
    let trimmed = pointer.strip_prefix('#').unwrap_or(pointer);
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

fn is_index(component: &str) -> bool {
    !component.is_empty() && component.bytes().all(|b| b.is_ascii_digit())
}
