//! Recursive schema model and merging.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::upper_first;
use crate::error::{Error, Result};

pub const TYPE_OBJECT: &str = "object";
pub const TYPE_ARRAY: &str = "array";
pub const TYPE_STRING: &str = "string";
pub const TYPE_INTEGER: &str = "integer";
pub const TYPE_NUMBER: &str = "number";
pub const TYPE_BOOLEAN: &str = "boolean";

/// Extensions recognized by the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Verbatim Rust type substituted for the synthesized one.
    #[serde(rename = "x-rust-type", default, skip_serializing_if = "Option::is_none")]
    pub rust_type: Option<String>,
}

/// One node of the schema tree.
///
/// Deserialization is tolerant: absent fields default to empty values.
/// `name` is derived by the normalizer, never read from the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub description: String,
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, Schema>,
    pub items: Option<Box<Schema>>,
    pub required: Vec<String>,
    #[serde(rename = "$ref")]
    pub reference: String,
    #[serde(flatten)]
    pub extensions: Extensions,

    #[serde(skip)]
    pub name: String,
}

/// Component key of a schema reference, when it is one.
pub(crate) fn schema_ref_key(reference: &str) -> Option<&str> {
    reference.strip_prefix("#/components/schemas/")
}

impl Schema {
    /// Derive canonical names for this schema and its descendants.
    ///
    /// The schema takes the declaring key with its first letter uppercased;
    /// nested properties prepend the parent name, array items take the
    /// parent name suffixed with `Item`.
    pub fn process(&mut self, name: &str) {
        self.name = upper_first(name);
        let parent = self.name.clone();
        for (key, property) in &mut self.properties {
            property.process(&format!("{}{}", parent, upper_first(key)));
        }
        if let Some(items) = &mut self.items {
            items.process(&format!("{parent}Item"));
        }
    }

    /// Whether `field` appears in this schema's `required` set.
    pub fn is_field_required(&self, field: &str) -> bool {
        self.required.iter().any(|f| f == field)
    }

    /// Merge `other` into this schema, field-wise.
    ///
    /// Properties present in either side survive; a property present in both
    /// keeps its type when compatible and fails with `SchemaConflict`
    /// otherwise. References are resolved against `schemas` before merging,
    /// and merged content is always a disjoint copy.
    pub fn merge_with(&mut self, schemas: &BTreeMap<String, Schema>, other: &Schema) -> Result<()> {
        if !other.reference.is_empty() {
            if let Some(target) = schema_ref_key(&other.reference).and_then(|k| schemas.get(k)) {
                let target = target.clone();
                return self.merge_with(schemas, &target);
            }
            return Ok(());
        }

        if self.schema_type.is_empty() {
            self.schema_type = other.schema_type.clone();
        } else if !other.schema_type.is_empty() && self.schema_type != other.schema_type {
            return Err(Error::SchemaConflict {
                name: if self.name.is_empty() {
                    other.name.clone()
                } else {
                    self.name.clone()
                },
                left: self.schema_type.clone(),
                right: other.schema_type.clone(),
            });
        }

        for (key, property) in &other.properties {
            match self.properties.get_mut(key) {
                Some(existing) => existing.merge_with(schemas, property)?,
                None => {
                    self.properties.insert(key.clone(), property.clone());
                }
            }
        }

        for required in &other.required {
            if !self.required.contains(required) {
                self.required.push(required.clone());
            }
        }

        match (&mut self.items, &other.items) {
            (Some(mine), Some(theirs)) => mine.merge_with(schemas, theirs)?,
            (None, Some(theirs)) => self.items = Some(theirs.clone()),
            _ => {}
        }

        if self.extensions.rust_type.is_none() {
            self.extensions.rust_type = other.extensions.rust_type.clone();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(properties: &[(&str, Schema)], required: &[&str]) -> Schema {
        Schema {
            schema_type: TYPE_OBJECT.to_string(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            required: required.iter().map(|r| r.to_string()).collect(),
            ..Schema::default()
        }
    }

    fn scalar(schema_type: &str) -> Schema {
        Schema {
            schema_type: schema_type.to_string(),
            ..Schema::default()
        }
    }

    #[test]
    fn test_process_derives_nested_names() {
        let mut schema = object(
            &[(
                "inner",
                object(&[("leaf", scalar(TYPE_STRING))], &[]),
            )],
            &[],
        );
        schema.process("outer");

        assert_eq!(schema.name, "Outer");
        let inner = &schema.properties["inner"];
        assert_eq!(inner.name, "OuterInner");
        assert_eq!(inner.properties["leaf"].name, "OuterInnerLeaf");
    }

    #[test]
    fn test_process_names_array_items() {
        let mut schema = Schema {
            schema_type: TYPE_ARRAY.to_string(),
            items: Some(Box::new(scalar(TYPE_INTEGER))),
            ..Schema::default()
        };
        schema.process("flags");

        assert_eq!(schema.name, "Flags");
        assert_eq!(schema.items.as_ref().unwrap().name, "FlagsItem");
    }

    #[test]
    fn test_process_is_idempotent() {
        let mut schema = object(&[("inner", scalar(TYPE_STRING))], &[]);
        schema.process("outer");
        let once = schema.clone();
        schema.process("outer");
        assert_eq!(schema, once);
    }

    #[test]
    fn test_merge_unions_properties() {
        let schemas = BTreeMap::new();
        let mut left = object(&[("a", scalar(TYPE_STRING))], &["a"]);
        let right = object(&[("b", scalar(TYPE_INTEGER))], &["b"]);

        left.merge_with(&schemas, &right).unwrap();

        assert_eq!(left.properties.len(), 2);
        assert_eq!(left.properties["b"].schema_type, TYPE_INTEGER);
        assert!(left.is_field_required("a"));
        assert!(left.is_field_required("b"));
    }

    #[test]
    fn test_merge_same_property_compatible() {
        let schemas = BTreeMap::new();
        let mut left = object(&[("a", scalar(TYPE_STRING))], &[]);
        let right = object(&[("a", scalar(TYPE_STRING))], &[]);

        left.merge_with(&schemas, &right).unwrap();
        assert_eq!(left.properties.len(), 1);
    }

    #[test]
    fn test_merge_conflicting_types_fails() {
        let schemas = BTreeMap::new();
        let mut left = object(&[("a", scalar(TYPE_STRING))], &[]);
        let right = object(&[("a", scalar(TYPE_INTEGER))], &[]);

        assert!(matches!(
            left.merge_with(&schemas, &right),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn test_merge_resolves_references() {
        let mut schemas = BTreeMap::new();
        schemas.insert("Extra".to_string(), object(&[("b", scalar(TYPE_BOOLEAN))], &[]));

        let mut left = object(&[("a", scalar(TYPE_STRING))], &[]);
        let reference = Schema {
            reference: "#/components/schemas/Extra".to_string(),
            ..Schema::default()
        };

        left.merge_with(&schemas, &reference).unwrap();
        assert_eq!(left.properties["b"].schema_type, TYPE_BOOLEAN);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let schemas = BTreeMap::new();
        let mut left = object(&[("a", scalar(TYPE_STRING))], &["a"]);
        let right = object(&[("b", scalar(TYPE_INTEGER))], &[]);

        left.merge_with(&schemas, &right).unwrap();
        let once = left.clone();
        left.merge_with(&schemas, &right).unwrap();
        assert_eq!(left, once);
    }
}
