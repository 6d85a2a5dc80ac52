//! AsyncAPI 2.x specification model and normalizer.
//!
//! [`Specification`] deserializes tolerantly (absent fields default to empty
//! values), then [`Specification::process`] normalizes it: canonical name
//! derivation, reference validation, `oneOf` flattening, and correlation-id
//! schema-tree synthesis. After processing the model is ready for emission
//! and is not mutated again.

mod channel;
mod message;
pub(crate) mod schema;

pub use channel::{Channel, Operation, Parameter};
pub use message::{CorrelationId, Message};
pub use schema::{Extensions, Schema};
pub use schema::{TYPE_ARRAY, TYPE_BOOLEAN, TYPE_INTEGER, TYPE_NUMBER, TYPE_OBJECT, TYPE_STRING};

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Uppercase the first character: `pingRequest` becomes `PingRequest`.
pub fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// PascalCase identifier from a key path: `v2.issue.hello` becomes
/// `V2IssueHello`. Non-alphanumeric characters separate segments.
pub fn pascal_identifier(s: &str) -> String {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(upper_first)
        .collect()
}

/// Document metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Info {
    pub title: String,
    pub version: String,
    pub description: String,
}

/// Reusable document components addressed by `$ref`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Components {
    pub messages: BTreeMap<String, Message>,
    pub schemas: BTreeMap<String, Schema>,
    pub parameters: BTreeMap<String, Parameter>,
}

/// An AsyncAPI 2.x document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Specification {
    pub asyncapi: String,
    pub id: String,
    pub info: Info,
    #[serde(rename = "defaultContentType")]
    pub default_content_type: String,
    pub channels: BTreeMap<String, Channel>,
    pub components: Components,
}

impl Specification {
    /// Load a specification, selecting the parser from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "yaml" | "yml" => Self::from_yaml(&std::fs::read_to_string(path)?),
            "json" => Self::from_json(&std::fs::read_to_string(path)?),
            other => Err(Error::InvalidFileFormat(other.to_string())),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Look up a referenced component schema.
    pub fn reference_schema(&self, reference: &str) -> Option<&Schema> {
        schema::schema_ref_key(reference).and_then(|key| self.components.schemas.get(key))
    }

    /// Look up a referenced component message.
    pub fn reference_message(&self, reference: &str) -> Option<&Message> {
        message::message_ref_key(reference).and_then(|key| self.components.messages.get(key))
    }

    /// Look up a referenced component parameter.
    pub fn reference_parameter(&self, reference: &str) -> Option<&Parameter> {
        reference
            .strip_prefix("#/components/parameters/")
            .and_then(|key| self.components.parameters.get(key))
    }

    fn resolves(&self, reference: &str) -> bool {
        self.reference_schema(reference).is_some()
            || self.reference_message(reference).is_some()
            || self.reference_parameter(reference).is_some()
    }

    /// Every `$ref` must resolve to a node within this document.
    fn validate_references(&self) -> Result<()> {
        let mut references = Vec::new();
        for schema in self.components.schemas.values() {
            collect_schema_references(schema, &mut references);
        }
        for message in self.components.messages.values() {
            collect_message_references(message, &mut references);
        }
        for parameter in self.components.parameters.values() {
            collect_parameter_references(parameter, &mut references);
        }
        for channel in self.channels.values() {
            for parameter in channel.parameters.values() {
                collect_parameter_references(parameter, &mut references);
            }
            for operation in [&channel.subscribe, &channel.publish].into_iter().flatten() {
                if let Some(message) = &operation.message {
                    collect_message_references(message, &mut references);
                }
            }
        }
        for reference in references {
            if !self.resolves(&reference) {
                return Err(Error::InvalidSpecification(format!(
                    "unresolved reference '{reference}'"
                )));
            }
        }
        Ok(())
    }

    /// Normalize the document. Deterministic and idempotent.
    pub fn process(&mut self) -> Result<()> {
        self.validate_references()?;

        // Names first, so every reference target is fully named before any
        // merging copies it.
        for (key, schema) in &mut self.components.schemas {
            schema.process(key);
        }
        for (key, message) in &mut self.components.messages {
            message.process_names(key);
        }
        for (key, channel) in &mut self.channels {
            channel.process_names(key);
        }

        // Snapshot the named components: merging and correlation synthesis
        // resolve references by value against this snapshot while the
        // document is mutated in place.
        let messages = self.components.messages.clone();
        let schemas = self.components.schemas.clone();

        for message in self.components.messages.values_mut() {
            message.merge_one_of(&messages, &schemas)?;
            message.resolve_correlation(&messages, &schemas);
        }
        for channel in self.channels.values_mut() {
            channel.process_messages(&messages, &schemas)?;
        }
        Ok(())
    }
}

fn collect_schema_references(schema: &Schema, out: &mut Vec<String>) {
    if !schema.reference.is_empty() {
        out.push(schema.reference.clone());
    }
    for property in schema.properties.values() {
        collect_schema_references(property, out);
    }
    if let Some(items) = &schema.items {
        collect_schema_references(items, out);
    }
}

fn collect_message_references(message: &Message, out: &mut Vec<String>) {
    if !message.reference.is_empty() {
        out.push(message.reference.clone());
    }
    if let Some(headers) = &message.headers {
        collect_schema_references(headers, out);
    }
    if let Some(payload) = &message.payload {
        collect_schema_references(payload, out);
    }
    for branch in &message.one_of {
        collect_message_references(branch, out);
    }
}

fn collect_parameter_references(parameter: &Parameter, out: &mut Vec<String>) {
    if !parameter.reference.is_empty() {
        out.push(parameter.reference.clone());
    }
    if let Some(schema) = &parameter.schema {
        collect_schema_references(schema, out);
    }
}
