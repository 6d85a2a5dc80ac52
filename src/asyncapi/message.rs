//! Message model: `oneOf` flattening and correlation-id tree synthesis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::schema::{schema_ref_key, Schema, TYPE_OBJECT, TYPE_STRING};
use crate::error::Result;

/// Correlation id declaration: a runtime expression of the form
/// `$message.header#/<path>` or `$message.payload#/<path>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationId {
    pub description: String,
    pub location: String,
}

/// A message as declared by the document, plus fields derived by the
/// normalizer (`name`, `correlation_id_location`, `correlation_id_required`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub description: String,
    pub headers: Option<Schema>,
    #[serde(rename = "oneOf")]
    pub one_of: Vec<Message>,
    pub payload: Option<Schema>,
    #[serde(rename = "correlationId")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(rename = "$ref")]
    pub reference: String,

    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub correlation_id_location: String,
    #[serde(skip)]
    pub correlation_id_required: bool,
}

/// Component key of a message reference, when it is one.
pub(crate) fn message_ref_key(reference: &str) -> Option<&str> {
    reference.strip_prefix("#/components/messages/")
}

impl Message {
    /// Derive canonical names for the message and its schema trees.
    ///
    /// `oneOf` branches are named `<name>0`, `<name>1`, ... before merging.
    pub fn process_names(&mut self, name: &str) {
        self.name = super::upper_first(name);
        if let Some(headers) = &mut self.headers {
            headers.process(&format!("{name}Headers"));
        }
        if let Some(payload) = &mut self.payload {
            payload.process(&format!("{name}Payload"));
        }
        for (index, branch) in self.one_of.iter_mut().enumerate() {
            branch.process_names(&format!("{name}{index}"));
        }
    }

    /// Flatten `oneOf` branches into this message as a superset.
    ///
    /// After merging, the message behaves as a single message whose payload
    /// and headers carry every branch's fields; incompatible same-named
    /// fields fail with `SchemaConflict`.
    pub fn merge_one_of(
        &mut self,
        messages: &BTreeMap<String, Message>,
        schemas: &BTreeMap<String, Schema>,
    ) -> Result<()> {
        let branches = self.one_of.clone();
        for branch in &branches {
            self.merge_with(messages, schemas, branch)?;
        }
        // The merged superset takes this message's name, not a branch's.
        if !branches.is_empty() {
            let name = self.name.clone();
            if let Some(headers) = &mut self.headers {
                headers.process(&format!("{name}Headers"));
            }
            if let Some(payload) = &mut self.payload {
                payload.process(&format!("{name}Payload"));
            }
        }
        Ok(())
    }

    /// Merge another message into this one. Merged content is always a
    /// disjoint copy; the referenced originals are never aliased or altered.
    pub fn merge_with(
        &mut self,
        messages: &BTreeMap<String, Message>,
        schemas: &BTreeMap<String, Schema>,
        other: &Message,
    ) -> Result<()> {
        // Merging dissolves this message's own reference first.
        if !self.reference.is_empty() {
            let reference = std::mem::take(&mut self.reference);
            if let Some(target) = message_ref_key(&reference).and_then(|k| messages.get(k)) {
                let target = target.clone();
                self.merge_with(messages, schemas, &target)?;
            }
        }

        let mut other = other.clone();
        if !other.reference.is_empty() {
            let reference = std::mem::take(&mut other.reference);
            if let Some(target) = message_ref_key(&reference).and_then(|k| messages.get(k)) {
                let target = target.clone();
                other.merge_with(messages, schemas, &target)?;
            }
        }

        if let Some(other_payload) = &other.payload {
            match &mut self.payload {
                Some(payload) => payload.merge_with(schemas, other_payload)?,
                None => self.payload = Some(other_payload.clone()),
            }
        }
        if let Some(other_headers) = &other.headers {
            match &mut self.headers {
                Some(headers) => headers.merge_with(schemas, other_headers)?,
                None => self.headers = Some(other_headers.clone()),
            }
        }
        Ok(())
    }

    /// Derive the correlation id location (falling back to the referenced
    /// message), synthesize the schema tree down to its leaf, and compute
    /// whether the id is required.
    pub fn resolve_correlation(
        &mut self,
        messages: &BTreeMap<String, Message>,
        schemas: &BTreeMap<String, Schema>,
    ) {
        self.correlation_id_location = match &self.correlation_id {
            Some(correlation) if !correlation.location.is_empty() => correlation.location.clone(),
            _ => message_ref_key(&self.reference)
                .and_then(|k| messages.get(k))
                .and_then(|m| m.correlation_id.as_ref())
                .map(|c| c.location.clone())
                .unwrap_or_default(),
        };
        if self.correlation_id_location.is_empty() {
            self.correlation_id_required = false;
            return;
        }
        self.ensure_correlation_tree(schemas);
        self.correlation_id_required = self.correlation_parent_required();
    }

    /// Create missing schema nodes along the correlation path: intermediate
    /// nodes are objects, the leaf is a string. Existing nodes are kept.
    fn ensure_correlation_tree(&mut self, schemas: &BTreeMap<String, Schema>) {
        let location = self.correlation_id_location.clone();
        let Some((root, fragment)) = location.split_once("#/") else {
            return;
        };
        let name = self.name.clone();
        let (placeholder, default_name) = match root {
            "$message.header" => (&mut self.headers, format!("{name}Headers")),
            "$message.payload" => (&mut self.payload, format!("{name}Payload")),
            _ => return,
        };

        let top = placeholder.get_or_insert_with(|| Schema {
            schema_type: TYPE_OBJECT.to_string(),
            name: default_name,
            ..Schema::default()
        });

        // A referenced top-level schema is materialized locally so the path
        // can be synthesized without touching the shared component.
        if !top.reference.is_empty() {
            if let Some(target) = schema_ref_key(&top.reference).and_then(|k| schemas.get(k)) {
                let name = std::mem::take(&mut top.name);
                *top = target.clone();
                top.name = name;
            }
        }

        let segments: Vec<&str> = fragment.split('/').collect();
        let mut node: &mut Schema = top;
        for (index, segment) in segments.iter().enumerate() {
            let is_leaf = index == segments.len() - 1;
            node = node
                .properties
                .entry((*segment).to_string())
                .or_insert_with(|| Schema {
                    schema_type: if is_leaf { TYPE_STRING } else { TYPE_OBJECT }.to_string(),
                    name: (*segment).to_string(),
                    ..Schema::default()
                });
        }
    }

    /// Whether the leaf's immediate parent lists it as required.
    fn correlation_parent_required(&self) -> bool {
        let Some((root, fragment)) = self.correlation_id_location.split_once("#/") else {
            return false;
        };
        let top = match root {
            "$message.header" => self.headers.as_ref(),
            "$message.payload" => self.payload.as_ref(),
            _ => None,
        };
        let Some(mut node) = top else {
            return false;
        };
        let segments: Vec<&str> = fragment.split('/').collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return false;
        };
        for segment in parents {
            match node.properties.get(*segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.is_field_required(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asyncapi::schema::TYPE_INTEGER;

    fn no_components() -> (BTreeMap<String, Message>, BTreeMap<String, Schema>) {
        (BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn test_correlation_tree_synthesized_in_headers() {
        let (messages, schemas) = no_components();
        let mut message = Message {
            correlation_id: Some(CorrelationId {
                location: "$message.header#/correlationId".to_string(),
                ..CorrelationId::default()
            }),
            ..Message::default()
        };
        message.process_names("ping");
        message.resolve_correlation(&messages, &schemas);

        let headers = message.headers.as_ref().expect("headers synthesized");
        assert_eq!(headers.schema_type, TYPE_OBJECT);
        assert_eq!(headers.properties["correlationId"].schema_type, TYPE_STRING);
        assert!(!message.correlation_id_required);
    }

    #[test]
    fn test_correlation_tree_creates_intermediate_objects() {
        let (messages, schemas) = no_components();
        let mut message = Message {
            correlation_id: Some(CorrelationId {
                location: "$message.payload#/meta/tracking/id".to_string(),
                ..CorrelationId::default()
            }),
            ..Message::default()
        };
        message.process_names("order");
        message.resolve_correlation(&messages, &schemas);

        let payload = message.payload.as_ref().expect("payload synthesized");
        let meta = &payload.properties["meta"];
        assert_eq!(meta.schema_type, TYPE_OBJECT);
        let tracking = &meta.properties["tracking"];
        assert_eq!(tracking.schema_type, TYPE_OBJECT);
        assert_eq!(tracking.properties["id"].schema_type, TYPE_STRING);
    }

    #[test]
    fn test_correlation_tree_keeps_existing_nodes() {
        let (messages, schemas) = no_components();
        let mut payload = Schema {
            schema_type: TYPE_OBJECT.to_string(),
            ..Schema::default()
        };
        payload.properties.insert(
            "other".to_string(),
            Schema {
                schema_type: TYPE_INTEGER.to_string(),
                ..Schema::default()
            },
        );
        let mut message = Message {
            payload: Some(payload),
            correlation_id: Some(CorrelationId {
                location: "$message.payload#/id".to_string(),
                ..CorrelationId::default()
            }),
            ..Message::default()
        };
        message.process_names("ping");
        message.resolve_correlation(&messages, &schemas);

        let payload = message.payload.as_ref().unwrap();
        assert_eq!(payload.properties["other"].schema_type, TYPE_INTEGER);
        assert_eq!(payload.properties["id"].schema_type, TYPE_STRING);
    }

    #[test]
    fn test_correlation_required_follows_parent_required() {
        let (messages, schemas) = no_components();
        let mut message = Message {
            headers: Some(Schema {
                schema_type: TYPE_OBJECT.to_string(),
                required: vec!["correlationId".to_string()],
                ..Schema::default()
            }),
            correlation_id: Some(CorrelationId {
                location: "$message.header#/correlationId".to_string(),
                ..CorrelationId::default()
            }),
            ..Message::default()
        };
        message.process_names("ping");
        message.resolve_correlation(&messages, &schemas);

        assert!(message.correlation_id_required);
    }

    #[test]
    fn test_one_of_merge_is_superset() {
        let (messages, schemas) = no_components();
        let branch = |key: &str| Message {
            payload: Some(Schema {
                schema_type: TYPE_OBJECT.to_string(),
                properties: [(
                    key.to_string(),
                    Schema {
                        schema_type: TYPE_STRING.to_string(),
                        ..Schema::default()
                    },
                )]
                .into_iter()
                .collect(),
                ..Schema::default()
            }),
            ..Message::default()
        };

        let mut message = Message {
            one_of: vec![branch("first"), branch("second")],
            ..Message::default()
        };
        message.process_names("event");
        message.merge_one_of(&messages, &schemas).unwrap();

        let payload = message.payload.as_ref().expect("merged payload");
        assert!(payload.properties.contains_key("first"));
        assert!(payload.properties.contains_key("second"));
        assert_eq!(message.one_of[0].name, "Event0");
        assert_eq!(message.one_of[1].name, "Event1");
    }

    #[test]
    fn test_correlation_location_falls_back_to_reference() {
        let mut messages = BTreeMap::new();
        messages.insert(
            "ping".to_string(),
            Message {
                correlation_id: Some(CorrelationId {
                    location: "$message.header#/correlationId".to_string(),
                    ..CorrelationId::default()
                }),
                ..Message::default()
            },
        );
        let schemas = BTreeMap::new();

        let mut message = Message {
            reference: "#/components/messages/ping".to_string(),
            ..Message::default()
        };
        message.process_names("ping");
        message.resolve_correlation(&messages, &schemas);

        assert_eq!(
            message.correlation_id_location,
            "$message.header#/correlationId"
        );
    }
}
