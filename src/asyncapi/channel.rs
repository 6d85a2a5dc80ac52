//! Channels, operations and parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::{message_ref_key, Message};
use super::schema::Schema;
use super::{pascal_identifier, upper_first};
use crate::error::Result;

/// A schema-typed slot bound to a `{placeholder}` in the channel address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    pub description: String,
    pub schema: Option<Schema>,
    pub location: String,
    #[serde(rename = "$ref")]
    pub reference: String,

    #[serde(skip)]
    pub name: String,
}

/// One side of a channel: what can be received or sent on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Operation {
    #[serde(rename = "operationId")]
    pub operation_id: String,
    pub message: Option<Message>,
}

/// A logical topic on the broker. The declaring key is the address; both an
/// identifier (`name`) and the address are derived by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub description: String,
    pub subscribe: Option<Operation>,
    pub publish: Option<Operation>,
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(skip)]
    pub address: String,
    #[serde(skip)]
    pub name: String,
}

impl Channel {
    /// Derive the channel identifier and name inline content.
    pub(crate) fn process_names(&mut self, key: &str) {
        self.address = key.to_string();
        self.name = pascal_identifier(key);

        for (parameter_key, parameter) in &mut self.parameters {
            parameter.name = upper_first(parameter_key);
            if let Some(schema) = &mut parameter.schema {
                schema.process(parameter_key);
            }
        }

        for operation in [&mut self.subscribe, &mut self.publish]
            .into_iter()
            .flatten()
        {
            if let Some(message) = &mut operation.message {
                // Inline messages take the channel as their declaring key;
                // referenced messages keep the component's name.
                if message.reference.is_empty() {
                    message.process_names(&self.name);
                }
            }
        }
    }

    /// Every declared parameter must have a `{name}` token in the address.
    fn validate_parameters(&self) -> Result<()> {
        let tokens = self.address_parameters();
        for key in self.parameters.keys() {
            if !tokens.iter().any(|t| t == key) {
                return Err(crate::error::Error::InvalidSpecification(format!(
                    "parameter '{key}' has no placeholder in channel address '{}'",
                    self.address
                )));
            }
        }
        Ok(())
    }

    /// Resolve referenced messages, flatten `oneOf`, synthesize correlation
    /// trees. Runs against a snapshot of the processed components.
    pub(crate) fn process_messages(
        &mut self,
        messages: &BTreeMap<String, Message>,
        schemas: &BTreeMap<String, Schema>,
    ) -> Result<()> {
        self.validate_parameters()?;
        for operation in [&mut self.subscribe, &mut self.publish]
            .into_iter()
            .flatten()
        {
            if let Some(message) = &mut operation.message {
                if !message.reference.is_empty() {
                    if let Some(target) =
                        message_ref_key(&message.reference).and_then(|k| messages.get(k))
                    {
                        // Adopt the component message by value; the original
                        // `$ref` string is kept for debugging.
                        let reference = message.reference.clone();
                        let correlation = message.correlation_id.take();
                        *message = target.clone();
                        message.reference = reference;
                        if correlation.is_some() {
                            message.correlation_id = correlation;
                        }
                    }
                }
                message.merge_one_of(messages, schemas)?;
                message.resolve_correlation(messages, schemas);
            }
        }
        Ok(())
    }

    /// Parameter names in the order their `{placeholder}` tokens appear in
    /// the channel address.
    pub fn address_parameters(&self) -> Vec<String> {
        let mut parameters = Vec::new();
        let mut rest = self.address.as_str();
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}') else {
                break;
            };
            parameters.push(rest[start + 1..start + end].to_string());
            rest = &rest[start + end + 1..];
        }
        parameters
    }
}
