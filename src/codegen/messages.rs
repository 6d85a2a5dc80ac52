//! Message partial: composite message types, marshaling, factories.

use std::collections::BTreeSet;

use crate::asyncapi::{Message, TYPE_STRING};

use super::naming::field_identifier;
use super::types;

/// Emit the composite type for `message`: its headers/payload types, the
/// `<Name>Message` struct, a factory, envelope marshaling, and the
/// correlation accessor when one is declared.
pub(super) fn render_message(out: &mut String, rendered: &mut BTreeSet<String>, message: &Message) {
    let name = &message.name;
    if name.is_empty() || !rendered.insert(name.clone()) {
        return;
    }

    let mut declarations = String::new();
    let headers_type = message
        .headers
        .as_ref()
        .map(|headers| types::inline_type(&mut declarations, &headers.name, headers));
    let payload_type = message
        .payload
        .as_ref()
        .map(|payload| types::inline_type(&mut declarations, &payload.name, payload));
    out.push_str(&declarations);

    let mut fields = String::new();
    if let Some(headers_type) = &headers_type {
        fields.push_str(&format!("    pub headers: {headers_type},\n"));
    }
    if let Some(payload_type) = &payload_type {
        fields.push_str(&format!("    pub payload: {payload_type},\n"));
    }

    if !message.description.is_empty() {
        out.push_str(&format!("/// {}\n", message.description));
    }
    out.push_str(&format!(
        "#[derive(Debug, Clone, Default, PartialEq)]\n\
         pub struct {name}Message {{\n{fields}}}\n\n"
    ));

    render_impl(out, message, headers_type.is_some(), payload_type.is_some());
    render_correlated_impl(out, message);
}

fn render_impl(out: &mut String, message: &Message, has_headers: bool, has_payload: bool) {
    let name = &message.name;
    let correlated = !message.correlation_id_location.is_empty();

    let setter = if correlated {
        correlation_setter(message)
    } else {
        String::new()
    };
    if setter.is_empty() {
        out.push_str(&format!(
            "impl {name}Message {{\n\
            \x20   /// Create an empty message.\n\
            \x20   pub fn new() -> Self {{\n\
            \x20       Self::default()\n\
            \x20   }}\n\n"
        ));
    } else {
        out.push_str(&format!(
            "impl {name}Message {{\n\
            \x20   /// Create a message with a fresh correlation id.\n\
            \x20   pub fn new() -> Self {{\n\
            \x20       let mut message = Self::default();\n\
             {setter}\
            \x20       message\n\
            \x20   }}\n\n"
        ));
    }

    render_to_broker_message(out, message, has_payload);
    render_from_broker_message(out, message, has_headers, has_payload);

    out.push_str("}\n\n");
}

fn render_to_broker_message(out: &mut String, message: &Message, has_payload: bool) {
    out.push_str(
        "    /// Marshal into a broker-neutral envelope.\n\
        \x20   pub fn to_broker_message(&self) -> Result<BrokerMessage, BrokerError> {\n",
    );
    if has_payload {
        out.push_str(
            "        let payload = serde_json::to_vec(&self.payload)\n\
            \x20           .map_err(|e| BrokerError::Unmarshal(e.to_string()))?;\n\
            \x20       let mut message = BrokerMessage::new(payload);\n",
        );
    } else {
        out.push_str("        let mut message = BrokerMessage::default();\n");
    }
    if let Some(headers) = &message.headers {
        for (key, property) in &headers.properties {
            let field = field_identifier(key);
            let required = headers.is_field_required(key);
            let line = match (property.schema_type == TYPE_STRING, required) {
                (true, true) => format!(
                    "        message.set_header(\"{key}\", self.headers.{field}.clone().into_bytes());\n"
                ),
                (true, false) => format!(
                    "        if let Some(value) = &self.headers.{field} {{\n\
                    \x20           message.set_header(\"{key}\", value.clone().into_bytes());\n\
                    \x20       }}\n"
                ),
                (false, true) => format!(
                    "        message.set_header(\n\
                    \x20           \"{key}\",\n\
                    \x20           serde_json::to_vec(&self.headers.{field})\n\
                    \x20               .map_err(|e| BrokerError::Unmarshal(e.to_string()))?,\n\
                    \x20       );\n"
                ),
                (false, false) => format!(
                    "        if let Some(value) = &self.headers.{field} {{\n\
                    \x20           message.set_header(\n\
                    \x20               \"{key}\",\n\
                    \x20               serde_json::to_vec(value)\n\
                    \x20                   .map_err(|e| BrokerError::Unmarshal(e.to_string()))?,\n\
                    \x20           );\n\
                    \x20       }}\n"
                ),
            };
            out.push_str(&line);
        }
    }
    out.push_str("        Ok(message)\n    }\n\n");
}

fn render_from_broker_message(
    out: &mut String,
    message: &Message,
    has_headers: bool,
    has_payload: bool,
) {
    out.push_str(
        "    /// Unmarshal from a broker-neutral envelope.\n\
        \x20   pub fn from_broker_message(message: BrokerMessage) -> Result<Self, BrokerError> {\n",
    );
    let mut constructor = String::new();
    if has_headers {
        let headers = message.headers.as_ref().filter(|h| !h.properties.is_empty());
        match headers {
            Some(headers) => {
                let headers_type = &headers.name;
                out.push_str(&format!("        let headers = {headers_type} {{\n"));
                for (key, property) in &headers.properties {
                    let field = field_identifier(key);
                    let required = headers.is_field_required(key);
                    let line = match (property.schema_type == TYPE_STRING, required) {
                        (true, true) => format!(
                            "            {field}: message\n\
                            \x20               .header_str(\"{key}\")\n\
                            \x20               .ok_or_else(|| {{\n\
                            \x20                   BrokerError::Unmarshal(\"missing header '{key}'\".to_string())\n\
                            \x20               }})?\n\
                            \x20               .to_string(),\n"
                        ),
                        (true, false) => format!(
                            "            {field}: message.header_str(\"{key}\").map(str::to_string),\n"
                        ),
                        (false, true) => format!(
                            "            {field}: serde_json::from_slice(\n\
                            \x20               message.headers.get(\"{key}\").map(Vec::as_slice).unwrap_or_default(),\n\
                            \x20           )\n\
                            \x20           .map_err(|e| BrokerError::Unmarshal(e.to_string()))?,\n"
                        ),
                        (false, false) => format!(
                            "            {field}: match message.headers.get(\"{key}\") {{\n\
                            \x20               Some(value) => serde_json::from_slice(value)\n\
                            \x20                   .map_err(|e| BrokerError::Unmarshal(e.to_string()))?,\n\
                            \x20               None => None,\n\
                            \x20           }},\n"
                        ),
                    };
                    out.push_str(&line);
                }
                out.push_str("        };\n");
                constructor.push_str("headers, ");
            }
            None => {
                out.push_str("        let headers = Default::default();\n");
                constructor.push_str("headers, ");
            }
        }
    }
    if has_payload {
        out.push_str(
            "        let payload = serde_json::from_slice(&message.payload)\n\
            \x20           .map_err(|e| BrokerError::Unmarshal(e.to_string()))?;\n",
        );
        constructor.push_str("payload, ");
    }
    if !has_headers && !has_payload {
        out.push_str("        let _ = message;\n");
    }
    let constructor = constructor.trim_end_matches(", ");
    out.push_str(&format!("        Ok(Self {{ {constructor} }})\n    }}\n"));
}

/// Statements assigning a fresh uuid along the correlation path.
fn correlation_setter(message: &Message) -> String {
    let Some((root, fragment)) = message.correlation_id_location.split_once("#/") else {
        return String::new();
    };
    let (mut expression, top) = match root {
        "$message.header" => ("message.headers".to_string(), message.headers.as_ref()),
        "$message.payload" => ("message.payload".to_string(), message.payload.as_ref()),
        _ => return String::new(),
    };
    let Some(mut node) = top else {
        return String::new();
    };
    let segments: Vec<&str> = fragment.split('/').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return String::new();
    };
    for segment in parents {
        let field = field_identifier(segment);
        if node.is_field_required(segment) {
            expression.push_str(&format!(".{field}"));
        } else {
            expression.push_str(&format!(".{field}.get_or_insert_with(Default::default)"));
        }
        match node.properties.get(*segment) {
            Some(child) => node = child,
            None => return String::new(),
        }
    }
    let field = field_identifier(leaf);
    if node.is_field_required(leaf) {
        format!(
            "        {expression}.{field} = uuid::Uuid::new_v4().to_string();\n"
        )
    } else {
        format!(
            "        {expression}.{field} = Some(uuid::Uuid::new_v4().to_string());\n"
        )
    }
}

/// `CorrelatedMessage` implementation for messages declaring a correlation
/// id.
fn render_correlated_impl(out: &mut String, message: &Message) {
    if message.correlation_id_location.is_empty() {
        return;
    }
    let Some(accessor) = correlation_accessor(message) else {
        return;
    };
    let name = &message.name;
    out.push_str(&format!(
        "impl CorrelatedMessage for {name}Message {{\n\
        \x20   fn correlation_id(&self) -> Option<String> {{\n\
        \x20       {accessor}\n\
        \x20   }}\n\
         }}\n\n"
    ));
}

/// Expression reading the correlation id out of the typed message.
fn correlation_accessor(message: &Message) -> Option<String> {
    let (root, fragment) = message.correlation_id_location.split_once("#/")?;
    let (mut expression, top) = match root {
        "$message.header" => ("self.headers".to_string(), message.headers.as_ref()),
        "$message.payload" => ("self.payload".to_string(), message.payload.as_ref()),
        _ => return None,
    };
    let mut node = top?;
    let segments: Vec<&str> = fragment.split('/').collect();
    let (leaf, parents) = segments.split_last()?;
    for segment in parents {
        let field = field_identifier(segment);
        if node.is_field_required(segment) {
            expression.push_str(&format!(".{field}"));
        } else {
            expression.push_str(&format!(".{field}.as_ref()?"));
        }
        node = node.properties.get(*segment)?;
    }
    let field = field_identifier(leaf);
    if node.is_field_required(leaf) {
        Some(format!("Some({expression}.{field}.clone())"))
    } else {
        Some(format!("{expression}.{field}.clone()"))
    }
}
