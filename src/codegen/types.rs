//! Schema partial: type declarations for the `types` role.

use crate::asyncapi::{upper_first, Schema, Specification, TYPE_ARRAY, TYPE_OBJECT};

use super::naming::{field_identifier, reference_type_name, scalar_type};

/// Emit the declaration(s) for `schema` under `type_name`.
///
/// Objects become structs (nested declarations first), arrays and scalars
/// become type aliases. An extension override or a `$ref` short-circuits
/// synthesis into an alias.
pub(super) fn render_schema(out: &mut String, type_name: &str, schema: &Schema) {
    if let Some(override_type) = &schema.extensions.rust_type {
        out.push_str(&format!("pub type {type_name} = {override_type};\n\n"));
        return;
    }
    if !schema.reference.is_empty() {
        let target = reference_type_name(&schema.reference);
        out.push_str(&format!("pub type {type_name} = {target};\n\n"));
        return;
    }
    match schema.schema_type.as_str() {
        TYPE_OBJECT => {
            render_struct(out, type_name, schema);
        }
        TYPE_ARRAY => {
            let expression = match &schema.items {
                Some(items) => {
                    let item = inline_type(out, &format!("{type_name}Item"), items);
                    format!("Vec<{item}>")
                }
                None => "Vec<serde_json::Value>".to_string(),
            };
            out.push_str(&format!("pub type {type_name} = {expression};\n\n"));
        }
        other => {
            let expression = scalar_type(other).unwrap_or("serde_json::Value");
            out.push_str(&format!("pub type {type_name} = {expression};\n\n"));
        }
    }
}

/// Type expression for a schema in field position; nested declarations are
/// emitted first and the expression referring to them is returned.
pub(super) fn inline_type(out: &mut String, type_name: &str, schema: &Schema) -> String {
    if let Some(override_type) = &schema.extensions.rust_type {
        return override_type.clone();
    }
    if !schema.reference.is_empty() {
        return reference_type_name(&schema.reference);
    }
    match schema.schema_type.as_str() {
        TYPE_OBJECT => {
            render_struct(out, type_name, schema);
            type_name.to_string()
        }
        TYPE_ARRAY => match &schema.items {
            Some(items) => {
                let item = inline_type(out, &format!("{type_name}Item"), items);
                format!("Vec<{item}>")
            }
            None => "Vec<serde_json::Value>".to_string(),
        },
        other => scalar_type(other)
            .map(str::to_string)
            .unwrap_or_else(|| "serde_json::Value".to_string()),
    }
}

fn render_struct(out: &mut String, type_name: &str, schema: &Schema) {
    let mut fields = String::new();
    for (key, property) in &schema.properties {
        let field = field_identifier(key);
        let nested_name = format!("{type_name}{}", upper_first(key));
        let mut field_type = inline_type(out, &nested_name, property);
        if !schema.is_field_required(key) {
            field_type = format!("Option<{field_type}>");
        }
        if field != *key && !field.starts_with("r#") {
            fields.push_str(&format!("    #[serde(rename = \"{key}\")]\n"));
        }
        fields.push_str(&format!("    pub {field}: {field_type},\n"));
    }

    if !schema.description.is_empty() {
        out.push_str(&format!("/// {}\n", schema.description));
    }
    out.push_str(&format!(
        "#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]\n\
         pub struct {type_name} {{\n{fields}}}\n\n"
    ));
}

/// Render every named component schema and parameter.
pub(super) fn render(out: &mut String, spec: &Specification) {
    for (key, schema) in &spec.components.schemas {
        render_schema(out, &format!("{}Schema", upper_first(key)), schema);
    }
    for (key, parameter) in &spec.components.parameters {
        match &parameter.schema {
            Some(schema) => {
                render_schema(out, &format!("{}Parameter", upper_first(key)), schema);
            }
            None => {
                out.push_str(&format!(
                    "pub type {}Parameter = String;\n\n",
                    upper_first(key)
                ));
            }
        }
    }
}
