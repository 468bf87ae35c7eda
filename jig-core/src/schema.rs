//! Tool parameter schemas
//!
//! Built-in tools derive their input schema from Rust types (`schemars`);
//! MCP servers hand us raw JSON Schema documents. Both converge on the
//! tagged [`Schema`] representation here, so providers encode one shape
//! regardless of where a tool came from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A JSON-Schema-like parameter description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
        enum_values: Vec<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        items: Box<Schema>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Schema {
    /// An empty object schema
    pub fn empty_object() -> Self {
        Schema::Object {
            properties: BTreeMap::new(),
            required: Vec::new(),
            description: None,
        }
    }

    /// Build an object schema from (name, schema) pairs and required names
    pub fn object<I, S>(properties: I, required: &[&str]) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        Schema::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
            required: required.iter().map(|s| s.to_string()).collect(),
            description: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Schema::String {
            description: Some(description.into()),
            enum_values: Vec::new(),
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Schema::Integer {
            description: Some(description.into()),
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Schema::Boolean {
            description: Some(description.into()),
        }
    }

    pub fn array_of(items: Schema, description: impl Into<String>) -> Self {
        Schema::Array {
            items: Box::new(items),
            description: Some(description.into()),
        }
    }

    /// Derive the schema for a `schemars`-describable input type
    pub fn of<T: schemars::JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        let value = serde_json::to_value(schema).unwrap_or(Value::Null);
        Self::from_value(&value)
    }

    /// Convert an arbitrary JSON Schema document into the tagged form.
    ///
    /// Tolerant by construction: unknown or missing `type` degrades to a
    /// permissive shape rather than failing, since MCP servers ship schemas
    /// of varying strictness.
    pub fn from_value(value: &Value) -> Self {
        let obj = match value.as_object() {
            Some(o) => o,
            None => return Self::empty_object(),
        };

        let description = obj
            .get("description")
            .and_then(|d| d.as_str())
            .map(String::from);

        // Nullable fields serialize as `"type": ["integer", "null"]`; the
        // non-null entry is the one providers care about.
        let type_name = match obj.get("type") {
            Some(Value::String(s)) => s.as_str(),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(|t| t.as_str())
                .find(|t| *t != "null")
                .unwrap_or("string"),
            _ => {
                if obj.contains_key("properties") {
                    "object"
                } else {
                    "string"
                }
            }
        };

        match type_name {
            "object" => {
                let properties = obj
                    .get("properties")
                    .and_then(|p| p.as_object())
                    .map(|props| {
                        props
                            .iter()
                            .map(|(k, v)| (k.clone(), Self::from_value(v)))
                            .collect()
                    })
                    .unwrap_or_default();
                let required = obj
                    .get("required")
                    .and_then(|r| r.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                Schema::Object {
                    properties,
                    required,
                    description,
                }
            }
            "string" => Schema::String {
                description,
                enum_values: obj
                    .get("enum")
                    .and_then(|e| e.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "number" => Schema::Number { description },
            "integer" => Schema::Integer { description },
            "boolean" => Schema::Boolean { description },
            "array" => Schema::Array {
                items: Box::new(
                    obj.get("items")
                        .map(Self::from_value)
                        .unwrap_or_else(|| Schema::String {
                            description: None,
                            enum_values: Vec::new(),
                        }),
                ),
                description,
            },
            _ => Schema::String {
                description,
                enum_values: Vec::new(),
            },
        }
    }

    /// Serialize to the JSON Schema form providers expect
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// The required property names of an object schema
    pub fn required(&self) -> &[String] {
        match self {
            Schema::Object { required, .. } => required,
            _ => &[],
        }
    }
}
