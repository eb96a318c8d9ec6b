//! Tool-related types for the protocol

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// JSON Schema for a tool's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "additionalProperties"
    )]
    pub additional_properties: Option<bool>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl JsonSchema {
    fn of_type(schema_type: &str) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: None,
            properties: None,
            required: None,
            additional_properties: None,
            extra: HashMap::new(),
        }
    }

    pub fn object() -> Self {
        Self {
            properties: Some(serde_json::json!({})),
            additional_properties: Some(false),
            ..Self::of_type("object")
        }
    }

    pub fn string() -> Self {
        Self::of_type("string")
    }

    pub fn number() -> Self {
        Self::of_type("number")
    }

    pub fn boolean() -> Self {
        Self::of_type("boolean")
    }

    pub fn array(items: JsonSchema) -> Self {
        let mut schema = Self::of_type("array");
        schema.extra.insert("items".to_string(), items.to_value());
        schema
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn property(mut self, name: &str, schema: JsonSchema) -> Self {
        let props = self.properties.get_or_insert(serde_json::json!({}));
        if let Some(obj) = props.as_object_mut() {
            obj.insert(name.to_string(), schema.to_value());
        }
        self
    }

    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required = Some(fields.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A tool as sent to a model: name, resolved description and input schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: JsonSchema,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: JsonSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: schema,
        }
    }
}

/// Runtime state a tool may consult when describing itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub dangerously_skip_permissions: bool,
}

/// A tool owned by the tool registry.
///
/// The description is produced asynchronously because it may depend on
/// permission state that is only known at call time.
#[async_trait]
pub trait ToolDescriptor: Send + Sync {
    fn name(&self) -> &str;

    async fn prompt(&self, context: &PromptContext) -> String;

    fn input_schema(&self) -> JsonSchema;

    async fn to_spec(&self, context: &PromptContext) -> ToolSpec {
        ToolSpec::new(self.name(), self.prompt(context).await, self.input_schema())
    }
}
