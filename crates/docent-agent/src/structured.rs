//! Parsing of schema-constrained capability answers

use docent_ai::{Context, Message};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::{
    error::{Error, Result},
    tool::schema_errors,
    transport::{RunConfig, Transport},
};

/// A reply shape: the JSON Schema sent to the model and the compiled validator
/// used to check what comes back.
pub struct StructuredOutput<T> {
    schema: serde_json::Value,
    validator: jsonschema::Validator,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StructuredOutput<T> {
    pub fn new(schema: serde_json::Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| Error::Other(format!("invalid response schema: {}", e)))?;
        Ok(Self {
            schema,
            validator,
            _marker: PhantomData,
        })
    }

    pub fn schema(&self) -> &serde_json::Value {
        &self.schema
    }

    /// Parse model text into `T`, rejecting anything that does not match the schema.
    pub fn parse(&self, text: &str) -> Result<T> {
        let body = strip_code_fence(text);
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| Error::MalformedOutput(format!("reply is not JSON ({}): {}", e, body)))?;

        if let Some(errors) = schema_errors(&value, &self.validator) {
            return Err(Error::MalformedOutput(format!(
                "reply does not match schema:\n{}",
                errors
            )));
        }

        serde_json::from_value(value).map_err(|e| Error::MalformedOutput(e.to_string()))
    }
}

/// Ask the model for a reply of shape `T` given a system prompt and transcript.
pub async fn complete_structured<T: DeserializeOwned>(
    transport: &dyn Transport,
    config: &RunConfig,
    system_prompt: &str,
    messages: Vec<Message>,
    output: &StructuredOutput<T>,
) -> Result<T> {
    let context = Context {
        messages,
        ..Context::with_system(system_prompt).with_response_schema(output.schema().clone())
    };
    let reply = transport.complete(&context, config).await?;
    output.parse(&reply.text())
}

/// Models sometimes wrap JSON in a Markdown fence even when asked not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // drop the info string ("json") on the opening line
    match rest.split_once('\n') {
        Some((info, body)) if !info.trim().contains('{') => body.trim(),
        _ => rest.trim(),
    }
}
