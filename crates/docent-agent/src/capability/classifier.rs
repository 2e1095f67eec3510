use async_trait::async_trait;
use docent_ai::Message;
use std::sync::Arc;

use super::{Classifier, IntentVerdict};
use crate::{
    error::Result,
    prompts,
    structured::{StructuredOutput, complete_structured},
    transport::{RunConfig, Transport},
};

/// Intent classification backed by the generation model's structured output.
pub struct LlmClassifier {
    transport: Arc<dyn Transport>,
    config: RunConfig,
    output: StructuredOutput<IntentVerdict>,
}

impl LlmClassifier {
    pub fn new(transport: Arc<dyn Transport>, config: RunConfig) -> Result<Self> {
        let output = StructuredOutput::new(serde_json::json!({
            "type": "object",
            "properties": {
                "is_ticket": {
                    "type": "boolean",
                    "description": "The user wants to book tickets"
                },
                "is_museum": {
                    "type": "boolean",
                    "description": "The user asks for museum details"
                },
                "redirect_text": {
                    "type": "string",
                    "description": "Reply for out-of-scope messages, empty otherwise"
                }
            },
            "required": ["is_ticket", "is_museum", "redirect_text"]
        }))?;
        Ok(Self {
            transport,
            config,
            output,
        })
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, history: &[Message]) -> Result<IntentVerdict> {
        complete_structured(
            self.transport.as_ref(),
            &self.config,
            prompts::INTENT,
            history.to_vec(),
            &self.output,
        )
        .await
    }
}
