use async_trait::async_trait;
use docent_ai::Message;
use serde::Deserialize;
use std::sync::Arc;

use super::{QueryMode, QuerySafety, StatementGuard};
use crate::{
    error::Result,
    prompts,
    structured::{StructuredOutput, complete_structured},
    transport::{RunConfig, Transport},
};

#[derive(Debug, Deserialize)]
struct SafetyVerdict {
    safe: bool,
}

/// Query safety judged by the generation model.
pub struct LlmQuerySafety {
    transport: Arc<dyn Transport>,
    config: RunConfig,
    output: StructuredOutput<SafetyVerdict>,
}

impl LlmQuerySafety {
    pub fn new(transport: Arc<dyn Transport>, config: RunConfig) -> Result<Self> {
        let output = StructuredOutput::new(serde_json::json!({
            "type": "object",
            "properties": {
                "safe": {
                    "type": "boolean",
                    "description": "Whether the statement may run in the requested mode"
                }
            },
            "required": ["safe"]
        }))?;
        Ok(Self {
            transport,
            config,
            output,
        })
    }
}

#[async_trait]
impl QuerySafety for LlmQuerySafety {
    async fn check(&self, sql: &str, mode: QueryMode) -> Result<bool> {
        let prompt = match mode {
            QueryMode::Read => prompts::SAFETY_READ,
            QueryMode::Write => prompts::SAFETY_WRITE,
        };
        let verdict = complete_structured(
            self.transport.as_ref(),
            &self.config,
            prompt,
            vec![Message::user(sql)],
            &self.output,
        )
        .await?;
        tracing::debug!(%mode, safe = verdict.safe, "Model safety verdict");
        Ok(verdict.safe)
    }
}

/// Rules first, then an optional second opinion. A statement must pass every
/// layer; the second layer is never consulted for statements the rules reject.
pub struct LayeredSafety {
    guard: StatementGuard,
    second: Option<Arc<dyn QuerySafety>>,
}

impl LayeredSafety {
    pub fn new(guard: StatementGuard) -> Self {
        Self {
            guard,
            second: None,
        }
    }

    pub fn with_second_opinion(mut self, safety: Arc<dyn QuerySafety>) -> Self {
        self.second = Some(safety);
        self
    }
}

#[async_trait]
impl QuerySafety for LayeredSafety {
    async fn check(&self, sql: &str, mode: QueryMode) -> Result<bool> {
        if !self.guard.check(sql, mode).await? {
            return Ok(false);
        }
        match &self.second {
            Some(second) => second.check(sql, mode).await,
            None => Ok(true),
        }
    }
}
