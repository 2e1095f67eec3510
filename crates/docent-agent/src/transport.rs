//! Transport abstraction for capability calls

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use docent_ai::{
    Context, Error, GenerationOptions, Message, Model, Result, providers::LlmProvider,
    stream::MessageEvent,
};
use futures::StreamExt;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if an error message describes a transient failure
pub fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    // Rate limit errors
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("resource_exhausted")
    {
        return true;
    }
    // Transient network errors
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        return true;
    }
    // Server errors (5xx)
    if lower.contains("http 500")
        || lower.contains("http 502")
        || lower.contains("http 503")
        || lower.contains("http 504")
        || lower.contains("unavailable")
    {
        return true;
    }
    lower.contains("overloaded")
}

/// Model and sampling settings for capability calls
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: Model,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl RunConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            temperature: None,
            max_tokens: None,
        }
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// One request/response exchange with the generation capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the context and return the completed assistant message
    async fn complete(&self, context: &Context, config: &RunConfig) -> Result<Message>;
}

/// Direct provider transport with retry
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn attempt(&self, context: &Context, config: &RunConfig) -> Result<Message> {
        let mut stream = self
            .provider
            .stream(&config.model, context, &config.options())
            .await?;

        while let Some(event) = stream.next().await {
            match event {
                MessageEvent::Done { message, .. } => return Ok(message),
                MessageEvent::Error { message } => {
                    return Err(Error::api("stream_error", message));
                }
                _ => {}
            }
        }

        Err(Error::UnexpectedResponse(
            "stream ended without a completed message".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn complete(&self, context: &Context, config: &RunConfig) -> Result<Message> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(context, config).await {
                Ok(message) => return Ok(message),
                Err(e) => {
                    // Typed check + string fallback for errors relayed as text
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);

                    if attempt < self.retry_config.max_retries && retryable {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.retry_config.max_retries + 1,
                            error_msg,
                            delay
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(e);
                }
            }
        }
    }
}
