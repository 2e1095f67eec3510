//! Google Generative AI (Gemini) API provider

use crate::{
    error::{Error, Result},
    providers::{LlmProvider, get_api_key},
    stream::{MessageEvent, MessageEventStream},
    types::{
        AssistantMetadata, Content, Context, GenerationOptions, Message, Model, StopReason, Usage,
    },
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Google Generative AI client
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    /// Create a new Google provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from an explicit key, falling back to `GOOGLE_API_KEY` / `GEMINI_API_KEY`
    pub fn from_env_or(api_key: Option<&str>) -> Result<Self> {
        get_api_key(api_key, &["GOOGLE_API_KEY", "GEMINI_API_KEY"]).map(Self::new)
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &GenerationOptions,
    ) -> Result<MessageEventStream> {
        let request = build_request(model, context, options);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            model.base_url, model.id, self.api_key
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, val);
            }
        }

        let request_builder = self.client.post(&url).headers(headers).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn build_request(model: &Model, context: &Context, options: &GenerationOptions) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in &context.messages {
        let Some(content) = convert_message(msg) else {
            continue;
        };
        // Gemini expects all responses to one batch of function calls in a single turn
        match contents.last_mut() {
            Some(prev) if prev.is_function_response() && content.is_function_response() => {
                prev.parts.extend(content.parts);
            }
            _ => contents.push(content),
        }
    }

    let system_instruction = context.system_prompt.as_ref().map(|prompt| GeminiContent {
        role: None,
        parts: vec![GeminiPart::Text {
            text: prompt.clone(),
        }],
    });

    let tools = if context.tools.is_empty() {
        None
    } else {
        let function_declarations = context
            .tools
            .iter()
            .map(|t| GeminiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: Some(to_gemini_schema(&t.parameters)),
            })
            .collect();
        Some(vec![GeminiTool {
            function_declarations,
        }])
    };

    // Function calling and constrained JSON output cannot be combined
    let response_schema = if tools.is_some() {
        if context.response_schema.is_some() {
            tracing::debug!("Tools bound, dropping response schema from Gemini request");
        }
        None
    } else {
        context.response_schema.as_ref().map(to_gemini_schema)
    };

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: Some(GeminiGenerationConfig {
            max_output_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
            temperature: options.temperature,
            response_mime_type: response_schema
                .as_ref()
                .map(|_| "application/json".to_string()),
            response_schema,
        }),
    }
}

/// Gemini's schema dialect spells types in upper case (`OBJECT`, `STRING`, ...).
fn to_gemini_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let converted = match (key.as_str(), value) {
                    ("type", serde_json::Value::String(t)) => {
                        serde_json::Value::String(t.to_uppercase())
                    }
                    // property names are user data, only their schemas convert
                    ("properties", serde_json::Value::Object(props)) => serde_json::Value::Object(
                        props
                            .iter()
                            .map(|(name, s)| (name.clone(), to_gemini_schema(s)))
                            .collect(),
                    ),
                    _ => to_gemini_schema(value),
                };
                (key.clone(), converted)
            })
            .collect(),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_gemini_schema).collect())
        }
        other => other.clone(),
    }
}

fn convert_message(msg: &Message) -> Option<GeminiContent> {
    match msg {
        Message::User { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } if !text.trim().is_empty() => {
                        Some(GeminiPart::Text { text: text.clone() })
                    }
                    _ => None,
                })
                .collect();

            if parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: Some("user".to_string()),
                    parts,
                })
            }
        }
        Message::Assistant { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } if !text.is_empty() => {
                        Some(GeminiPart::Text { text: text.clone() })
                    }
                    Content::Text { .. } => None,
                    // Gemini has no call ids; calls and responses pair up by name and order
                    Content::ToolCall {
                        name, arguments, ..
                    } => Some(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: name.clone(),
                            args: arguments.clone(),
                        },
                    }),
                })
                .collect();

            if parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: Some("model".to_string()),
                    parts,
                })
            }
        }
        Message::ToolResult {
            tool_name,
            content,
            is_error,
            ..
        } => {
            let response_text = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("");

            let response = if *is_error {
                serde_json::json!({ "error": response_text })
            } else {
                serde_json::json!({ "result": response_text })
            };

            Some(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: tool_name.clone(),
                        response,
                    },
                }],
            })
        }
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("MAX_TOKENS") => StopReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => StopReason::Safety,
        _ => StopReason::Stop,
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        let start_message = Message::Assistant {
            content: vec![],
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                ..Default::default()
            },
        };
        yield MessageEvent::Start { message: start_message };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.is_empty() || msg.data == "[DONE]" {
                        continue;
                    }

                    let response = match serde_json::from_str::<GeminiStreamResponse>(&msg.data) {
                        Ok(response) => response,
                        Err(e) => {
                            event_source.close();
                            if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(&msg.data) {
                                yield MessageEvent::Error {
                                    message: error_response.error.describe(),
                                };
                                return;
                            }
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    };

                    for candidate in &response.candidates {
                        if let Some(ref content) = candidate.content {
                            for part in &content.parts {
                                match part {
                                    GeminiResponsePart::Text { text } => {
                                        accumulated_text.push_str(text);
                                        yield MessageEvent::TextDelta { delta: text.clone() };
                                    }
                                    GeminiResponsePart::FunctionCall { function_call } => {
                                        let id = format!("call_{}", tool_calls.len());
                                        yield MessageEvent::ToolCall {
                                            id: id.clone(),
                                            name: function_call.name.clone(),
                                            arguments: function_call.args.clone(),
                                        };
                                        tool_calls.push((
                                            id,
                                            function_call.name.clone(),
                                            function_call.args.clone(),
                                        ));
                                    }
                                }
                            }
                        }

                        if let Some(ref reason) = candidate.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref meta) = response.usage_metadata {
                        usage.input = meta.prompt_token_count.unwrap_or(usage.input);
                        usage.output = meta.candidates_token_count.unwrap_or(usage.output);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    let detail = serde_json::from_str::<GeminiErrorResponse>(&body)
                        .map(|e| e.error.describe())
                        .unwrap_or(body);
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status.as_u16(), detail),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let stop_reason = map_finish_reason(finish_reason.as_deref(), !tool_calls.is_empty());

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text { text: accumulated_text });
        }
        for (id, name, arguments) in tool_calls {
            content.push(Content::ToolCall { id, name, arguments });
        }

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason,
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn is_function_response(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|p| matches!(p, GeminiPart::FunctionResponse { .. }))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiResponsePart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiResponseFunctionCall,
    },
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl GeminiError {
    fn describe(&self) -> String {
        match &self.status {
            Some(status) => format!("{} ({})", self.message, status),
            None => self.message.clone(),
        }
    }
}
