//! Scripted transports and counting capability stubs shared by unit tests.

use async_trait::async_trait;
use docent_ai::{AssistantMetadata, Content, Context, Message};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    capability::{
        Classifier, DataAccess, DataError, IntentVerdict, QueryMode, QueryOutput, QuerySafety,
    },
    error::{Error, Result},
    tool::{Tool, ToolResult},
    transport::{RunConfig, Transport},
};

/// A mock transport that returns canned assistant responses (or failures) in
/// order and records every context it was sent.
pub struct ScriptedTransport {
    responses: Arc<Mutex<Vec<docent_ai::Result<Message>>>>,
    seen: Arc<Mutex<Vec<Context>>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue more responses
    pub fn push(&self, message: Message) {
        self.responses.lock().push(Ok(message));
    }

    /// Queue a provider failure
    pub fn push_error(&self, error: docent_ai::Error) {
        self.responses.lock().push(Err(error));
    }

    pub fn contexts(&self) -> Vec<Context> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn complete(&self, context: &Context, _config: &RunConfig) -> docent_ai::Result<Message> {
        self.seen.lock().push(context.clone());
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            Ok(Message::assistant("done"))
        } else {
            responses.remove(0)
        }
    }
}

/// An assistant message requesting the given tool calls
pub fn tool_call_message(calls: &[(&str, &str, serde_json::Value)]) -> Message {
    Message::Assistant {
        content: calls
            .iter()
            .map(|(id, name, args)| Content::tool_call(*id, *name, args.clone()))
            .collect(),
        metadata: AssistantMetadata::default(),
    }
}

/// A simple no-op tool that counts invocations
pub struct NoopTool {
    tool_name: String,
    call_count: Arc<AtomicU32>,
}

impl NoopTool {
    pub fn new(name: &str) -> (Self, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        (
            Self {
                tool_name: name.to_string(),
                call_count: count.clone(),
            },
            count,
        )
    }
}

#[async_trait]
impl Tool for NoopTool {
    fn name(&self) -> &str {
        &self.tool_name
    }
    fn description(&self) -> &str {
        "A no-op tool"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _tool_call_id: &str, _arguments: serde_json::Value) -> ToolResult {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        ToolResult::text("ok")
    }
}

/// Query safety stub with a fixed verdict (or a failure) that counts calls
pub struct CountingSafety {
    verdict: Option<bool>,
    calls: Arc<AtomicU32>,
}

impl CountingSafety {
    pub fn new(verdict: bool) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                verdict: Some(verdict),
                calls: calls.clone(),
            },
            calls,
        )
    }

    /// A safety capability that is unavailable
    pub fn failing() -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                verdict: None,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl QuerySafety for CountingSafety {
    async fn check(&self, _sql: &str, _mode: QueryMode) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.verdict
            .ok_or_else(|| Error::Capability("safety service unavailable".into()))
    }
}

/// Data access stub that records every statement it runs
pub struct RecordingDataAccess {
    result: std::result::Result<QueryOutput, DataError>,
    statements: Mutex<Vec<String>>,
}

impl RecordingDataAccess {
    pub fn returning(result: std::result::Result<QueryOutput, DataError>) -> Self {
        Self {
            result,
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.statements.lock().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

#[async_trait]
impl DataAccess for RecordingDataAccess {
    async fn execute(&self, sql: &str) -> std::result::Result<QueryOutput, DataError> {
        self.statements.lock().push(sql.to_string());
        self.result.clone()
    }
}

/// Classifier stub returning scripted verdicts in order
pub struct ScriptedClassifier {
    verdicts: Mutex<Vec<Result<IntentVerdict>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClassifier {
    pub fn new(verdicts: Vec<Result<IntentVerdict>>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn ticket() -> Result<IntentVerdict> {
        Ok(IntentVerdict {
            is_ticket: true,
            is_museum: false,
            redirect_text: String::new(),
        })
    }

    pub fn museum() -> Result<IntentVerdict> {
        Ok(IntentVerdict {
            is_ticket: false,
            is_museum: true,
            redirect_text: String::new(),
        })
    }

    pub fn out_of_scope(text: &str) -> Result<IntentVerdict> {
        Ok(IntentVerdict {
            is_ticket: false,
            is_museum: false,
            redirect_text: text.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, history: &[Message]) -> Result<IntentVerdict> {
        self.seen.lock().push(history.to_vec());
        let mut verdicts = self.verdicts.lock();
        if verdicts.is_empty() {
            return Err(Error::Capability("no scripted verdict left".into()));
        }
        verdicts.remove(0)
    }
}
