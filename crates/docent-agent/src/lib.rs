//! docent-agent: the conversation graph and its execution engine
//!
//! This crate routes each user message to museum information, ticket booking
//! or an out-of-scope reply, drives the booking dialog through a resumable
//! human-input interrupt, and checkpoints state per thread after every node.

pub mod capability;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod nodes;
pub mod prompts;
pub mod state;
pub mod structured;
pub mod tool;
pub mod tool_loop;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

pub use capability::{
    Classifier, DataAccess, DataError, Intent, IntentVerdict, LayeredSafety, LlmClassifier,
    LlmQuerySafety, QueryMode, QueryOutput, QuerySafety, Rejection, StatementGuard,
};
pub use checkpoint::{
    Checkpoint, CheckpointError, Checkpointer, MemoryCheckpointer, PendingInterrupt, ResumeHandle,
    ResumeToken,
};
pub use engine::{Capabilities, Engine, EngineConfig, StepEventStream, ToolActivity, TurnSummary};
pub use error::{Error, Result};
pub use events::StepEvent;
pub use graph::{InterruptPayload, Node, NodeId, NodeOutcome, Route, Transition};
pub use state::{ConversationState, IntentFlag, ThreadId};
pub use tool::{Tool, ToolResult, ToolSet};
pub use transport::{ProviderTransport, RetryConfig, RunConfig, Transport};
