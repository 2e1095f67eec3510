//! Step event types

use docent_ai::{Message, Usage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    checkpoint::ResumeHandle,
    graph::{InterruptPayload, NodeId, Transition},
    state::{IntentFlag, ThreadId},
};

/// Events emitted while the engine drives a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// The engine started (or resumed) driving a thread
    TurnStart { thread_id: ThreadId, resumed: bool },

    /// A node is about to run
    NodeStart { node: NodeId },

    /// An assistant-authored entry was appended to the transcript
    AssistantMessage { node: NodeId, message: Message },

    /// A tool call requested by the model is starting
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// A node finished. Its state is checkpointed, or for a resumed interrupt,
    /// saved together with the node that follows.
    NodeEnd { node: NodeId, next: Transition },

    /// The graph suspended and waits for `resume`
    Interrupted {
        handle: ResumeHandle,
        payload: InterruptPayload,
    },

    /// The graph reached a terminal route
    TurnEnd {
        thread_id: ThreadId,
        intent: IntentFlag,
        usage: Usage,
    },

    /// The turn was aborted
    Error { message: String, fatal: bool },
}

impl StepEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepEvent::Interrupted { .. } | StepEvent::TurnEnd { .. } | StepEvent::Error { .. }
        )
    }
}

/// Fan-out point for step events; sending never blocks and never fails the turn.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<StepEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StepEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: StepEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening any more; keep going
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(
            StepEvent::Error {
                message: "x".into(),
                fatal: false
            }
            .is_terminal()
        );
        assert!(!StepEvent::NodeStart { node: NodeId::Booking }.is_terminal());
    }

    #[test]
    fn test_event_tagging() {
        let json = serde_json::to_value(StepEvent::NodeStart {
            node: NodeId::DetectIntent,
        })
        .unwrap();
        assert_eq!(json["type"], "node_start");
        assert_eq!(json["node"], "detect_intent");
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        drop(rx);
        sink.emit(StepEvent::NodeStart { node: NodeId::Booking });
    }
}
