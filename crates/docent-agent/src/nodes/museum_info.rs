use async_trait::async_trait;
use std::sync::Arc;

use super::text_only;
use crate::{
    error::Result,
    graph::{Node, NodeContext, NodeId, NodeOutcome, Transition},
    prompts,
    state::ConversationState,
    tool::ToolSet,
    tool_loop::{LoopOutcome, ToolLoop},
    transport::{RunConfig, Transport},
};

pub(crate) const LOOKUP_EXCEEDED: &str =
    "Sorry, I was unable to complete the lookup. Please rephrase your question.";
const EMPTY_ANSWER: &str = "Sorry, I could not find an answer to that. Please rephrase your question.";

/// Answers informational questions with read-only lookups; ends the turn.
pub struct MuseumInfoNode {
    transport: Arc<dyn Transport>,
    config: RunConfig,
    tools: ToolSet,
    max_rounds: u32,
    system_prompt: String,
}

impl MuseumInfoNode {
    /// `tools` should hold only the read tool
    pub fn new(
        transport: Arc<dyn Transport>,
        config: RunConfig,
        tools: ToolSet,
        max_rounds: u32,
    ) -> Self {
        Self {
            transport,
            config,
            tools,
            max_rounds,
            system_prompt: prompts::museum_info(),
        }
    }
}

#[async_trait]
impl Node for MuseumInfoNode {
    fn id(&self) -> NodeId {
        NodeId::MuseumInfo
    }

    async fn run(&self, state: &mut ConversationState, cx: &NodeContext) -> Result<NodeOutcome> {
        let outcome = ToolLoop::new(
            self.transport.as_ref(),
            &self.config,
            &self.tools,
            self.max_rounds,
        )
        .run(&self.system_prompt, state.history(), cx)
        .await?;

        match outcome {
            LoopOutcome::Answer { message, rounds } => {
                tracing::debug!(rounds, "Museum lookup answered");
                state.messages.push(text_only(message, EMPTY_ANSWER));
            }
            LoopOutcome::Exceeded { .. } => state.push_assistant(LOOKUP_EXCEEDED),
        }
        Ok(NodeOutcome::Continue(Transition::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::testing::{NoopTool, ScriptedTransport, tool_call_message};
    use docent_ai::{Message, Model};

    fn node(transport: Arc<ScriptedTransport>, max_rounds: u32) -> MuseumInfoNode {
        let (tool, _) = NoopTool::new("read_db");
        MuseumInfoNode::new(
            transport,
            RunConfig::new(Model::gemini("test")),
            ToolSet::new().with(Arc::new(tool)),
            max_rounds,
        )
    }

    #[tokio::test]
    async fn test_only_final_answer_reaches_transcript() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            tool_call_message(&[(
                "call_0",
                "read_db",
                serde_json::json!({"query": "SELECT opening_time, closing_time FROM museums"}),
            )]),
            Message::assistant("The City Art Museum is open from 09:00 to 17:00."),
        ]));
        let mut state = ConversationState::default();
        state.begin_turn("What are the opening hours of the City Art Museum?");

        let outcome = node(transport, 8)
            .run(&mut state, &NodeContext::new(EventSink::disabled()))
            .await
            .unwrap();

        assert_eq!(outcome, NodeOutcome::Continue(Transition::End));
        assert_eq!(state.messages.len(), 2);
        assert!(state.messages[1].tool_calls().is_empty());
        assert!(state.messages[1].text().contains("09:00"));
    }

    #[tokio::test]
    async fn test_exceeded_loop_is_recoverable() {
        let call = || tool_call_message(&[("c", "read_db", serde_json::json!({}))]);
        let transport = Arc::new(ScriptedTransport::new(vec![call(), call(), call()]));
        let mut state = ConversationState::default();
        state.begin_turn("Tell me everything");

        let outcome = node(transport, 2)
            .run(&mut state, &NodeContext::new(EventSink::disabled()))
            .await
            .unwrap();

        assert_eq!(outcome, NodeOutcome::Continue(Transition::End));
        assert_eq!(state.last_assistant_text().as_deref(), Some(LOOKUP_EXCEEDED));
    }

    #[tokio::test]
    async fn test_sends_museum_prompt_and_history() {
        let transport = Arc::new(ScriptedTransport::new(vec![Message::assistant("Sure.")]));
        let mut state = ConversationState::default();
        state.begin_turn("Which museums are in Springfield?");

        node(transport.clone(), 8)
            .run(&mut state, &NodeContext::new(EventSink::disabled()))
            .await
            .unwrap();

        let sent = &transport.contexts()[0];
        assert!(sent.system_prompt.as_deref().unwrap().contains("read_db"));
        assert_eq!(sent.messages[0].text(), "Which museums are in Springfield?");
        assert_eq!(sent.tools[0].name, "read_db");
    }
}
