use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{Error, Result},
    graph::{Node, NodeContext, NodeId, NodeOutcome, Transition},
    prompts,
    state::ConversationState,
    structured::StructuredOutput,
    tool::ToolSet,
    tool_loop::{LoopOutcome, ToolLoop},
    transport::{RunConfig, Transport},
};

const BOOKING_EXCEEDED: &str =
    "Sorry, I was unable to complete that step of the booking. Could you rephrase or repeat the details?";
const UNREADABLE_ANSWER: &str =
    "Sorry, something went wrong on my side. Could you repeat the booking details?";

/// The booking capability's structured answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingAnswer {
    /// A ticket row was written for the current booking
    pub booked: bool,
    /// Text shown to the user
    pub answer: String,
    /// The user abandoned the booking
    #[serde(default)]
    pub declined: bool,
}

impl BookingAnswer {
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "booked": { "type": "boolean" },
                "answer": { "type": "string" },
                "declined": { "type": "boolean" }
            },
            "required": ["booked", "answer"]
        })
    }

    /// Booked and declined answers close the dialog; anything else needs the user.
    fn next(&self) -> Transition {
        if self.booked || self.declined {
            Transition::End
        } else {
            Transition::Next(NodeId::HumanInput)
        }
    }
}

/// Drives the booking dialog. Every invocation either finishes the booking or
/// hands over to the human-input node with a question for the user.
pub struct BookingNode {
    transport: Arc<dyn Transport>,
    config: RunConfig,
    tools: ToolSet,
    max_rounds: u32,
    system_prompt: String,
    output: StructuredOutput<BookingAnswer>,
}

impl BookingNode {
    /// `tools` should hold the read and write tools
    pub fn new(
        transport: Arc<dyn Transport>,
        config: RunConfig,
        tools: ToolSet,
        max_rounds: u32,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            config,
            tools,
            max_rounds,
            system_prompt: prompts::booking(),
            output: StructuredOutput::new(BookingAnswer::schema())?,
        })
    }
}

#[async_trait]
impl Node for BookingNode {
    fn id(&self) -> NodeId {
        NodeId::Booking
    }

    async fn run(&self, state: &mut ConversationState, cx: &NodeContext) -> Result<NodeOutcome> {
        tracing::debug!(
            details = state.collected_details.len(),
            "Running booking step"
        );
        let outcome = ToolLoop::new(
            self.transport.as_ref(),
            &self.config,
            &self.tools,
            self.max_rounds,
        )
        .run(&self.system_prompt, state.history(), cx)
        .await?;

        let message = match outcome {
            LoopOutcome::Answer { message, .. } => message,
            LoopOutcome::Exceeded { .. } => {
                state.push_assistant(BOOKING_EXCEEDED);
                return Ok(NodeOutcome::Continue(Transition::Next(NodeId::HumanInput)));
            }
        };

        let text = message.text();
        let next = match self.output.parse(&text) {
            Ok(answer) => {
                tracing::debug!(
                    booked = answer.booked,
                    declined = answer.declined,
                    "Booking step answered"
                );
                let next = answer.next();
                state.push_assistant(answer.answer);
                next
            }
            Err(Error::MalformedOutput(reason)) => {
                // Keep the dialog alive: a prose reply is still a usable question
                tracing::warn!("Booking answer was not structured: {}", reason);
                if text.trim().is_empty() || text.trim_start().starts_with('{') {
                    state.push_assistant(UNREADABLE_ANSWER);
                } else {
                    state.push_assistant(text.trim());
                }
                Transition::Next(NodeId::HumanInput)
            }
            Err(e) => return Err(e),
        };
        Ok(NodeOutcome::Continue(next))
    }
}
