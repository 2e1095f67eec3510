//! Bounded generation / tool-execution loop

use docent_ai::{Context, Message};

use crate::{
    error::Result,
    events::StepEvent,
    graph::NodeContext,
    tool::ToolSet,
    transport::{RunConfig, Transport},
};

/// Default cap on capability round-trips per node invocation
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// How a tool loop finished
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model produced a reply with no further tool requests
    Answer { message: Message, rounds: u32 },
    /// The model was still requesting tools when the round budget ran out
    Exceeded { rounds: u32 },
}

/// Drives the model and its tools until it answers or the budget runs out.
pub struct ToolLoop<'a> {
    transport: &'a dyn Transport,
    config: &'a RunConfig,
    tools: &'a ToolSet,
    max_rounds: u32,
}

impl<'a> ToolLoop<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        config: &'a RunConfig,
        tools: &'a ToolSet,
        max_rounds: u32,
    ) -> Self {
        Self {
            transport,
            config,
            tools,
            max_rounds: max_rounds.max(1),
        }
    }

    /// Run the loop. Intermediate tool exchanges live only in the loop's own
    /// context; the caller decides what, if anything, reaches the transcript.
    pub async fn run(
        &self,
        system_prompt: &str,
        history: Vec<Message>,
        cx: &NodeContext,
    ) -> Result<LoopOutcome> {
        let mut context = Context {
            messages: history,
            tools: self.tools.api_tools(),
            ..Context::with_system(system_prompt)
        };

        for round in 1..=self.max_rounds {
            let reply = self.transport.complete(&context, self.config).await?;
            if let Some(usage) = reply.usage() {
                cx.record_usage(usage);
            }

            let tool_calls: Vec<(String, String, serde_json::Value)> = reply
                .tool_calls()
                .into_iter()
                .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                .collect();

            if tool_calls.is_empty() {
                return Ok(LoopOutcome::Answer {
                    message: reply,
                    rounds: round,
                });
            }

            context.push(reply);
            for (id, name, args) in tool_calls {
                tracing::debug!(tool = %name, round, "Executing tool call");
                cx.emit(StepEvent::ToolExecutionStart {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: args.clone(),
                });

                let result = self.tools.execute(&id, &name, &args).await;

                cx.emit(StepEvent::ToolExecutionEnd {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    result: result.text_content(),
                    is_error: result.is_error,
                });
                context.push(Message::tool_result(
                    id,
                    name,
                    result.content,
                    result.is_error,
                ));
            }
        }

        tracing::warn!(
            max_rounds = self.max_rounds,
            "Tool loop exhausted its round budget"
        );
        Ok(LoopOutcome::Exceeded {
            rounds: self.max_rounds,
        })
    }
}
