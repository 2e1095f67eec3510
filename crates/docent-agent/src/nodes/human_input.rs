use async_trait::async_trait;

use crate::{
    error::Result,
    graph::{InterruptPayload, Node, NodeContext, NodeId, NodeOutcome, Transition},
    state::ConversationState,
};

/// The only suspension point: surfaces the latest assistant question and waits
/// for the caller's answer.
#[derive(Debug, Default)]
pub struct HumanInputNode;

impl HumanInputNode {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Node for HumanInputNode {
    fn id(&self) -> NodeId {
        NodeId::HumanInput
    }

    async fn run(&self, state: &mut ConversationState, _cx: &NodeContext) -> Result<NodeOutcome> {
        Ok(NodeOutcome::Suspend(InterruptPayload {
            message: state.last_assistant_text().unwrap_or_default(),
        }))
    }

    fn resume(&self, state: &mut ConversationState, value: String) -> Result<Transition> {
        state.apply_answer(value);
        Ok(Transition::Next(NodeId::Booking))
    }
}
