use async_trait::async_trait;
use std::sync::Arc;

use super::route;
use crate::{
    capability::{Classifier, Intent},
    error::Result,
    graph::{Node, NodeContext, NodeId, NodeOutcome, Route, successor},
    state::{ConversationState, IntentFlag},
};

/// Classifies the turn and routes it.
pub struct DetectIntentNode {
    classifier: Arc<dyn Classifier>,
}

impl DetectIntentNode {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

/// Record a classification on the state. Exactly one of ticket, museum or
/// out-of-scope holds afterwards.
pub fn apply_intent(state: &mut ConversationState, intent: Intent) {
    match intent {
        Intent::Ticket => {
            state.intent = IntentFlag::Ticket;
            state.out_of_scope_message.clear();
        }
        Intent::Museum => {
            state.intent = IntentFlag::Museum;
            state.out_of_scope_message.clear();
        }
        Intent::OutOfScope(text) => {
            state.intent = IntentFlag::Undetermined;
            state.push_assistant(text.clone());
            state.out_of_scope_message = text;
        }
    }
}

#[async_trait]
impl Node for DetectIntentNode {
    fn id(&self) -> NodeId {
        NodeId::DetectIntent
    }

    async fn run(&self, state: &mut ConversationState, _cx: &NodeContext) -> Result<NodeOutcome> {
        let intent = self.classifier.classify(&state.history()).await?.resolve();
        tracing::debug!(?intent, "Classified turn");
        apply_intent(state, intent);

        let route = route(state);
        if route == Route::Ticket {
            state.begin_booking_attempt();
        }
        Ok(NodeOutcome::Continue(successor(route)))
    }
}
