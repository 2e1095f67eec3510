//! Graph vocabulary: node identities, routes, transitions and node outcomes

use async_trait::async_trait;
use docent_ai::Usage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::{
    error::{Error, Result},
    events::{EventSink, StepEvent},
    state::ConversationState,
};

/// Every node in the conversation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    DetectIntent,
    MuseumInfo,
    Booking,
    HumanInput,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::DetectIntent => "detect_intent",
            NodeId::MuseumInfo => "museum_info",
            NodeId::Booking => "booking",
            NodeId::HumanInput => "human_input",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision produced by the intent router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    End,
    Museum,
    Ticket,
}

/// Where execution goes after a node completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "node")]
pub enum Transition {
    Next(NodeId),
    End,
}

/// Dispatch table from router decisions to successor nodes.
pub fn successor(route: Route) -> Transition {
    match route {
        Route::End => Transition::End,
        Route::Museum => Transition::Next(NodeId::MuseumInfo),
        Route::Ticket => Transition::Next(NodeId::Booking),
    }
}

/// What the caller sees when the graph suspends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptPayload {
    /// The question put to the user (the latest assistant message)
    pub message: String,
}

/// Result of running a node once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Continue(Transition),
    /// Halt the whole graph until a resume value is supplied
    Suspend(InterruptPayload),
}

/// Per-turn facilities handed to nodes: the event sink and usage accounting.
#[derive(Clone)]
pub struct NodeContext {
    events: EventSink,
    usage: Arc<Mutex<Usage>>,
}

impl NodeContext {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    /// Emit a step event to whoever is watching the turn
    pub fn emit(&self, event: StepEvent) {
        self.events.emit(event);
    }

    pub fn record_usage(&self, usage: &Usage) {
        self.usage.lock().accumulate(usage);
    }

    /// Total usage recorded so far this turn
    pub fn usage(&self) -> Usage {
        self.usage.lock().clone()
    }
}

/// A unit of work in the conversation graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    /// Run the node against the state. Nodes mutate the state in place.
    async fn run(&self, state: &mut ConversationState, cx: &NodeContext) -> Result<NodeOutcome>;

    /// Continue a node that previously returned [`NodeOutcome::Suspend`].
    fn resume(&self, _state: &mut ConversationState, _value: String) -> Result<Transition> {
        Err(Error::Other(format!("node {} cannot be resumed", self.id())))
    }
}

/// Type alias for a shared node
pub type BoxedNode = Arc<dyn Node>;
