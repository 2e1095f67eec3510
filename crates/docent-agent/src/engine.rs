//! The execution engine: drives nodes in graph order, checkpoints after every
//! node, and parks a thread at an interrupt until `resume` supplies a value.

use chrono::Utc;
use docent_ai::{Message, Model, Usage};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    pin::Pin,
    sync::Arc,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    capability::{Classifier, DataAccess, QuerySafety},
    checkpoint::{Checkpoint, Checkpointer, PendingInterrupt, ResumeHandle, ResumeToken},
    error::{Error, Result},
    events::{EventSink, StepEvent},
    graph::{BoxedNode, InterruptPayload, NodeContext, NodeId, NodeOutcome, Transition},
    nodes::{BookingNode, DetectIntentNode, HumanInputNode, MuseumInfoNode},
    state::{ConversationState, ThreadId},
    tool::ToolSet,
    tool_loop::DEFAULT_MAX_TOOL_ROUNDS,
    tools::SqlTool,
    transport::{RunConfig, Transport},
};

/// Stream of step events for one drive of a thread
pub type StepEventStream = Pin<Box<dyn Stream<Item = StepEvent> + Send>>;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model settings for answer generation
    pub run: RunConfig,
    /// Cap on capability round-trips per museum-info or booking invocation
    pub max_tool_rounds: u32,
}

impl EngineConfig {
    pub fn new(model: Model) -> Self {
        Self {
            run: RunConfig::new(model),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// The external collaborators the graph is wired to
#[derive(Clone)]
pub struct Capabilities {
    /// Answer generation for the museum-info and booking nodes
    pub transport: Arc<dyn Transport>,
    pub classifier: Arc<dyn Classifier>,
    pub safety: Arc<dyn QuerySafety>,
    pub data: Arc<dyn DataAccess>,
}

struct EngineInner {
    nodes: HashMap<NodeId, BoxedNode>,
    checkpointer: Arc<dyn Checkpointer>,
    busy: Mutex<HashSet<ThreadId>>,
}

/// Marks a thread as being driven; released on drop.
struct BusyGuard {
    inner: Arc<EngineInner>,
    thread_id: ThreadId,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.busy.lock().remove(&self.thread_id);
    }
}

/// Runs the conversation graph for any number of threads.
///
/// Cloning is cheap; clones share nodes, the checkpoint store and the set of
/// threads currently being driven.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Wire the standard graph: intent detection, museum info, booking and
    /// the human-input interrupt.
    pub fn new(
        config: EngineConfig,
        capabilities: Capabilities,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Result<Self> {
        let Capabilities {
            transport,
            classifier,
            safety,
            data,
        } = capabilities;

        let read = Arc::new(SqlTool::read(safety.clone(), data.clone()));
        let write = Arc::new(SqlTool::write(safety, data));

        let nodes: Vec<BoxedNode> = vec![
            Arc::new(DetectIntentNode::new(classifier)),
            Arc::new(MuseumInfoNode::new(
                transport.clone(),
                config.run.clone(),
                ToolSet::new().with(read.clone()),
                config.max_tool_rounds,
            )),
            Arc::new(BookingNode::new(
                transport,
                config.run,
                ToolSet::new().with(read).with(write),
                config.max_tool_rounds,
            )?),
            Arc::new(HumanInputNode::new()),
        ];
        Ok(Self::from_nodes(nodes, checkpointer))
    }

    /// Build an engine from explicit nodes. Later nodes replace earlier ones
    /// with the same id.
    pub fn from_nodes(nodes: Vec<BoxedNode>, checkpointer: Arc<dyn Checkpointer>) -> Self {
        let nodes = nodes.into_iter().map(|node| (node.id(), node)).collect();
        Self {
            inner: Arc::new(EngineInner {
                nodes,
                checkpointer,
                busy: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Drive a turn from intent detection with a caller-built state. The state
    /// should already carry the user's utterance.
    pub async fn start(
        &self,
        thread_id: ThreadId,
        state: ConversationState,
    ) -> Result<StepEventStream> {
        let guard = self.acquire(thread_id)?;
        let step = match self.inner.checkpointer.load(&thread_id).await? {
            Some(cp) if cp.is_suspended() => return Err(Error::ThreadSuspended(thread_id)),
            Some(cp) => cp.step,
            None => 0,
        };
        let checkpoint = Checkpoint {
            step,
            ..Checkpoint::initial(thread_id, state)
        };
        Ok(self.spawn(guard, checkpoint, Transition::Next(NodeId::DetectIntent), None))
    }

    /// Open a new turn on a thread, creating the thread if it does not exist.
    pub async fn send(&self, thread_id: ThreadId, text: &str) -> Result<StepEventStream> {
        let guard = self.acquire(thread_id)?;
        let mut checkpoint = match self.inner.checkpointer.load(&thread_id).await? {
            Some(cp) if cp.is_suspended() => return Err(Error::ThreadSuspended(thread_id)),
            Some(cp) => cp,
            None => Checkpoint::initial(thread_id, ConversationState::default()),
        };
        checkpoint.state.begin_turn(text);
        Ok(self.spawn(guard, checkpoint, Transition::Next(NodeId::DetectIntent), None))
    }

    /// Deliver a value to the thread's pending interrupt and keep driving.
    pub async fn resume(&self, thread_id: ThreadId, value: impl Into<String>) -> Result<StepEventStream> {
        self.resume_inner(thread_id, None, value.into()).await
    }

    /// Like [`Engine::resume`], but only if `handle` names the pending interrupt.
    pub async fn resume_at(
        &self,
        handle: &ResumeHandle,
        value: impl Into<String>,
    ) -> Result<StepEventStream> {
        self.resume_inner(handle.thread_id, Some(handle.token), value.into())
            .await
    }

    async fn resume_inner(
        &self,
        thread_id: ThreadId,
        token: Option<ResumeToken>,
        value: String,
    ) -> Result<StepEventStream> {
        let guard = self.acquire(thread_id)?;
        let checkpoint = self
            .inner
            .checkpointer
            .load(&thread_id)
            .await?
            .ok_or(Error::ThreadNotFound(thread_id))?;
        let pending = checkpoint
            .pending_interrupt
            .as_ref()
            .ok_or(Error::NotSuspended(thread_id))?;
        match token {
            Some(token) if token != pending.token => {
                return Err(Error::ResumeTokenMismatch {
                    expected: pending.token.to_string(),
                    got: token.to_string(),
                });
            }
            _ => {}
        }
        let node = pending.node;
        Ok(self.spawn(guard, checkpoint, Transition::Next(node), Some(value)))
    }

    /// Snapshot of the thread's latest checkpointed state
    pub async fn state(&self, thread_id: ThreadId) -> Result<Option<ConversationState>> {
        Ok(self
            .inner
            .checkpointer
            .load(&thread_id)
            .await?
            .map(|cp| cp.state))
    }

    /// The interrupt the thread is waiting on, if any
    pub async fn pending(&self, thread_id: ThreadId) -> Result<Option<PendingInterrupt>> {
        Ok(self
            .inner
            .checkpointer
            .load(&thread_id)
            .await?
            .and_then(|cp| cp.pending_interrupt))
    }

    /// Discard a thread's checkpoints. Returns whether the thread existed.
    pub async fn end_thread(&self, thread_id: ThreadId) -> Result<bool> {
        let _guard = self.acquire(thread_id)?;
        Ok(self.inner.checkpointer.delete(&thread_id).await?)
    }

    fn acquire(&self, thread_id: ThreadId) -> Result<BusyGuard> {
        if !self.inner.busy.lock().insert(thread_id) {
            return Err(Error::ThreadBusy(thread_id));
        }
        Ok(BusyGuard {
            inner: self.inner.clone(),
            thread_id,
        })
    }

    fn spawn(
        &self,
        guard: BusyGuard,
        checkpoint: Checkpoint,
        next: Transition,
        resume_value: Option<String>,
    ) -> StepEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let cx = NodeContext::new(EventSink::new(tx));
            cx.emit(StepEvent::TurnStart {
                thread_id: checkpoint.thread_id,
                resumed: resume_value.is_some(),
            });
            if let Err(e) = drive(&inner, checkpoint, next, resume_value, &cx).await {
                tracing::warn!("Turn aborted: {}", e);
                cx.emit(StepEvent::Error {
                    message: e.to_string(),
                    fatal: e.is_fatal(),
                });
            }
        });
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Recorded when a turn fails in a way the user can simply retry
pub(crate) const TURN_FAILED: &str =
    "Sorry, something went wrong while handling your message. Please try again.";
/// Recorded when the answer to an interrupt could not be acted on
pub(crate) const ANSWER_FAILED: &str =
    "Sorry, something went wrong while handling your answer. Please answer again.";

/// Run nodes until the graph ends or suspends. Recoverable node failures end
/// the turn with an apology in the transcript; only fatal errors are returned.
async fn drive(
    inner: &EngineInner,
    mut checkpoint: Checkpoint,
    mut next: Transition,
    resume_value: Option<String>,
    cx: &NodeContext,
) -> Result<()> {
    // The saved interrupt stays authoritative until the node after the resume
    // has been checkpointed.
    let mut interrupted = None;

    if let Some(value) = resume_value {
        let Transition::Next(node_id) = next else {
            return Err(Error::Other("resume without a waiting node".into()));
        };
        let node = node_for(inner, node_id)?;
        let mut state = checkpoint.state.clone();
        let transition = match node.resume(&mut state, value) {
            Ok(transition) => transition,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let suspended = checkpoint.clone();
                return recover(inner, checkpoint, Some(suspended), node_id, e, cx).await;
            }
        };
        tracing::debug!(node = %node_id, "Resumed interrupt");

        interrupted = Some(checkpoint.clone());
        checkpoint.state = state;
        checkpoint.pending_interrupt = None;
        stage(&mut checkpoint, transition);
        cx.emit(StepEvent::NodeEnd {
            node: node_id,
            next: transition,
        });
        next = transition;
    }

    loop {
        let node_id = match next {
            Transition::Next(node_id) => node_id,
            Transition::End => {
                cx.emit(StepEvent::TurnEnd {
                    thread_id: checkpoint.thread_id,
                    intent: checkpoint.state.intent,
                    usage: cx.usage(),
                });
                return Ok(());
            }
        };
        let node = node_for(inner, node_id)?;

        tracing::debug!(node = %node_id, thread = %checkpoint.thread_id, "Running node");
        cx.emit(StepEvent::NodeStart { node: node_id });

        // Nodes work on a copy; a failed node leaves the checkpoint untouched
        let mut state = checkpoint.state.clone();
        let appended_from = state.messages.len();
        let outcome = match node.run(&mut state, cx).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return recover(inner, checkpoint, interrupted, node_id, e, cx).await,
        };

        for message in state.messages.iter().skip(appended_from) {
            if message.is_assistant() {
                cx.emit(StepEvent::AssistantMessage {
                    node: node_id,
                    message: message.clone(),
                });
            }
        }
        checkpoint.state = state;

        match outcome {
            NodeOutcome::Continue(transition) => {
                commit(inner, &mut checkpoint, transition).await?;
                interrupted = None;
                cx.emit(StepEvent::NodeEnd {
                    node: node_id,
                    next: transition,
                });
                next = transition;
            }
            NodeOutcome::Suspend(payload) => {
                let token = ResumeToken::new();
                checkpoint.state.awaiting_input = true;
                checkpoint.pending_interrupt = Some(PendingInterrupt {
                    token,
                    node: node_id,
                    payload: payload.clone(),
                });
                commit(inner, &mut checkpoint, Transition::Next(node_id)).await?;
                tracing::debug!(thread = %checkpoint.thread_id, "Thread suspended for input");
                cx.emit(StepEvent::Interrupted {
                    handle: ResumeHandle {
                        thread_id: checkpoint.thread_id,
                        token,
                    },
                    payload,
                });
                return Ok(());
            }
        }
    }
}

/// Close a turn after a recoverable failure in `node_id`.
///
/// `checkpoint` is the last good state of this drive. When the failure came
/// before a resumed answer was acted on, `interrupted` holds the suspended
/// checkpoint and the thread goes back to waiting on the same interrupt.
async fn recover(
    inner: &EngineInner,
    mut checkpoint: Checkpoint,
    interrupted: Option<Checkpoint>,
    node_id: NodeId,
    error: Error,
    cx: &NodeContext,
) -> Result<()> {
    tracing::warn!(node = %node_id, thread = %checkpoint.thread_id, "Turn failed: {}", error);

    let Some(mut suspended) = interrupted else {
        checkpoint.state.push_assistant(TURN_FAILED);
        cx.emit(StepEvent::AssistantMessage {
            node: node_id,
            message: Message::assistant(TURN_FAILED),
        });
        commit(inner, &mut checkpoint, Transition::End).await?;
        cx.emit(StepEvent::TurnEnd {
            thread_id: checkpoint.thread_id,
            intent: checkpoint.state.intent,
            usage: cx.usage(),
        });
        return Ok(());
    };

    let Some(pending) = suspended.pending_interrupt.clone() else {
        return Err(error);
    };
    suspended.state.push_assistant(ANSWER_FAILED);
    cx.emit(StepEvent::AssistantMessage {
        node: node_id,
        message: Message::assistant(ANSWER_FAILED),
    });
    commit(inner, &mut suspended, Transition::Next(pending.node)).await?;
    cx.emit(StepEvent::Interrupted {
        handle: ResumeHandle {
            thread_id: suspended.thread_id,
            token: pending.token,
        },
        payload: pending.payload,
    });
    Ok(())
}

fn node_for(inner: &EngineInner, node_id: NodeId) -> Result<&BoxedNode> {
    inner
        .nodes
        .get(&node_id)
        .ok_or_else(|| Error::Other(format!("no node registered for {}", node_id)))
}

/// Advance the checkpoint past one completed step without saving it.
fn stage(checkpoint: &mut Checkpoint, next: Transition) {
    checkpoint.step += 1;
    checkpoint.next_node = match next {
        Transition::Next(node_id) => Some(node_id),
        Transition::End => None,
    };
    checkpoint.updated_at = Utc::now();
}

/// Record one completed step and persist it.
async fn commit(inner: &EngineInner, checkpoint: &mut Checkpoint, next: Transition) -> Result<()> {
    stage(checkpoint, next);
    inner.checkpointer.save(checkpoint).await?;
    Ok(())
}

/// A tool call observed during a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolActivity {
    pub tool_name: String,
    pub result: String,
    pub is_error: bool,
}

/// Everything a caller usually wants from one drive of a thread
#[derive(Debug, Clone, Default)]
pub struct TurnSummary {
    /// Assistant entries appended during the drive, in order
    pub messages: Vec<Message>,
    pub interrupt: Option<(ResumeHandle, InterruptPayload)>,
    pub error: Option<String>,
    /// The graph reached its end route
    pub completed: bool,
    pub tool_calls: Vec<ToolActivity>,
    pub usage: Usage,
}

impl TurnSummary {
    /// Drain a step-event stream up to its terminal event.
    pub async fn collect(mut stream: StepEventStream) -> Self {
        let mut summary = Self::default();
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            match event {
                StepEvent::AssistantMessage { message, .. } => summary.messages.push(message),
                StepEvent::ToolExecutionEnd {
                    tool_name,
                    result,
                    is_error,
                    ..
                } => summary.tool_calls.push(ToolActivity {
                    tool_name,
                    result,
                    is_error,
                }),
                StepEvent::Interrupted { handle, payload } => {
                    summary.interrupt = Some((handle, payload))
                }
                StepEvent::TurnEnd { usage, .. } => {
                    summary.completed = true;
                    summary.usage = usage;
                }
                StepEvent::Error { message, .. } => summary.error = Some(message),
                _ => {}
            }
            if terminal {
                break;
            }
        }
        summary
    }

    /// Text of the last assistant entry, if any
    pub fn last_text(&self) -> Option<String> {
        self.messages.last().map(|m| m.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DataError, QueryOutput, StatementGuard};
    use crate::checkpoint::{CheckpointError, MemoryCheckpointer};
    use crate::state::IntentFlag;
    use crate::testing::{RecordingDataAccess, ScriptedClassifier, ScriptedTransport, tool_call_message};
    use async_trait::async_trait;
    use docent_ai::Context;
    use tokio::sync::Notify;

    struct Harness {
        engine: Engine,
        transport: Arc<ScriptedTransport>,
        classifier: Arc<ScriptedClassifier>,
        data: Arc<RecordingDataAccess>,
    }

    fn harness(
        verdicts: Vec<Result<crate::capability::IntentVerdict>>,
        replies: Vec<Message>,
        data: std::result::Result<QueryOutput, DataError>,
    ) -> Harness {
        let transport = Arc::new(ScriptedTransport::new(replies));
        let classifier = Arc::new(ScriptedClassifier::new(verdicts));
        let data = Arc::new(RecordingDataAccess::returning(data));
        let engine = Engine::new(
            EngineConfig::new(Model::gemini("test")),
            Capabilities {
                transport: transport.clone(),
                classifier: classifier.clone(),
                safety: Arc::new(StatementGuard::new()),
                data: data.clone(),
            },
            Arc::new(MemoryCheckpointer::new()),
        )
        .unwrap();
        Harness {
            engine,
            transport,
            classifier,
            data,
        }
    }

    fn no_rows() -> std::result::Result<QueryOutput, DataError> {
        Ok(QueryOutput::Rows { rows: vec![] })
    }

    fn booking_reply(booked: bool, answer: &str) -> Message {
        Message::assistant(serde_json::json!({"booked": booked, "answer": answer}).to_string())
    }

    #[tokio::test]
    async fn test_museum_question_ends_turn() {
        let h = harness(
            vec![ScriptedClassifier::museum()],
            vec![
                tool_call_message(&[(
                    "call_0",
                    "read_db",
                    serde_json::json!({"query": "SELECT opening_time, closing_time FROM museums WHERE name = 'City Art Museum'"}),
                )]),
                Message::assistant("The City Art Museum opens at 09:00 and closes at 17:00."),
            ],
            Ok(QueryOutput::Rows {
                rows: vec![
                    serde_json::json!({"opening_time": "09:00", "closing_time": "17:00"})
                        .as_object()
                        .unwrap()
                        .clone(),
                ],
            }),
        );
        let thread = ThreadId::new();

        let summary = TurnSummary::collect(
            h.engine
                .send(thread, "What are the opening hours of the City Art Museum?")
                .await
                .unwrap(),
        )
        .await;

        assert!(summary.completed, "error: {:?}", summary.error);
        assert!(summary.interrupt.is_none());
        assert_eq!(summary.messages.len(), 1);
        assert!(summary.last_text().unwrap().contains("09:00"));
        assert_eq!(summary.tool_calls.len(), 1);
        assert_eq!(h.data.calls(), 1);

        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(state.intent, IntentFlag::Museum);
        assert_eq!(state.messages.len(), 2);
        assert!(h.engine.pending(thread).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_booking_suspends_and_resumes_to_completion() {
        let h = harness(
            vec![ScriptedClassifier::ticket()],
            vec![
                booking_reply(
                    false,
                    "Please confirm: 2 tickets for City Art Museum on 2030-01-01 for Jane Doe (jane@x.com)?",
                ),
                tool_call_message(&[(
                    "call_0",
                    "write_and_update_db",
                    serde_json::json!({"query": "INSERT INTO tickets (museum_id, visitor_name, visitor_email, num_tickets, visit_date, status) VALUES (1, 'Jane Doe', 'jane@x.com', 2, '2030-01-01', 'BOOKED') RETURNING ticket_id"}),
                )]),
                booking_reply(true, "Your booking is confirmed. Ticket id: 7."),
            ],
            Ok(QueryOutput::Rows {
                rows: vec![serde_json::json!({"ticket_id": 7}).as_object().unwrap().clone()],
            }),
        );
        let thread = ThreadId::new();

        let first = TurnSummary::collect(
            h.engine
                .send(
                    thread,
                    "Book 2 tickets for City Art Museum on 2030-01-01, Jane Doe, jane@x.com",
                )
                .await
                .unwrap(),
        )
        .await;
        let (handle, payload) = first.interrupt.expect("booking should suspend");
        assert!(!first.completed);
        assert!(payload.message.starts_with("Please confirm"));
        assert_eq!(handle.thread_id, thread);
        assert_eq!(h.data.calls(), 0);

        let suspended = h.engine.state(thread).await.unwrap().unwrap();
        assert!(suspended.awaiting_input);
        assert_eq!(h.engine.pending(thread).await.unwrap().unwrap().node, NodeId::HumanInput);

        let second = TurnSummary::collect(h.engine.resume_at(&handle, "yes").await.unwrap()).await;
        assert!(second.completed, "error: {:?}", second.error);
        assert_eq!(second.last_text().as_deref(), Some("Your booking is confirmed. Ticket id: 7."));
        assert_eq!(h.data.calls(), 1);
        // resume does not reclassify
        assert_eq!(h.classifier.calls(), 1);

        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(state.collected_details, vec!["yes".to_string()]);
        assert!(!state.awaiting_input);
        let texts: Vec<String> = state.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts[2], "yes");
        assert_eq!(texts.len(), 4);
    }

    #[tokio::test]
    async fn test_out_of_scope_touches_no_data() {
        let h = harness(
            vec![ScriptedClassifier::out_of_scope(
                "I can only help with museums and ticket bookings.",
            )],
            vec![],
            no_rows(),
        );
        let thread = ThreadId::new();

        let summary = TurnSummary::collect(
            h.engine.send(thread, "What's the weather today?").await.unwrap(),
        )
        .await;

        assert!(summary.completed);
        assert_eq!(
            summary.last_text().as_deref(),
            Some("I can only help with museums and ticket bookings.")
        );
        assert_eq!(h.data.calls(), 0);
        assert!(h.transport.contexts().is_empty());
        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(
            state.out_of_scope_message,
            "I can only help with museums and ticket bookings."
        );
    }

    #[tokio::test]
    async fn test_unscoped_write_is_rejected_before_data_access() {
        let h = harness(
            vec![ScriptedClassifier::ticket()],
            vec![
                tool_call_message(&[(
                    "call_0",
                    "write_and_update_db",
                    serde_json::json!({"query": "UPDATE tickets SET status = 'CANCELLED'"}),
                )]),
                booking_reply(false, "Which booking should I cancel?"),
            ],
            no_rows(),
        );

        let summary = TurnSummary::collect(
            h.engine.send(ThreadId::new(), "Cancel my tickets").await.unwrap(),
        )
        .await;

        assert_eq!(h.data.calls(), 0);
        assert_eq!(summary.tool_calls.len(), 1);
        assert!(
            summary.tool_calls[0]
                .result
                .contains("not safe to write or update the records")
        );
        assert!(summary.interrupt.is_some());
    }

    #[tokio::test]
    async fn test_empty_resume_reprompts() {
        let h = harness(
            vec![ScriptedClassifier::ticket()],
            vec![
                booking_reply(false, "What email should the tickets go to?"),
                booking_reply(false, "I still need an email address for the booking."),
            ],
            no_rows(),
        );
        let thread = ThreadId::new();

        TurnSummary::collect(h.engine.send(thread, "Book 1 ticket").await.unwrap()).await;
        let second = TurnSummary::collect(h.engine.resume(thread, "").await.unwrap()).await;

        let (_, payload) = second.interrupt.expect("should ask again");
        assert_eq!(payload.message, "I still need an email address for the booking.");
        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(state.collected_details, vec![String::new()]);
    }

    #[tokio::test]
    async fn test_many_resume_cycles() {
        let h = harness(
            vec![ScriptedClassifier::ticket()],
            vec![
                booking_reply(false, "Which museum?"),
                booking_reply(false, "Your name?"),
                booking_reply(false, "Your email?"),
                booking_reply(false, "How many tickets?"),
                booking_reply(false, "Confirm?"),
                booking_reply(true, "Booked."),
            ],
            no_rows(),
        );
        let thread = ThreadId::new();
        let mut summary =
            TurnSummary::collect(h.engine.send(thread, "I want tickets").await.unwrap()).await;

        let answers = ["City Art Museum", "Jane Doe", "jane@x.com", "2", "yes"];
        for answer in answers {
            let (handle, _) = summary.interrupt.take().expect("should be suspended");
            summary = TurnSummary::collect(h.engine.resume_at(&handle, answer).await.unwrap()).await;
        }

        assert!(summary.completed);
        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(state.collected_details, answers.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn test_resume_rejections() {
        let h = harness(
            vec![ScriptedClassifier::museum(), ScriptedClassifier::ticket()],
            vec![
                Message::assistant("It opens at 9."),
                booking_reply(false, "Please confirm."),
            ],
            no_rows(),
        );

        let unknown = ThreadId::new();
        assert!(matches!(
            h.engine.resume(unknown, "yes").await,
            Err(Error::ThreadNotFound(id)) if id == unknown
        ));

        let thread = ThreadId::new();
        TurnSummary::collect(h.engine.send(thread, "When does it open?").await.unwrap()).await;
        // replaying a resume on a completed thread is rejected
        assert!(matches!(
            h.engine.resume(thread, "yes").await,
            Err(Error::NotSuspended(_))
        ));

        let summary = TurnSummary::collect(h.engine.send(thread, "Book tickets").await.unwrap()).await;
        let (handle, _) = summary.interrupt.unwrap();
        let stale = ResumeHandle {
            thread_id: thread,
            token: ResumeToken::new(),
        };
        assert!(matches!(
            h.engine.resume_at(&stale, "yes").await,
            Err(Error::ResumeTokenMismatch { .. })
        ));
        // a suspended thread does not accept a new turn
        assert!(matches!(
            h.engine.send(thread, "hello again").await,
            Err(Error::ThreadSuspended(_))
        ));
        assert!(h.engine.pending(thread).await.unwrap().is_some());
        assert_eq!(h.engine.pending(thread).await.unwrap().unwrap().token, handle.token);
    }

    #[tokio::test]
    async fn test_malformed_classification_apologises_in_transcript() {
        let h = harness(
            vec![
                Err(Error::MalformedOutput("missing is_ticket".into())),
                ScriptedClassifier::museum(),
            ],
            vec![Message::assistant("Open 9 to 5.")],
            no_rows(),
        );
        let thread = ThreadId::new();
        let summary = TurnSummary::collect(h.engine.send(thread, "hi").await.unwrap()).await;

        assert!(summary.completed);
        assert!(summary.error.is_none());
        assert_eq!(summary.last_text().as_deref(), Some(TURN_FAILED));
        assert_eq!(h.data.calls(), 0);

        let state = h.engine.state(thread).await.unwrap().unwrap();
        let texts: Vec<String> = state.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["hi".to_string(), TURN_FAILED.to_string()]);
        assert!(h.engine.pending(thread).await.unwrap().is_none());

        // the next turn sees the failed exchange
        let next =
            TurnSummary::collect(h.engine.send(thread, "When do you open?").await.unwrap()).await;
        assert_eq!(next.last_text().as_deref(), Some("Open 9 to 5."));
        let histories = h.classifier.histories();
        assert_eq!(histories.len(), 2);
        assert!(histories[1].iter().any(|m| m.text() == TURN_FAILED));
        assert_eq!(histories[1].last().unwrap().text(), "When do you open?");
    }

    #[tokio::test]
    async fn test_provider_failure_after_resume_keeps_interrupt() {
        let h = harness(
            vec![ScriptedClassifier::ticket()],
            vec![booking_reply(false, "What name should the booking be under?")],
            no_rows(),
        );
        h.transport
            .push_error(docent_ai::Error::api("overloaded_error", "overloaded"));
        h.transport
            .push(booking_reply(false, "Thanks Jane. Which date would you like?"));
        let thread = ThreadId::new();

        let first = TurnSummary::collect(h.engine.send(thread, "Book tickets").await.unwrap()).await;
        let (handle, _) = first.interrupt.expect("booking should suspend");

        let failed =
            TurnSummary::collect(h.engine.resume_at(&handle, "Jane Doe").await.unwrap()).await;
        assert!(!failed.completed);
        assert!(failed.error.is_none());
        assert_eq!(failed.last_text().as_deref(), Some(ANSWER_FAILED));
        let (again, payload) = failed.interrupt.expect("thread should still wait for input");
        assert_eq!(again.token, handle.token);
        assert_eq!(payload.message, "What name should the booking be under?");

        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert!(state.awaiting_input);
        assert!(state.collected_details.is_empty());
        assert_eq!(state.last_assistant_text().as_deref(), Some(ANSWER_FAILED));
        assert_eq!(h.engine.pending(thread).await.unwrap().unwrap().token, handle.token);

        let retried =
            TurnSummary::collect(h.engine.resume_at(&again, "Jane Doe").await.unwrap()).await;
        let (_, payload) = retried.interrupt.expect("booking asks the next question");
        assert_eq!(payload.message, "Thanks Jane. Which date would you like?");

        let state = h.engine.state(thread).await.unwrap().unwrap();
        assert_eq!(state.collected_details, vec!["Jane Doe".to_string()]);
        assert_eq!(h.classifier.calls(), 1);
    }

    /// Checkpoint store whose writes always fail
    struct FailingCheckpointer;

    #[async_trait]
    impl Checkpointer for FailingCheckpointer {
        async fn load(
            &self,
            _thread_id: &ThreadId,
        ) -> std::result::Result<Option<Checkpoint>, CheckpointError> {
            Ok(None)
        }

        async fn save(&self, _checkpoint: &Checkpoint) -> std::result::Result<(), CheckpointError> {
            Err(CheckpointError::Storage("disk full".into()))
        }

        async fn delete(&self, _thread_id: &ThreadId) -> std::result::Result<bool, CheckpointError> {
            Ok(false)
        }

        async fn list(&self) -> std::result::Result<Vec<ThreadId>, CheckpointError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_fatal() {
        let engine = Engine::new(
            EngineConfig::new(Model::gemini("test")),
            Capabilities {
                transport: Arc::new(ScriptedTransport::new(vec![])),
                classifier: Arc::new(ScriptedClassifier::new(vec![ScriptedClassifier::museum()])),
                safety: Arc::new(StatementGuard::new()),
                data: Arc::new(RecordingDataAccess::returning(no_rows())),
            },
            Arc::new(FailingCheckpointer),
        )
        .unwrap();

        let summary =
            TurnSummary::collect(engine.send(ThreadId::new(), "hours?").await.unwrap()).await;

        assert!(!summary.completed);
        assert!(summary.messages.is_empty());
        assert!(summary.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_end_thread_discards_checkpoint() {
        let h = harness(
            vec![ScriptedClassifier::out_of_scope("Only museums, sorry.")],
            vec![],
            no_rows(),
        );
        let thread = ThreadId::new();
        TurnSummary::collect(h.engine.send(thread, "tell me a joke").await.unwrap()).await;

        assert!(h.engine.end_thread(thread).await.unwrap());
        assert!(h.engine.state(thread).await.unwrap().is_none());
        assert!(!h.engine.end_thread(thread).await.unwrap());
    }

    /// Transport that blocks until released
    struct GatedTransport {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn complete(&self, _context: &Context, _config: &RunConfig) -> docent_ai::Result<Message> {
            self.gate.notified().await;
            Ok(Message::assistant("Open daily."))
        }
    }

    #[tokio::test]
    async fn test_thread_cannot_be_driven_twice() {
        let gate = Arc::new(Notify::new());
        let engine = Engine::new(
            EngineConfig::new(Model::gemini("test")),
            Capabilities {
                transport: Arc::new(GatedTransport { gate: gate.clone() }),
                classifier: Arc::new(ScriptedClassifier::new(vec![ScriptedClassifier::museum()])),
                safety: Arc::new(StatementGuard::new()),
                data: Arc::new(RecordingDataAccess::returning(no_rows())),
            },
            Arc::new(MemoryCheckpointer::new()),
        )
        .unwrap();
        let thread = ThreadId::new();

        let stream = engine.send(thread, "When are you open?").await.unwrap();
        assert!(matches!(
            engine.send(thread, "Hello?").await,
            Err(Error::ThreadBusy(_))
        ));
        // other threads are unaffected
        assert!(engine.state(ThreadId::new()).await.unwrap().is_none());

        gate.notify_one();
        let summary = TurnSummary::collect(stream).await;
        assert!(summary.completed);
        assert_eq!(summary.last_text().as_deref(), Some("Open daily."));
    }

    #[tokio::test]
    async fn test_event_order_for_museum_turn() {
        let h = harness(
            vec![ScriptedClassifier::museum()],
            vec![Message::assistant("Open 9 to 5.")],
            no_rows(),
        );
        let mut stream = h.engine.send(ThreadId::new(), "hours?").await.unwrap();
        let mut kinds = Vec::new();
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
            if terminal {
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![
                "turn_start",
                "node_start",
                "node_end",
                "node_start",
                "assistant_message",
                "node_end",
                "turn_end"
            ]
        );
    }
}
