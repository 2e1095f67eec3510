//! Checkpoint records and the store abstraction

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    graph::{InterruptPayload, NodeId},
    state::{ConversationState, ThreadId},
};

/// Errors raised by checkpoint stores
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint storage error: {0}")]
    Storage(String),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Binds a resume call to one specific suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Uuid);

impl ResumeToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handed to the caller with an interrupt; pass it back to resume exactly there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeHandle {
    pub thread_id: ThreadId,
    pub token: ResumeToken,
}

/// A suspension waiting for its resume value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub token: ResumeToken,
    /// The node that suspended and will receive the value
    pub node: NodeId,
    pub payload: InterruptPayload,
}

/// Full snapshot of a thread after a node completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: ConversationState,
    /// Number of node executions on this thread so far
    pub step: u64,
    /// Node to run next; `None` once the turn reached its end
    pub next_node: Option<NodeId>,
    pub pending_interrupt: Option<PendingInterrupt>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A checkpoint for a thread that has not run any node yet
    pub fn initial(thread_id: ThreadId, state: ConversationState) -> Self {
        Self {
            thread_id,
            state,
            step: 0,
            next_node: None,
            pending_interrupt: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_interrupt.is_some()
    }
}

/// Durable (or not) storage of checkpoints keyed by thread.
///
/// Implementations must tolerate concurrent calls for distinct threads.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Latest checkpoint for the thread
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the thread's checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Discard the thread. Returns whether anything was removed.
    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError>;

    /// Threads currently held by the store
    async fn list(&self) -> Result<Vec<ThreadId>, CheckpointError>;
}

/// Process-local checkpoint store.
///
/// With an idle TTL set, threads not saved within the TTL are treated as gone
/// and removed on the next access.
#[derive(Default)]
pub struct MemoryCheckpointer {
    checkpoints: RwLock<HashMap<ThreadId, Checkpoint>>,
    idle_ttl: Option<Duration>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire threads that have been idle longer than `ttl`
    pub fn with_idle_ttl(ttl: Duration) -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            idle_ttl: Some(ttl),
        }
    }

    fn is_expired(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.idle_ttl else {
            return false;
        };
        let idle = now.signed_duration_since(checkpoint.updated_at);
        idle.to_std().is_ok_and(|idle| idle > ttl)
    }

    /// Drop every expired thread, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut checkpoints = self.checkpoints.write();
        let before = checkpoints.len();
        checkpoints.retain(|_, cp| !self.is_expired(cp, now));
        let removed = before - checkpoints.len();
        if removed > 0 {
            tracing::debug!("Expired {} idle thread(s)", removed);
        }
        removed
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let now = Utc::now();
        {
            let checkpoints = self.checkpoints.read();
            match checkpoints.get(thread_id) {
                Some(cp) if !self.is_expired(cp, now) => return Ok(Some(cp.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        tracing::debug!(thread = %thread_id, "Checkpoint expired");
        self.checkpoints.write().remove(thread_id);
        Ok(None)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .insert(checkpoint.thread_id, checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<bool, CheckpointError> {
        Ok(self.checkpoints.write().remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let now = Utc::now();
        Ok(self
            .checkpoints
            .read()
            .values()
            .filter(|cp| !self.is_expired(cp, now))
            .map(|cp| cp.thread_id)
            .collect())
    }
}
