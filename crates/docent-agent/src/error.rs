//! Error types for docent-agent

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::state::ThreadId;

/// Result type alias using docent-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI provider layer
    #[error(transparent)]
    Ai(#[from] docent_ai::Error),

    /// The checkpoint store failed to load or persist state
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// No checkpoint exists for the thread (never started, deleted or expired)
    #[error("No conversation found for thread {0}")]
    ThreadNotFound(ThreadId),

    /// Resume was called on a thread that is not waiting for input
    #[error("Thread {0} is not waiting for input")]
    NotSuspended(ThreadId),

    /// Resume handle does not belong to the pending interrupt
    #[error("Resume token mismatch: expected {expected}, got {got}")]
    ResumeTokenMismatch { expected: String, got: String },

    /// A new turn was sent while the thread waits for a resume value
    #[error("Thread {0} is waiting for input; resume it instead")]
    ThreadSuspended(ThreadId),

    /// Another caller is currently driving this thread
    #[error("Thread {0} is already running")]
    ThreadBusy(ThreadId),

    /// A capability call failed outright
    #[error("Capability failed: {0}")]
    Capability(String),

    /// A capability answered, but not in the agreed shape
    #[error("Malformed capability output: {0}")]
    MalformedOutput(String),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error should end the session rather than a single turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Checkpoint(_) | Error::Ai(docent_ai::Error::InvalidApiKey))
    }
}
