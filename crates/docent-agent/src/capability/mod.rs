//! External capabilities the graph consumes: intent classification, query
//! safety and data access.

mod classifier;
mod guard;
mod safety;

pub use classifier::LlmClassifier;
pub use guard::{Rejection, StatementGuard};
pub use safety::{LayeredSafety, LlmQuerySafety};

use async_trait::async_trait;
use docent_ai::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::Result;

/// Reply sent when the classifier marks a message out of scope without saying why.
pub const DEFAULT_REDIRECT: &str = "Sorry, I can only help with museum details and ticket bookings. \
     Try asking about a museum or booking tickets.";

/// Raw classifier answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub is_ticket: bool,
    pub is_museum: bool,
    #[serde(default)]
    pub redirect_text: String,
}

/// A classification with the output contract enforced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Ticket,
    Museum,
    OutOfScope(String),
}

impl IntentVerdict {
    /// Collapse the verdict to exactly one intent. Ticket wins over museum when
    /// both are set; an out-of-scope verdict always carries non-empty text.
    pub fn resolve(self) -> Intent {
        match (self.is_ticket, self.is_museum) {
            (true, museum) => {
                if museum {
                    tracing::warn!("Classifier flagged both ticket and museum; treating as ticket");
                }
                Intent::Ticket
            }
            (false, true) => Intent::Museum,
            (false, false) => {
                let text = self.redirect_text.trim();
                if text.is_empty() {
                    Intent::OutOfScope(DEFAULT_REDIRECT.to_string())
                } else {
                    Intent::OutOfScope(text.to_string())
                }
            }
        }
    }
}

/// Decides what a conversation is asking for
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, history: &[Message]) -> Result<IntentVerdict>;
}

/// What a statement is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Read,
    Write,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Read => f.write_str("read"),
            QueryMode::Write => f.write_str("write"),
        }
    }
}

/// Judges whether a SQL statement may run in the given mode
#[async_trait]
pub trait QuerySafety: Send + Sync {
    async fn check(&self, sql: &str, mode: QueryMode) -> Result<bool>;
}

/// Failure reported by the data store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// The store refused the statement (syntax, constraint, unknown column, ...)
    #[error("statement rejected by the database: {0}")]
    Rejected(String),

    /// The store could not be reached
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

/// Result of executing one statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    /// Rows keyed by column name
    Rows {
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
    },
    /// A statement that returned no rows
    Affected {
        rows_affected: u64,
        last_insert_id: Option<i64>,
    },
}

impl QueryOutput {
    /// Render for the model as the tool result text
    pub fn to_tool_text(&self) -> String {
        match self {
            QueryOutput::Rows { rows } if rows.is_empty() => "No rows returned.".to_string(),
            QueryOutput::Rows { rows } => {
                serde_json::to_string(rows).unwrap_or_else(|_| format!("{} row(s)", rows.len()))
            }
            QueryOutput::Affected {
                rows_affected,
                last_insert_id,
            } => match last_insert_id {
                Some(id) => format!("{} row(s) affected, last insert id {}", rows_affected, id),
                None => format!("{} row(s) affected", rows_affected),
            },
        }
    }
}

/// Executes single SQL statements against the museum store
#[async_trait]
pub trait DataAccess: Send + Sync {
    async fn execute(&self, sql: &str) -> std::result::Result<QueryOutput, DataError>;
}
