//! SQL tools exposed to the generation model

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    capability::{DataAccess, QueryMode, QuerySafety},
    tool::{Tool, ToolResult},
};

pub const READ_TOOL: &str = "read_db";
pub const WRITE_TOOL: &str = "write_and_update_db";

/// Runs one model-supplied SQL statement after it passes the safety check for
/// the tool's mode.
pub struct SqlTool {
    mode: QueryMode,
    safety: Arc<dyn QuerySafety>,
    data: Arc<dyn DataAccess>,
}

impl SqlTool {
    /// `read_db`: SELECT-only access to museums and tickets
    pub fn read(safety: Arc<dyn QuerySafety>, data: Arc<dyn DataAccess>) -> Self {
        Self {
            mode: QueryMode::Read,
            safety,
            data,
        }
    }

    /// `write_and_update_db`: scoped changes to ticket bookings
    pub fn write(safety: Arc<dyn QuerySafety>, data: Arc<dyn DataAccess>) -> Self {
        Self {
            mode: QueryMode::Write,
            safety,
            data,
        }
    }

    fn rejection(&self) -> &'static str {
        match self.mode {
            QueryMode::Read => {
                "The query given by you is not safe to read the records. Try again with some other query"
            }
            QueryMode::Write => {
                "The query given by you is not safe to write or update the records. Try again with some other query"
            }
        }
    }
}

#[async_trait]
impl Tool for SqlTool {
    fn name(&self) -> &str {
        match self.mode {
            QueryMode::Read => READ_TOOL,
            QueryMode::Write => WRITE_TOOL,
        }
    }

    fn description(&self) -> &str {
        match self.mode {
            QueryMode::Read => {
                "Read records from the museum database (tables: museums, tickets). \
                 Pass exactly one SQL SELECT statement."
            }
            QueryMode::Write => {
                "Create or change ticket bookings. Pass exactly one INSERT, UPDATE or DELETE \
                 statement on the tickets table; UPDATE and DELETE need a WHERE clause. Only use \
                 after the user explicitly confirmed."
            }
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SQLite statement"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, tool_call_id: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(|q| q.as_str()) else {
            return ToolResult::error("Missing required argument: query");
        };

        match self.safety.check(query, self.mode).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(tool = self.name(), call = tool_call_id, "Unsafe query rejected");
                return ToolResult::text(self.rejection());
            }
            Err(e) => {
                // No verdict means no execution
                tracing::warn!(tool = self.name(), "Safety check failed: {}", e);
                return ToolResult::error(format!(
                    "Could not verify the query is safe ({}). The query was not run.",
                    e
                ));
            }
        }

        match self.data.execute(query).await {
            Ok(output) => {
                tracing::debug!(tool = self.name(), call = tool_call_id, "Query executed");
                ToolResult::text(output.to_tool_text())
            }
            Err(e) => ToolResult::error(format!(
                "The database could not run the query: {}. Check the statement against the schema \
                 or explain the problem to the user.",
                e
            )),
        }
    }
}
