//! docent-ai: LLM provider layer
//!
//! This crate provides the message types, the provider abstraction, and the
//! Gemini provider used by the docent agent. Providers support both function
//! calling and schema-constrained JSON output.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageEvent, MessageEventStream};
pub use types::*;
