//! Streaming types.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::message::Message;
use super::usage::Usage;
use crate::error::ChatLoopError;

/// An event surfaced incrementally while a response is generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text content. Never empty.
    TextDelta { text: String },
    /// A fragment of a tool call being assembled.
    ToolCallDelta {
        /// Position of the call within the response.
        index: u32,
        /// Correlation id, once the provider has sent it.
        id: Option<String>,
        name: String,
        arguments_delta: String,
    },
    /// The finished assistant message. Always the last event on success.
    Completion {
        message: Message,
        stop_reason: FinishReason,
        usage: Usage,
    },
}

impl StreamEvent {
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Completion { .. })
    }
}

/// Ordered event sequence; an `Err` item is terminal.
pub type EventStream = BoxStream<'static, Result<StreamEvent, ChatLoopError>>;
