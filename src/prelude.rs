//! Convenience re-exports for common use.

pub use crate::config::{ChatLoopConfig, ProviderKind, RuntimeOptions};
pub use crate::error::{ChatLoopError, Result};
pub use crate::graph::{ConversationGraph, StageName, StageOutcome};
pub use crate::provider::{ChatProvider, ProviderRequest, ResponseFragment};
pub use crate::registry::{ConversationThread, SessionId, ThreadId, ThreadRegistry};
pub use crate::runtime::ConversationRuntime;
pub use crate::tools::{AgentTool, Tool, ToolParameters};
pub use crate::types::{
    EventStream, FinishReason, GenerationSettings, Message, Role, StreamEvent, ToolCall, Usage,
};
