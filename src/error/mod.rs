//! Error types for chatloop.

use thiserror::Error;

use crate::graph::{GraphError, StageName};
use crate::registry::{SessionId, ThreadId};

/// Primary error type for all chatloop operations.
#[derive(Error, Debug)]
pub enum ChatLoopError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The blocking producer failed while being pulled.
    #[error("Provider fault ({provider}): {message}")]
    ProviderFault { provider: String, message: String },

    /// A conversation stage failed; the thread stays at `stage`.
    #[error("Stage '{stage}' failed on thread {thread_id}: {source}")]
    StageFault {
        thread_id: ThreadId,
        stage: StageName,
        #[source]
        source: Box<ChatLoopError>,
    },

    /// Two sessions resolved to one thread. Never recoverable.
    #[error("Thread {thread_id} is bound to both '{session}' and '{other_session}'")]
    IdentifierCollision {
        session: SessionId,
        other_session: SessionId,
        thread_id: ThreadId,
    },

    #[error("Thread {thread_id} is at stage '{stage}', not awaiting input")]
    NotAwaitingInput { thread_id: ThreadId, stage: StageName },

    #[error("Thread {thread_id} reached a terminal stage and accepts no further input")]
    ThreadClosed { thread_id: ThreadId },

    #[error("Thread {thread_id} has no faulted stage to retry")]
    NothingToRetry { thread_id: ThreadId },

    #[error("Run exceeded {limit} stage steps without suspending")]
    StepLimitExceeded { limit: usize },

    #[error("Run canceled")]
    Canceled,

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Tool execution error ({tool_name}): {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Provider,
    Stage,
    Lifecycle,
    Invariant,
    ToolExecution,
    Unknown,
}

impl ChatLoopError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a provider fault.
    pub fn provider_fault(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFault {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) | Self::Io(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::Graph(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::ProviderFault { .. } => ErrorCategory::Provider,
            Self::StageFault { .. } | Self::StepLimitExceeded { .. } => ErrorCategory::Stage,
            Self::NotAwaitingInput { .. }
            | Self::ThreadClosed { .. }
            | Self::NothingToRetry { .. }
            | Self::Canceled => ErrorCategory::Lifecycle,
            Self::IdentifierCollision { .. } => ErrorCategory::Invariant,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether the caller may reasonably try the same thing again.
    ///
    /// Stage faults are retryable because the thread keeps its stage pointer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StageFault { .. } | Self::Canceled => true,
            _ => matches!(
                self.category(),
                ErrorCategory::RateLimit
                    | ErrorCategory::Network
                    | ErrorCategory::Timeout
                    | ErrorCategory::Server
                    | ErrorCategory::Provider
            ),
        }
    }

    /// Invariant violations that must abort rather than be tolerated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IdentifierCollision { .. })
    }

    /// Unwrap nested stage faults to the error that caused them.
    pub fn root_cause(&self) -> &ChatLoopError {
        match self {
            Self::StageFault { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ChatLoopError>;
