//! Stage trait and the context a stage runs with.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeOptions;
use crate::error::ChatLoopError;
use crate::provider::ChatProvider;
use crate::registry::{SessionId, ThreadId, ThreadState};
use crate::tools::ToolSet;
use crate::types::{GenerationSettings, StreamEvent};

/// Name of a stage in a conversation graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageName(Cow<'static, str>);

impl StageName {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for StageName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for StageName {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&StageName> for StageName {
    fn from(name: &StageName) -> Self {
        name.clone()
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a stage asks the graph to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Follow the stage's unconditional edge.
    Continue,
    /// Follow the edge labelled with this route.
    Route(String),
    /// Park the thread at this stage until new input arrives.
    Suspend,
}

impl StageOutcome {
    pub fn route(label: impl Into<String>) -> Self {
        Self::Route(label.into())
    }
}

/// Channel a running stage uses to surface events to the caller.
///
/// Bounded: a stage that emits faster than the caller reads waits in `emit`,
/// which in turn holds back the next pull from the provider.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<Result<StreamEvent, ChatLoopError>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<Result<StreamEvent, ChatLoopError>>) -> Self {
        Self { tx }
    }

    /// Emitter plus the receiving half, buffering at most `buffer` events.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Result<StreamEvent, ChatLoopError>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// Send an event. Returns `false` once the caller has gone away.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    pub(crate) async fn fail(&self, err: ChatLoopError) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }
}

/// Everything a stage may use besides the thread state.
pub struct StageContext {
    pub thread_id: ThreadId,
    pub session: SessionId,
    input: Option<String>,
    pub events: EventEmitter,
    pub provider: Arc<dyn ChatProvider>,
    pub tools: Arc<ToolSet>,
    pub system_prompt: Option<String>,
    pub settings: GenerationSettings,
    pub bridge: BridgeOptions,
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(
        thread_id: ThreadId,
        session: SessionId,
        events: EventEmitter,
        provider: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            thread_id,
            session,
            input: None,
            events,
            provider,
            tools: Arc::new(ToolSet::new()),
            system_prompt: None,
            settings: GenerationSettings::default(),
            bridge: BridgeOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolSet>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_bridge(mut self, bridge: BridgeOptions) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Take the pending user input. Later calls return `None`.
    pub fn take_input(&mut self) -> Option<String> {
        self.input.take()
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub async fn emit(&self, event: StreamEvent) -> bool {
        self.events.emit(event).await
    }
}

/// One named unit of work in a conversation graph.
///
/// A stage mutates the working copy it is given; the runtime commits that
/// copy only if the stage returns `Ok`.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(
        &self,
        state: &mut ThreadState,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome, ChatLoopError>;
}
