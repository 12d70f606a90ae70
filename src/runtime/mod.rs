//! Conversation runtime: drives session-bound threads through the graph.
//!
//! Each `submit` or `retry` spawns one run. A run locks its thread, resumes
//! at the stored stage pointer, and executes stages until one suspends or
//! the terminal stage is reached. Every stage works on a copy of the thread
//! state that is committed only when the stage succeeds, so a fault leaves
//! the thread exactly where it was. A stage that panics is treated as one
//! that failed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bridge::BridgeOptions;
use crate::config::{ChatLoopConfig, RuntimeOptions};
use crate::error::ChatLoopError;
use crate::graph::{ConversationGraph, EventEmitter, StageContext, StageName, StageOutcome};
use crate::provider::ChatProvider;
use crate::registry::{ConversationThread, FaultRecord, SessionId, ThreadId, ThreadRegistry, ThreadState};
use crate::tools::{Tool, ToolSet};
use crate::types::{EventStream, GenerationSettings};

/// Events a run may queue ahead of the caller.
const EVENT_BUFFER: usize = 1;

#[derive(Debug)]
enum RunKind {
    Submit(String),
    Retry,
}

/// Entry point for callers. Cheap to clone; clones share threads.
#[derive(Clone)]
pub struct ConversationRuntime {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ThreadRegistry>,
    graph: Arc<ConversationGraph>,
    tools: Arc<ToolSet>,
    system_prompt: Option<String>,
    settings: GenerationSettings,
    options: RuntimeOptions,
}

impl ConversationRuntime {
    /// Runtime over the standard graph with no tools.
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            registry: Arc::new(ThreadRegistry::new()),
            graph: Arc::new(ConversationGraph::standard()),
            tools: Arc::new(ToolSet::new()),
            system_prompt: None,
            settings: GenerationSettings::default(),
            options: RuntimeOptions::default(),
        }
    }

    /// Take system prompt, generation settings and runtime options from config.
    pub fn with_config(mut self, config: &ChatLoopConfig) -> Self {
        self.system_prompt = config.system_prompt.clone();
        self.settings = config.generation.clone();
        self.options = config.runtime.clone();
        self
    }

    pub fn with_graph(mut self, graph: ConversationGraph) -> Self {
        self.graph = Arc::new(graph);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        Arc::make_mut(&mut self.tools).register(Arc::new(tool));
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Share a registry with another runtime.
    pub fn with_registry(mut self, registry: Arc<ThreadRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &ConversationGraph {
        &self.graph
    }

    /// Existing thread for `session`.
    pub fn thread(&self, session: impl Into<SessionId>) -> Option<Arc<ConversationThread>> {
        self.registry.get(&session.into())
    }

    /// Forget `session`. Returns whether it was bound.
    pub fn end_session(&self, session: impl Into<SessionId>) -> bool {
        self.registry.end_session(&session.into()).is_some()
    }

    /// Deliver a user message to the session's thread and stream the turn.
    ///
    /// The thread must be parked at `await_user_message`; a faulted thread
    /// answers `NotAwaitingInput` and is resumed with [`retry`](Self::retry).
    /// Dropping the returned stream cancels the run. The run advances only
    /// as fast as the stream is read.
    pub fn submit(&self, session: impl Into<SessionId>, text: impl Into<String>) -> EventStream {
        self.start(session.into(), RunKind::Submit(text.into()))
    }

    /// Re-run a faulted thread from the stage that failed.
    pub fn retry(&self, session: impl Into<SessionId>) -> EventStream {
        self.start(session.into(), RunKind::Retry)
    }

    fn start(&self, session: SessionId, kind: RunKind) -> EventStream {
        let (events, rx) = EventEmitter::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let runtime = self.clone();
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            let run = AssertUnwindSafe(runtime.drive(session, kind, &events, run_cancel));
            let err = match run.catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(panic) => {
                    let err = panicked("run", &*panic);
                    error!(error = %err, "conversation run panicked");
                    err
                }
            };
            events.fail(err).await;
        });

        let guard = cancel.drop_guard();
        let stream = async_stream::stream! {
            let _guard = guard;
            let mut inner = ReceiverStream::new(rx);
            while let Some(item) = inner.next().await {
                yield item;
            }
        };
        Box::pin(stream)
    }

    async fn drive(
        &self,
        session: SessionId,
        kind: RunKind,
        events: &EventEmitter,
        cancel: CancellationToken,
    ) -> Result<(), ChatLoopError> {
        let thread = self.registry.resolve(&session)?;
        let thread_id = thread.id();

        let mut state = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatLoopError::Canceled),
            guard = thread.state.lock() => guard,
        };

        let entry = self.graph.entry();
        if ConversationGraph::is_terminal(&state.stage) {
            return Err(ChatLoopError::ThreadClosed { thread_id });
        }
        let input = match kind {
            RunKind::Submit(text) => {
                if state.stage != entry {
                    return Err(ChatLoopError::NotAwaitingInput {
                        thread_id,
                        stage: state.stage.clone(),
                    });
                }
                Some(text)
            }
            RunKind::Retry => {
                let Some(fault) = &state.last_fault else {
                    return Err(ChatLoopError::NothingToRetry { thread_id });
                };
                debug!(thread_id = %thread_id, stage = %fault.stage, "retrying faulted stage");
                None
            }
        };

        let mut ctx = StageContext::new(thread_id, session, events.clone(), self.provider.clone())
            .with_tools(self.tools.clone())
            .with_system_prompt(self.system_prompt.clone())
            .with_settings(self.settings.clone())
            .with_bridge(BridgeOptions {
                idle_timeout: self.options.idle_timeout(),
            })
            .with_cancel(cancel.clone());
        if let Some(text) = input {
            ctx = ctx.with_input(text);
        }

        let mut steps = 0usize;
        loop {
            let stage = state.stage.clone();
            if ConversationGraph::is_terminal(&stage) {
                debug!(thread_id = %thread_id, "thread reached terminal stage");
                return Ok(());
            }
            if cancel.is_cancelled() {
                // Nothing to resume at the entry stage.
                if stage == entry {
                    return Ok(());
                }
                return Err(record_fault(&mut state, thread_id, &stage, ChatLoopError::Canceled));
            }
            // The entry stage consumes input at most once per run, so it is not counted.
            if stage != entry {
                if steps >= self.options.max_stage_steps {
                    let err = ChatLoopError::StepLimitExceeded {
                        limit: self.options.max_stage_steps,
                    };
                    return Err(record_fault(&mut state, thread_id, &stage, err));
                }
                steps += 1;
            }

            let Some(handler) = self.graph.handler(&stage).cloned() else {
                let err = ChatLoopError::InvalidState(format!("no handler for stage '{stage}'"));
                return Err(record_fault(&mut state, thread_id, &stage, err));
            };

            let mut working = state.clone();
            let run = AssertUnwindSafe(handler.run(&mut working, &mut ctx));
            let outcome = match run.catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => return Err(record_fault(&mut state, thread_id, &stage, err)),
                Err(panic) => {
                    let err = panicked("stage", &*panic);
                    return Err(record_fault(&mut state, thread_id, &stage, err));
                }
            };
            let next = match self.graph.next_stage(&stage, &outcome) {
                Ok(next) => next,
                Err(err) => return Err(record_fault(&mut state, thread_id, &stage, err.into())),
            };

            working.last_fault = None;
            working.stage = next.clone();
            *state = working;
            debug!(thread_id = %thread_id, from = %stage, to = %next, ?outcome, "stage transition");

            if outcome == StageOutcome::Suspend {
                return Ok(());
            }
        }
    }
}

fn panicked(what: &str, payload: &(dyn Any + Send)) -> ChatLoopError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ChatLoopError::InvalidState(format!("{what} panicked: {message}"))
}

fn record_fault(
    state: &mut ThreadState,
    thread_id: ThreadId,
    stage: &StageName,
    err: ChatLoopError,
) -> ChatLoopError {
    warn!(thread_id = %thread_id, stage = %stage, error = %err, "stage faulted");
    state.last_fault = Some(FaultRecord {
        stage: stage.clone(),
        message: err.to_string(),
        at: Utc::now(),
    });
    ChatLoopError::StageFault {
        thread_id,
        stage: stage.clone(),
        source: Box::new(err),
    }
}

impl std::fmt::Debug for ConversationRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRuntime")
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("sessions", &self.registry.len())
            .field("tools", &self.tools)
            .field("options", &self.options)
            .finish()
    }
}
