//! Shared test helpers and scripted providers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use chatloop::error::ChatLoopError;
use chatloop::provider::{ChatProvider, FragmentSource, ProviderRequest, ResponseFragment};
use chatloop::types::{EventStream, Role, StreamEvent};

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    Fragment(ResponseFragment),
    /// The pull fails with an I/O error carrying this message.
    Fail(String),
    /// Block the worker before the next step.
    Sleep(Duration),
}

/// Text fragments, then a `stop` finish and a usage report.
pub fn text_script(pieces: &[&str]) -> Vec<Step> {
    let mut steps: Vec<Step> = pieces
        .iter()
        .map(|p| Step::Fragment(ResponseFragment::text(*p)))
        .collect();
    steps.push(Step::Fragment(ResponseFragment::finish("stop")));
    steps.push(Step::Fragment(ResponseFragment::usage_only(10, pieces.len() as u32)));
    steps
}

/// A single tool call split over two fragments.
pub fn tool_call_script(id: &str, name: &str, arguments: &str) -> Vec<Step> {
    let split = arguments.len() / 2;
    vec![
        Step::Fragment(ResponseFragment::tool_call(0, Some(id), Some(name), &arguments[..split])),
        Step::Fragment(ResponseFragment::tool_call(0, None, None, &arguments[split..])),
        Step::Fragment(ResponseFragment::finish("tool_calls")),
    ]
}

/// Provider that replays queued scripts, one per `generate` call.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    open_error: Mutex<Option<String>>,
    pulls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_scripts(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        let provider = Self::default();
        provider.scripts.lock().unwrap().extend(scripts);
        Arc::new(provider)
    }

    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    /// Make the next `generate` call fail before any fragment.
    pub fn fail_next_open(&self, message: &str) {
        *self.open_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `next()` calls made on sources from this provider.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl ChatProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-1"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<FragmentSource, ChatLoopError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.open_error.lock().unwrap().take() {
            return Err(ChatLoopError::api(503, message));
        }
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatLoopError::InvalidState("no script queued".into()))?;
        Ok(Box::new(ScriptedSource {
            steps: steps.into(),
            pulls: self.pulls.clone(),
        }))
    }
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    pulls: Arc<AtomicUsize>,
}

impl Iterator for ScriptedSource {
    type Item = Result<ResponseFragment, ChatLoopError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        loop {
            match self.steps.pop_front()? {
                Step::Fragment(fragment) => return Some(Ok(fragment)),
                Step::Fail(message) => return Some(Err(std::io::Error::other(message).into())),
                Step::Sleep(duration) => std::thread::sleep(duration),
            }
        }
    }
}

/// Provider that answers `echo: <last user message>`, optionally slowly.
pub struct EchoProvider {
    delay: Duration,
}

impl EchoProvider {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

impl ChatProvider for EchoProvider {
    fn provider_name(&self) -> &str {
        "echo"
    }

    fn model_id(&self) -> &str {
        "echo-1"
    }

    fn generate(&self, request: &ProviderRequest) -> Result<FragmentSource, ChatLoopError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let delay = self.delay;
        let fragments = vec![
            ResponseFragment::text("echo: "),
            ResponseFragment::text(last_user),
        ];
        Ok(Box::new(fragments.into_iter().map(move |f| {
            std::thread::sleep(delay);
            Ok::<_, ChatLoopError>(f)
        })))
    }
}

/// Drain a stream into its items.
pub async fn collect(stream: EventStream) -> Vec<Result<StreamEvent, ChatLoopError>> {
    stream.collect().await
}

/// Concatenated text deltas.
pub fn text_of(events: &[Result<StreamEvent, ChatLoopError>]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Ok(StreamEvent::TextDelta { text }) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// The final completion, if the stream ended with one.
pub fn completion_of(events: &[Result<StreamEvent, ChatLoopError>]) -> Option<&StreamEvent> {
    match events.last() {
        Some(Ok(event @ StreamEvent::Completion { .. })) => Some(event),
        _ => None,
    }
}
