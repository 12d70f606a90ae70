//! Folds response fragments into stream events and a final message.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::provider::{ResponseFragment, ToolCallFragment};
use crate::types::{FinishReason, Message, StreamEvent, ToolCall, Usage};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Running state of one streamed response.
#[derive(Debug, Default)]
pub struct FragmentAccumulator {
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl FragmentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one fragment, returning the events it produces.
    ///
    /// Empty text never yields a `TextDelta`. Tool-call pieces yield a
    /// `ToolCallDelta` only when they carry an id, a name or argument text.
    pub fn push(&mut self, fragment: ResponseFragment) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = fragment.usage {
            self.usage = usage.into();
        }

        for choice in fragment.choices {
            if let Some(reason) = choice.finish_reason.as_deref() {
                // Unknown reasons fall back to inference in `finish`.
                if let Some(parsed) = FinishReason::parse(reason) {
                    self.finish_reason = Some(parsed);
                }
            }

            let delta = choice.delta;
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                events.push(StreamEvent::TextDelta { text });
            }

            for call in delta.tool_calls.unwrap_or_default() {
                if let Some(event) = self.push_tool_call(call) {
                    events.push(event);
                }
            }
        }

        events
    }

    fn push_tool_call(&mut self, call: ToolCallFragment) -> Option<StreamEvent> {
        let partial = self.tool_calls.entry(call.index).or_default();
        let mut changed = false;

        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            partial.id = Some(id);
            changed = true;
        }

        let (name, arguments) = match call.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            partial.name = name;
            changed = true;
        }
        let arguments_delta = arguments.unwrap_or_default();
        if !arguments_delta.is_empty() {
            partial.arguments.push_str(&arguments_delta);
            changed = true;
        }

        changed.then(|| StreamEvent::ToolCallDelta {
            index: call.index,
            id: partial.id.clone(),
            name: partial.name.clone(),
            arguments_delta,
        })
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Build the terminal `Completion` event.
    pub fn finish(self) -> StreamEvent {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(index, partial)| ToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                name: partial.name,
                arguments: parse_arguments(&partial.arguments),
            })
            .collect();

        let stop_reason = self.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        let message = if tool_calls.is_empty() {
            Message::assistant(self.text)
        } else {
            Message::assistant_with_tool_calls(self.text, tool_calls)
        };

        StreamEvent::Completion {
            message,
            stop_reason,
            usage: self.usage,
        }
    }
}

/// Parse accumulated argument text. Empty means no arguments; text that is
/// not valid JSON is kept verbatim as a string.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
