//! Chunk shape produced by streaming chat-completion providers.
//!
//! Mirrors the `chat.completion.chunk` wire object so vendor payloads
//! deserialize straight into it. Every field is optional on the wire.

use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// One unit of a chunked provider response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseFragment {
    #[serde(default)]
    pub choices: Vec<FragmentChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<FragmentUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FragmentChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: FragmentDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FragmentDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

/// Partial tool call. Only the first fragment of a call usually carries
/// `id` and `function.name`; later ones append to `function.arguments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallFragment {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FragmentUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<FragmentUsage> for Usage {
    fn from(u: FragmentUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

impl ResponseFragment {
    fn with_delta(delta: FragmentDelta) -> Self {
        Self {
            choices: vec![FragmentChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A fragment carrying only text content.
    pub fn text(content: impl Into<String>) -> Self {
        Self::with_delta(FragmentDelta {
            content: Some(content.into()),
            ..Default::default()
        })
    }

    /// A fragment carrying one piece of a tool call.
    pub fn tool_call(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::with_delta(FragmentDelta {
            tool_calls: Some(vec![ToolCallFragment {
                index,
                id: id.map(str::to_string),
                function: Some(FunctionFragment {
                    name: name.map(str::to_string),
                    arguments: Some(arguments.into()),
                }),
            }]),
            ..Default::default()
        })
    }

    /// An empty-delta fragment that reports why generation stopped.
    pub fn finish(reason: impl Into<String>) -> Self {
        Self::with_delta(FragmentDelta::default()).with_finish_reason(reason)
    }

    /// A choice-less fragment that only reports usage.
    pub fn usage_only(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            choices: Vec::new(),
            usage: Some(FragmentUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            }),
        }
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        if let Some(choice) = self.choices.first_mut() {
            choice.finish_reason = Some(reason.into());
        }
        self
    }
}
