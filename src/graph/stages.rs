//! Built-in stages of the standard conversation graph.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::{StageContext, StageHandler, StageOutcome, ROUTE_RESPOND, ROUTE_TOOLS};
use crate::bridge::bridge_provider;
use crate::error::ChatLoopError;
use crate::provider::ProviderRequest;
use crate::registry::{Draft, ThreadState};
use crate::tools::ToolExecutionContext;
use crate::types::{Message, StreamEvent, Usage};

/// Consumes pending input as a user message, or parks the thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwaitUserMessage;

#[async_trait]
impl StageHandler for AwaitUserMessage {
    async fn run(
        &self,
        state: &mut ThreadState,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome, ChatLoopError> {
        match ctx.take_input() {
            Some(text) => {
                state.messages.push(Message::user(text));
                state.turn_usage = Usage::default();
                Ok(StageOutcome::Continue)
            }
            None => Ok(StageOutcome::Suspend),
        }
    }
}

/// Streams a model response for the current history into the draft.
///
/// Routes `tools` when the response requests tool calls, else `respond`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateResponse;

#[async_trait]
impl StageHandler for GenerateResponse {
    async fn run(
        &self,
        state: &mut ThreadState,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome, ChatLoopError> {
        let mut messages = Vec::with_capacity(state.messages.len() + 1);
        if let Some(prompt) = ctx.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(Message::system(prompt));
        }
        messages.extend(state.messages.iter().cloned());

        let request = ProviderRequest {
            messages,
            tools: ctx.tools.definitions(),
            settings: ctx.settings.clone(),
        };

        let mut stream = bridge_provider(ctx.provider.clone(), request, ctx.bridge, ctx.cancel.clone());
        let mut draft = None;
        while let Some(item) = stream.next().await {
            match item? {
                StreamEvent::Completion {
                    message,
                    stop_reason,
                    usage,
                } => {
                    draft = Some(Draft {
                        message,
                        stop_reason,
                        usage,
                    });
                }
                delta => {
                    ctx.emit(delta).await;
                }
            }
        }

        let Some(draft) = draft else {
            if ctx.cancel.is_cancelled() {
                return Err(ChatLoopError::Canceled);
            }
            return Err(ChatLoopError::InvalidState(
                "response stream ended without a completion".into(),
            ));
        };

        let route = if draft.message.has_tool_calls() {
            ROUTE_TOOLS
        } else {
            ROUTE_RESPOND
        };
        debug!(
            thread_id = %ctx.thread_id,
            stop_reason = %draft.stop_reason,
            tool_calls = draft.message.tool_calls.len(),
            route,
            "response generated"
        );

        state.usage.merge(&draft.usage);
        state.turn_usage.merge(&draft.usage);
        state.draft = Some(draft);
        Ok(StageOutcome::route(route))
    }
}

/// Appends the drafted tool-call message and one result per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeTools;

#[async_trait]
impl StageHandler for InvokeTools {
    async fn run(
        &self,
        state: &mut ThreadState,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome, ChatLoopError> {
        let draft = state
            .draft
            .take()
            .ok_or_else(|| ChatLoopError::InvalidState("no drafted tool calls to invoke".into()))?;
        let calls = draft.message.tool_calls.clone();
        state.messages.push(draft.message);

        for call in &calls {
            if ctx.cancel.is_cancelled() {
                return Err(ChatLoopError::Canceled);
            }
            let tool_ctx = ToolExecutionContext {
                thread_id: ctx.thread_id,
                session: ctx.session.clone(),
                call_id: call.id.clone(),
            };
            let content = match ctx.tools.invoke(call, &tool_ctx).await {
                Value::String(text) => text,
                other => other.to_string(),
            };
            state.messages.push(Message::tool_result(&call.id, content));
        }

        Ok(StageOutcome::Continue)
    }
}

/// Commits the drafted answer to history and emits the turn's completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeResponse;

#[async_trait]
impl StageHandler for FinalizeResponse {
    async fn run(
        &self,
        state: &mut ThreadState,
        ctx: &mut StageContext,
    ) -> Result<StageOutcome, ChatLoopError> {
        let draft = state
            .draft
            .take()
            .ok_or_else(|| ChatLoopError::InvalidState("no drafted response to finalize".into()))?;

        state.messages.push(draft.message.clone());
        state.turns += 1;
        // Tool round trips generate more than once; report the whole turn.
        ctx.emit(StreamEvent::Completion {
            message: draft.message,
            stop_reason: draft.stop_reason,
            usage: state.turn_usage,
        })
        .await;
        Ok(StageOutcome::Continue)
    }
}
