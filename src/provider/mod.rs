//! Provider collaborator: the blocking source of response fragments.

pub mod chat_completions;
pub mod format;
pub mod fragment;
pub mod http;

pub use fragment::{
    FragmentChoice, FragmentDelta, FragmentUsage, FunctionFragment, ResponseFragment,
    ToolCallFragment,
};

use std::sync::Arc;

use crate::config::{ChatLoopConfig, ProviderKind};
use crate::error::ChatLoopError;
use crate::types::{GenerationSettings, Message};

use chat_completions::ChatCompletionsProvider;

/// Blocking, synchronous sequence of response fragments.
///
/// `None` from `next()` means the response is exhausted. Iterators must be
/// `Send` so the bridge can drive them on a worker thread.
pub type FragmentSource = Box<dyn Iterator<Item = Result<ResponseFragment, ChatLoopError>> + Send>;

/// A request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub settings: GenerationSettings,
}

/// Tool definition sent to the provider API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A chat-completion provider with a synchronous streaming client.
///
/// `generate` may block on network I/O, and so may every `next()` on the
/// returned source. The runtime only ever calls them from the blocking pool.
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g., "zhipu", "openai").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Open a streamed completion for `request`.
    fn generate(&self, request: &ProviderRequest) -> Result<FragmentSource, ChatLoopError>;
}

/// Create the provider selected by `config`.
pub fn create_provider(config: &ChatLoopConfig) -> Result<Arc<dyn ChatProvider>, ChatLoopError> {
    let api_key = config
        .provider
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ChatLoopError::Configuration("Missing LLM_API_KEY".into()))?;

    let base_url = match (&config.provider.base_url, config.provider.kind) {
        (Some(url), _) => url.clone(),
        (None, ProviderKind::OpenAiCompatible) => {
            return Err(ChatLoopError::Configuration(
                "openai-compatible provider requires BASE_URL".into(),
            ))
        }
        (None, kind) => kind.default_base_url().to_string(),
    };

    tracing::debug!(
        provider = %config.provider.kind,
        model = %config.provider.model,
        base_url = %base_url,
        "creating chat provider"
    );

    Ok(Arc::new(ChatCompletionsProvider::new(
        config.provider.kind.to_string(),
        config.provider.model.clone(),
        api_key,
        base_url,
    )))
}
