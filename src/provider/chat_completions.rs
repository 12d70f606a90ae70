//! Blocking chat-completions client (OpenAI wire format, also spoken by GLM).

use std::io::BufRead;
use std::io::BufReader;

use tracing::debug;

use super::format::request_body;
use super::http::{bearer_headers, parse_sse_line, shared_client, status_to_error, SseLine};
use super::{ChatProvider, FragmentSource, ProviderRequest, ResponseFragment};
use crate::error::ChatLoopError;

/// Streams `POST {base_url}/chat/completions` with a synchronous client.
pub struct ChatCompletionsProvider {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
}

impl ChatCompletionsProvider {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for ChatCompletionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ChatProvider for ChatCompletionsProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &ProviderRequest) -> Result<FragmentSource, ChatLoopError> {
        let body = request_body(&self.model, request);
        let url = self.endpoint();

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completions stream"
        );

        let resp = shared_client()?
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body_text));
        }

        Ok(Box::new(SseFragments::new(
            self.name.clone(),
            BufReader::new(resp),
        )))
    }
}

/// Blocking iterator over the `data:` payloads of an SSE body.
pub struct SseFragments<R> {
    provider: String,
    reader: R,
    line: String,
    done: bool,
}

impl<R: BufRead> SseFragments<R> {
    pub fn new(provider: impl Into<String>, reader: R) -> Self {
        Self {
            provider: provider.into(),
            reader,
            line: String::new(),
            done: false,
        }
    }

    fn decode(&self, data: &str) -> Result<ResponseFragment, ChatLoopError> {
        let value: serde_json::Value = serde_json::from_str(data)?;
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ChatLoopError::provider_fault(&self.provider, message));
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<ResponseFragment, ChatLoopError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            let decoded = match parse_sse_line(&self.line) {
                SseLine::Ignored => continue,
                SseLine::Done => {
                    self.done = true;
                    return None;
                }
                SseLine::Data(data) => self.decode(data),
            };
            if decoded.is_err() {
                self.done = true;
            }
            return Some(decoded);
        }
    }
}
