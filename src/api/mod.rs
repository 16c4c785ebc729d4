//! Provider abstraction layer for streaming chat backends

mod dashscope;
mod openai;
mod router;
mod sse;
mod template;
mod transport;

pub use dashscope::DashScopeAdapter;
pub use openai::OpenAIStyleAdapter;
pub use router::ProviderRouter;
pub use sse::{parse_sse_line, DashScopeParser, OpenAIStyleParser, SseFormat, WireEvent, WireParser};
pub use template::TemplateAdapter;
pub use transport::{
    HttpMethod, HttpRequest, HttpTransport, LineStream, Transport, TransportConfig,
    DEFAULT_MAX_ERROR_BODY_BYTES,
};

#[cfg(test)]
pub(crate) use transport::testing;

use crate::conversation::Message;
use crate::error::ChatError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, StreamExt};
use serde::{Deserialize, Serialize};

/// Parsed events of one generation, already filtered of `Ignore`
pub type WireEventStream = BoxStream<'static, Result<WireEvent, ChatError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (DeepSeek, OpenAI, OpenRouter, ...)
    #[serde(rename = "openai_style", alias = "openai")]
    OpenAIStyle,
    /// Alibaba DashScope text and multimodal generation
    #[serde(rename = "dashscope")]
    DashScope,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAIStyle => "openai_style",
            ProviderKind::DashScope => "dashscope",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an adapter needs to talk to one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    pub temperature: f64,
    pub token_limit: u32,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Ask the model for separate reasoning output
    #[serde(default)]
    pub thinking: bool,
    /// Endpoint override; `None` uses the provider's default URL
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn new(provider: ProviderKind, model_name: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            temperature: 0.7,
            token_limit: 4096,
            api_key: String::new(),
            thinking: false,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }
}

/// One chat backend: request construction plus response parsing
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking request/response; returns the assistant reply
    async fn send_once(&self, messages: &[Message], config: &ModelConfig)
        -> Result<Message, ChatError>;

    /// Start a streamed generation
    async fn stream_tokens(
        &self,
        messages: &[Message],
        config: &ModelConfig,
    ) -> Result<WireEventStream, ChatError>;
}

/// Parse a line stream into wire events, dropping `Ignore` and mapping
/// transport failures onto [`ChatError`]
pub(crate) fn into_wire_events<P>(lines: LineStream, parser: P) -> WireEventStream
where
    P: WireParser + 'static,
{
    lines
        .map(move |line| match line {
            Ok(line) => Ok(parser.parse(&line)),
            Err(err) => Err(ChatError::from(err)),
        })
        .filter(|event| future::ready(!matches!(event, Ok(WireEvent::Ignore))))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_serde_names() {
        let json = serde_json::to_string(&ProviderKind::OpenAIStyle).unwrap();
        assert_eq!(json, "\"openai_style\"");
        let kind: ProviderKind = serde_json::from_str("\"dashscope\"").unwrap();
        assert_eq!(kind, ProviderKind::DashScope);
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAIStyle);
    }

    #[test]
    fn test_model_config_never_serializes_key() {
        let config = ModelConfig::new(ProviderKind::OpenAIStyle, "x").with_api_key("sk-secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
