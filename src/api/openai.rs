//! OpenAI-compatible chat completions adapter (DeepSeek by default)

use super::sse::OpenAIStyleParser;
use super::transport::{HttpRequest, Transport};
use super::{into_wire_events, ChatProvider, ModelConfig, WireEventStream};
use crate::conversation::{Message, Role};
use crate::error::ChatError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/chat/completions";

const COMPLETIONS_SUFFIX: &str = "/chat/completions";

/// Hosts known to serve the OpenAI chat completions API under `<base>/chat/completions`
const OPENAI_COMPATIBLE_HOSTS: &[&str] = &[
    "api.openai.com",
    "api.deepseek.com",
    "openrouter.ai",
    "api.groq.com",
    "api.together.xyz",
    "api.moonshot.cn",
    "api.siliconflow.cn",
];

pub struct OpenAIStyleAdapter {
    transport: Arc<dyn Transport>,
}

impl OpenAIStyleAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn endpoint(config: &ModelConfig) -> String {
        match config.base_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => normalize_endpoint(base),
            _ => DEFAULT_ENDPOINT.to_string(),
        }
    }

    fn build_request(messages: &[Message], config: &ModelConfig, stream: bool) -> HttpRequest {
        let body = json!({
            "model": config.model_name,
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "stream": stream,
            "temperature": config.temperature,
            "max_tokens": config.token_limit,
            "thinking": {
                "type": if config.thinking { "enabled" } else { "disabled" }
            },
        });

        HttpRequest::post(Self::endpoint(config), body)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("Content-Type", "application/json")
            .header(
                "Accept",
                if stream {
                    "text/event-stream"
                } else {
                    "application/json"
                },
            )
    }
}

/// Append `/chat/completions` to an override URL, but only for known
/// OpenAI-compatible hosts that lack it
pub(crate) fn normalize_endpoint(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(COMPLETIONS_SUFFIX) {
        return trimmed.to_string();
    }

    let known_host = reqwest::Url::parse(trimmed)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .map(|host| {
            OPENAI_COMPATIBLE_HOSTS
                .iter()
                .any(|known| host == *known || host.ends_with(&format!(".{}", known)))
        })
        .unwrap_or(false);

    if known_host {
        format!("{}{}", trimmed, COMPLETIONS_SUFFIX)
    } else {
        trimmed.to_string()
    }
}

fn message_json(message: &Message) -> Value {
    if message.role == Role::User && message.has_attachments() {
        let mut parts = vec![json!({ "type": "text", "text": message.content })];
        parts.extend(message.attachments.iter().map(|attachment| {
            json!({ "type": "image_url", "image_url": { "url": attachment.value } })
        }));
        json!({ "role": message.role.as_str(), "content": parts })
    } else {
        json!({ "role": message.role.as_str(), "content": message.content })
    }
}

#[async_trait]
impl ChatProvider for OpenAIStyleAdapter {
    fn name(&self) -> &str {
        "openai_style"
    }

    async fn send_once(
        &self,
        messages: &[Message],
        config: &ModelConfig,
    ) -> Result<Message, ChatError> {
        let request = Self::build_request(messages, config, false);
        debug!(model = %config.model_name, url = %request.url, "OpenAI-style send_once");

        let bytes = self.transport.send_once(request).await?;
        let json: Value =
            serde_json::from_slice(&bytes).map_err(|_| ChatError::ResponseFormatInvalid)?;

        let message = &json["choices"][0]["message"];
        let content = message["content"]
            .as_str()
            .ok_or(ChatError::ResponseFormatInvalid)?;
        let reasoning = message["reasoning_content"].as_str().unwrap_or("");

        Ok(Message::assistant(content).with_reasoning(reasoning))
    }

    async fn stream_tokens(
        &self,
        messages: &[Message],
        config: &ModelConfig,
    ) -> Result<WireEventStream, ChatError> {
        let request = Self::build_request(messages, config, true);
        debug!(
            model = %config.model_name,
            url = %request.url,
            messages = messages.len(),
            "Opening OpenAI-style stream"
        );

        let lines = self.transport.stream_lines(request).await?;
        Ok(into_wire_events(lines, OpenAIStyleParser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Scripted, ScriptedTransport};
    use crate::api::{ProviderKind, WireEvent};
    use crate::conversation::Attachment;
    use crate::error::{HttpFailure, TransportError};
    use futures_util::StreamExt;

    fn config() -> ModelConfig {
        ModelConfig::new(ProviderKind::OpenAIStyle, "deepseek-chat").with_api_key("sk-test")
    }

    #[test]
    fn test_normalize_known_host() {
        assert_eq!(
            normalize_endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            normalize_endpoint("https://openrouter.ai/api/v1/"),
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            normalize_endpoint("https://api.deepseek.com/chat/completions"),
            "https://api.deepseek.com/chat/completions"
        );
    }

    #[test]
    fn test_normalize_unknown_host_untouched() {
        assert_eq!(
            normalize_endpoint("http://localhost:8080/v1/generate"),
            "http://localhost:8080/v1/generate"
        );
        assert_eq!(normalize_endpoint("not a url"), "not a url");
    }

    #[test]
    fn test_request_body_and_headers() {
        let messages = vec![Message::system("be brief"), Message::user("hi")];
        let request = OpenAIStyleAdapter::build_request(&messages, &config().with_thinking(true), true);

        assert_eq!(request.url, DEFAULT_ENDPOINT);
        assert_eq!(request.header_value("Authorization"), Some("Bearer sk-test"));
        assert_eq!(request.header_value("Accept"), Some("text/event-stream"));

        let body = request.body.unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_attachments_use_content_parts() {
        let message = Message::user("what is this")
            .with_attachment(Attachment::image_data_url("data:image/png;base64,AA"));
        let json = message_json(&message);

        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "what is this");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AA");
    }

    #[tokio::test]
    async fn test_stream_tokens_filters_ignore() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_lines(&[
            "",
            r#"data: {"choices":[{"delta":{"content":"He"}}]}"#,
            ": ping",
            r#"data: {"choices":[{"delta":{"reasoning_content":"r"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"llo"}}]}"#,
            "data: [DONE]",
        ]);
        let adapter = OpenAIStyleAdapter::new(transport.clone());

        let events: Vec<_> = adapter
            .stream_tokens(&[Message::user("hi")], &config())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                Ok(WireEvent::Token("He".into())),
                Ok(WireEvent::Reasoning("r".into())),
                Ok(WireEvent::Token("llo".into())),
                Ok(WireEvent::Done),
            ]
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_http_failure_is_mapped() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Scripted::Fail(TransportError::Http(
            HttpFailure::new(401).with_body(r#"{"error":{"code":"invalid_api_key","message":"bad key"}}"#),
        )));
        let adapter = OpenAIStyleAdapter::new(transport);

        let result = adapter.stream_tokens(&[Message::user("hi")], &config()).await;
        assert!(matches!(result, Err(ChatError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn test_send_once_extracts_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Scripted::Body(
            br#"{"choices":[{"message":{"role":"assistant","content":"4","reasoning_content":"2+2"}}]}"#.to_vec(),
        ));
        let adapter = OpenAIStyleAdapter::new(transport.clone());

        let reply = adapter
            .send_once(&[Message::user("2+2?")], &config())
            .await
            .unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "4");
        assert_eq!(reply.reasoning.as_deref(), Some("2+2"));

        let sent = &transport.requests()[0];
        assert_eq!(sent.body.as_ref().unwrap()["stream"], false);
    }

    #[tokio::test]
    async fn test_send_once_invalid_body() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Scripted::Body(b"<html>oops</html>".to_vec()));
        transport.push(Scripted::Body(br#"{"choices":[]}"#.to_vec()));
        let adapter = OpenAIStyleAdapter::new(transport);

        for _ in 0..2 {
            let result = adapter.send_once(&[Message::user("x")], &config()).await;
            assert_eq!(result, Err(ChatError::ResponseFormatInvalid));
        }
    }
}
