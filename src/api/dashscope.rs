//! DashScope native protocol adapter (Qwen text and vision models)

use super::sse::{content_text, DashScopeParser};
use super::transport::{HttpRequest, Transport};
use super::{into_wire_events, ChatProvider, ModelConfig, WireEventStream};
use crate::conversation::{Message, Role};
use crate::error::ChatError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_HOST: &str = "https://dashscope.aliyuncs.com";

const API_ROOT: &str = "/api/v1";
const TEXT_GENERATION_PATH: &str = "/services/aigc/text-generation/generation";
const MULTIMODAL_GENERATION_PATH: &str = "/services/aigc/multimodal-generation/generation";

pub struct DashScopeAdapter {
    transport: Arc<dyn Transport>,
}

impl DashScopeAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn build_request(
        messages: &[Message],
        config: &ModelConfig,
        incremental: bool,
    ) -> HttpRequest {
        let multimodal = messages.iter().any(Message::has_attachments);

        let body = json!({
            "model": config.model_name,
            "input": {
                "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            },
            "parameters": {
                "result_format": "message",
                "incremental_output": incremental,
                "temperature": config.temperature,
                "max_tokens": config.token_limit,
                "enable_thinking": config.thinking,
            },
        });

        let mut request = HttpRequest::post(endpoint(config.base_url.as_deref(), multimodal), body)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("Content-Type", "application/json");
        if incremental {
            request = request.header("X-DashScope-SSE", "enable");
        }
        request
    }
}

/// Resolve the generation URL; an override that is only a host (or ends at
/// `/api/v1`) gets the service path appended
pub(crate) fn endpoint(base_url: Option<&str>, multimodal: bool) -> String {
    let service = if multimodal {
        MULTIMODAL_GENERATION_PATH
    } else {
        TEXT_GENERATION_PATH
    };

    let base = match base_url.map(str::trim) {
        Some(base) if !base.is_empty() => base.trim_end_matches('/'),
        _ => DEFAULT_HOST,
    };

    if base.ends_with("/generation") {
        base.to_string()
    } else if base.ends_with(API_ROOT) {
        format!("{}{}", base, service)
    } else {
        format!("{}{}{}", base, API_ROOT, service)
    }
}

fn message_json(message: &Message) -> Value {
    if message.role == Role::User && message.has_attachments() {
        let mut parts: Vec<Value> = message
            .attachments
            .iter()
            .map(|attachment| json!({ "image": attachment.value }))
            .collect();
        parts.push(json!({ "text": message.content }));
        json!({ "role": message.role.as_str(), "content": parts })
    } else {
        json!({ "role": message.role.as_str(), "content": message.content })
    }
}

#[async_trait]
impl ChatProvider for DashScopeAdapter {
    fn name(&self) -> &str {
        "dashscope"
    }

    async fn send_once(
        &self,
        messages: &[Message],
        config: &ModelConfig,
    ) -> Result<Message, ChatError> {
        let request = Self::build_request(messages, config, false);
        debug!(model = %config.model_name, url = %request.url, "DashScope send_once");

        let bytes = self.transport.send_once(request).await?;
        let json: Value =
            serde_json::from_slice(&bytes).map_err(|_| ChatError::ResponseFormatInvalid)?;

        let message = &json["output"]["choices"][0]["message"];
        let content = content_text(&message["content"]).ok_or(ChatError::ResponseFormatInvalid)?;
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
            "Opening DashScope stream"
        );

        let lines = self.transport.stream_lines(request).await?;
        Ok(into_wire_events(lines, DashScopeParser))
    }
}
