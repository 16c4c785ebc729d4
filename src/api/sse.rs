//! Server-Sent Events (SSE) line parsers for streaming chat responses
//!
//! Handles two formats:
//! - OpenAI-compatible: `data: {"choices":[{"delta":{"content":"..."}}]}`
//! - DashScope: `data: {"output":{"choices":[{"message":{"content":"..."}}]}}`,
//!   where `content` may also be a list of parts for multimodal replies
//!
//! Parsing never fails: anything malformed becomes [`WireEvent::Ignore`].

use serde_json::Value;

/// One parsed line of a provider stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A fragment of the reply text
    Token(String),
    /// A fragment of the model's reasoning ("thinking") text
    Reasoning(String),
    /// The provider signalled the end of the stream
    Done,
    /// Framing, keep-alives, empty deltas and anything unparseable
    Ignore,
}

/// Turns one streamed line into a [`WireEvent`]
pub trait WireParser: Send + Sync {
    fn parse(&self, line: &str) -> WireEvent;
}

/// Delta-based parser for OpenAI-compatible streams
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIStyleParser;

/// Message-based parser for DashScope streams
#[derive(Debug, Clone, Copy, Default)]
pub struct DashScopeParser;

/// The wire format spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseFormat {
    OpenAIStyle,
    DashScope,
}

/// Parse a single line using the parser for `format`
pub fn parse_sse_line(line: &str, format: SseFormat) -> WireEvent {
    match format {
        SseFormat::OpenAIStyle => OpenAIStyleParser.parse(line),
        SseFormat::DashScope => DashScopeParser.parse(line),
    }
}

/// Steps shared by both formats: trim, strip `data:`, detect `[DONE]`, decode JSON.
/// `Err` carries the event to return without looking at the JSON.
fn decode_payload(line: &str) -> Result<Value, WireEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Err(WireEvent::Ignore);
    }

    // Some providers omit the prefix; the whole line is then the payload.
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };

    if payload == "[DONE]" {
        return Err(WireEvent::Done);
    }

    // Covers `event:`, `id:`, `:HTTP_STATUS/200` and SSE comments
    if !payload.starts_with('{') {
        return Err(WireEvent::Ignore);
    }

    serde_json::from_str(payload).map_err(|_| WireEvent::Ignore)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

impl WireParser for OpenAIStyleParser {
    fn parse(&self, line: &str) -> WireEvent {
        let json = match decode_payload(line) {
            Ok(json) => json,
            Err(event) => return event,
        };

        let choice = &json["choices"][0];

        // Non-streaming responses put the text under `message`
        let content = non_empty(choice["delta"]["content"].as_str())
            .or_else(|| non_empty(choice["message"]["content"].as_str()));
        if let Some(content) = content {
            return WireEvent::Token(content);
        }

        if let Some(reasoning) = non_empty(choice["delta"]["reasoning_content"].as_str()) {
            return WireEvent::Reasoning(reasoning);
        }

        WireEvent::Ignore
    }
}

impl WireParser for DashScopeParser {
    fn parse(&self, line: &str) -> WireEvent {
        let json = match decode_payload(line) {
            Ok(json) => json,
            Err(event) => return event,
        };

        let message = &json["output"]["choices"][0]["message"];

        // Reasoning first so it lands in its own buffer before the reply text.
        if let Some(reasoning) = non_empty(message["reasoning_content"].as_str()) {
            return WireEvent::Reasoning(reasoning);
        }

        match content_text(&message["content"]) {
            Some(text) if !text.is_empty() => WireEvent::Token(text),
            _ => WireEvent::Ignore,
        }
    }
}

/// Flatten a DashScope `content` field: a string, or a list of parts whose
/// `text` (falling back to `content`) fields are concatenated in order.
pub(crate) fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|part| {
                    part.get("text")
                        .and_then(Value::as_str)
                        .or_else(|| part.get("content").and_then(Value::as_str))
                })
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_text_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"index":0}]}"#;
        assert_eq!(
            OpenAIStyleParser.parse(line),
            WireEvent::Token("Hello".to_string())
        );
    }

    #[test]
    fn test_openai_reasoning_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"","reasoning_content":"Let me think"}}]}"#;
        assert_eq!(
            OpenAIStyleParser.parse(line),
            WireEvent::Reasoning("Let me think".to_string())
        );
    }

    #[test]
    fn test_openai_content_wins_over_reasoning() {
        let line = r#"data: {"choices":[{"delta":{"content":"A","reasoning_content":"B"}}]}"#;
        assert_eq!(
            OpenAIStyleParser.parse(line),
            WireEvent::Token("A".to_string())
        );
    }

    #[test]
    fn test_openai_message_fallback() {
        let line = r#"{"choices":[{"message":{"role":"assistant","content":"full"}}]}"#;
        assert_eq!(
            OpenAIStyleParser.parse(line),
            WireEvent::Token("full".to_string())
        );
    }

    #[test]
    fn test_openai_prefix_without_space() {
        let line = r#"data:{"choices":[{"delta":{"content":"x"}}]}"#;
        assert_eq!(OpenAIStyleParser.parse(line), WireEvent::Token("x".to_string()));
    }

    #[test]
    fn test_done_with_whitespace() {
        for line in ["data: [DONE]", "  data: [DONE]  \r\n", "data:[DONE]", "[DONE]"] {
            assert_eq!(OpenAIStyleParser.parse(line), WireEvent::Done, "line {:?}", line);
            assert_eq!(DashScopeParser.parse(line), WireEvent::Done, "line {:?}", line);
        }
    }

    #[test]
    fn test_empty_content_is_ignored() {
        let line = r#"data: {"choices":[{"delta":{"content":""},"finish_reason":"stop"}]}"#;
        assert_eq!(OpenAIStyleParser.parse(line), WireEvent::Ignore);

        let line = r#"data: {"output":{"choices":[{"message":{"content":"","role":"assistant"}}]}}"#;
        assert_eq!(DashScopeParser.parse(line), WireEvent::Ignore);
    }

    #[test]
    fn test_malformed_and_framing_lines_are_ignored() {
        let lines = [
            "",
            "   ",
            ": keep-alive",
            "event: result",
            "id: 3",
            ":HTTP_STATUS/200",
            "data: {not json",
            "data: {\"choices\": 5}",
            "data: {}",
            "data: [1,2]",
        ];
        for line in lines {
            assert_eq!(OpenAIStyleParser.parse(line), WireEvent::Ignore, "line {:?}", line);
            assert_eq!(DashScopeParser.parse(line), WireEvent::Ignore, "line {:?}", line);
        }
    }

    #[test]
    fn test_dashscope_reasoning_first() {
        let line = r#"data: {"output":{"choices":[{"message":{"content":"answer","reasoning_content":"hmm","role":"assistant"}}]}}"#;
        assert_eq!(
            DashScopeParser.parse(line),
            WireEvent::Reasoning("hmm".to_string())
        );
    }

    #[test]
    fn test_dashscope_string_content() {
        let line = r#"data: {"output":{"choices":[{"message":{"content":"你好","role":"assistant"},"finish_reason":"null"}]},"request_id":"r1"}"#;
        assert_eq!(
            DashScopeParser.parse(line),
            WireEvent::Token("你好".to_string())
        );
    }

    #[test]
    fn test_dashscope_multimodal_parts() {
        let line = r#"data: {"output":{"choices":[{"message":{"content":[{"text":"a"},{"text":"b"}]}}]}}"#;
        assert_eq!(DashScopeParser.parse(line), WireEvent::Token("ab".to_string()));

        let line = r#"data: {"output":{"choices":[{"message":{"content":[{"content":"c"},{"image":"x"},{"text":"d"}]}}]}}"#;
        assert_eq!(DashScopeParser.parse(line), WireEvent::Token("cd".to_string()));
    }

    #[test]
    fn test_dashscope_raw_payload_without_prefix() {
        let line = r#"{"output":{"choices":[{"message":{"content":"raw"}}]}}"#;
        assert_eq!(DashScopeParser.parse(line), WireEvent::Token("raw".to_string()));
    }

    #[test]
    fn test_format_dispatch() {
        let line = r#"data: {"choices":[{"delta":{"content":"o"}}]}"#;
        assert_eq!(
            parse_sse_line(line, SseFormat::OpenAIStyle),
            WireEvent::Token("o".to_string())
        );
        assert_eq!(parse_sse_line(line, SseFormat::DashScope), WireEvent::Ignore);
    }
}
