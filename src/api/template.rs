//! Deterministic offline provider for tests and `--mock` runs

use super::{ChatProvider, ModelConfig, WireEvent, WireEventStream};
use crate::conversation::{Message, Role};
use crate::error::ChatError;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::time::Duration;

/// Characters per streamed chunk
pub const CHUNK_CHARS: usize = 80;

const DEFAULT_TEMPLATE: &str = r#"# Streaming preview

This reply comes from the **template provider**. No network request was made.

## What you can try

- `/retry` regenerates this message in place
- `/combine <text>` sends a summary of the history with your next message
- Press `Ctrl-C` while a reply streams to stop it

```rust
fn main() {
    println!("hello from the template provider");
}
```

| Command | Effect |
|---------|--------|
| /new | start a new conversation |
| /think | toggle reasoning output |
"#;

#[derive(Debug, Clone)]
enum Source {
    Template(String),
    Echo,
}

/// Streams a fixed template, or echoes the last user message, in fixed-size chunks
#[derive(Debug, Clone)]
pub struct TemplateAdapter {
    source: Source,
    chunk_delay: Duration,
}

impl Default for TemplateAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl TemplateAdapter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            source: Source::Template(template.into()),
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn echo() -> Self {
        Self {
            source: Source::Echo,
            chunk_delay: Duration::ZERO,
        }
    }

    /// Pause between chunks to imitate network pacing
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn reply_text(&self, messages: &[Message]) -> String {
        match &self.source {
            Source::Template(template) => template.clone(),
            Source::Echo => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("");
                format!("Echo: {}", last_user)
            }
        }
    }
}

/// Split on character boundaries into chunks of at most `size` chars
fn chunk(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl ChatProvider for TemplateAdapter {
    fn name(&self) -> &str {
        match self.source {
            Source::Template(_) => "template",
            Source::Echo => "echo",
        }
    }

    async fn send_once(
        &self,
        messages: &[Message],
        _config: &ModelConfig,
    ) -> Result<Message, ChatError> {
        Ok(Message::assistant(self.reply_text(messages)))
    }

    async fn stream_tokens(
        &self,
        messages: &[Message],
        _config: &ModelConfig,
    ) -> Result<WireEventStream, ChatError> {
        let delay = self.chunk_delay;
        let chunks = chunk(&self.reply_text(messages), CHUNK_CHARS);

        let tokens = stream::iter(chunks).then(move |text| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, ChatError>(WireEvent::Token(text))
        });

        Ok(tokens
            .chain(stream::once(async { Ok(WireEvent::Done) }))
            .boxed())
    }
}
