//! History summarisation feeding combine-then-send

use super::{is_context_message, OrchestratorError, StreamHandle, StreamOrchestrator};
use crate::api::ModelConfig;
use crate::conversation::{ConversationId, Message};
use tracing::debug;

pub const SUMMARY_INSTRUCTION: &str = "Summarize the conversation so far in a few sentences. \
Keep names, numbers, decisions and open questions. Reply with the summary only.";

/// Text actually sent to the model: the summary followed by the new message
pub fn compose_send_text(summary: &str, display_text: &str) -> String {
    let summary = summary.trim();
    if summary.is_empty() {
        return display_text.to_string();
    }
    format!(
        "Summary of our conversation so far:\n{}\n\n{}",
        summary, display_text
    )
}

impl StreamOrchestrator {
    /// Summarise the existing history with a separate non-streamed call, then
    /// send `display_text` with that summary attached via combine-then-send
    pub async fn summarize_and_send(
        &self,
        conversation_id: ConversationId,
        display_text: &str,
        config: ModelConfig,
    ) -> Result<StreamHandle, OrchestratorError> {
        // The summary must not see a reply that is still growing
        self.cancel(conversation_id).await;

        let mut history: Vec<Message> = self
            .repository
            .fetch_messages(conversation_id)
            .await
            .into_iter()
            .filter(is_context_message)
            .collect();

        if history.is_empty() {
            return Ok(self
                .combine_then_send(conversation_id, display_text, display_text, config)
                .await);
        }

        history.push(Message::user(SUMMARY_INSTRUCTION));
        let provider = self.router.adapter_for(&config);
        let summary = provider
            .send_once(&history, &config)
            .await
            .map_err(OrchestratorError::Summary)?;
        debug!(
            %conversation_id,
            chars = summary.content.chars().count(),
            "History summarised"
        );

        let send_text = compose_send_text(&summary.content, display_text);
        Ok(self
            .combine_then_send(conversation_id, display_text, &send_text, config)
            .await)
    }
}
