//! Streaming orchestration: one live generation per conversation
//!
//! This module owns the per-conversation state machine:
//! - `start` appends the user turn and an empty assistant placeholder, then
//!   streams the reply into it
//! - `cancel` stops the live generation without waiting for its task
//! - `regenerate` rewrites an existing assistant message in place
//! - `combine_then_send` persists one text but sends another to the model
//!
//! Every write from a consume task goes through the conversation lock and is
//! rejected once its [`StreamHandle`] has been superseded or cancelled.

mod handle;
mod summary;

pub use handle::{StreamEvent, StreamHandle, StreamOutcome, StreamPhase};
pub use summary::{compose_send_text, SUMMARY_INSTRUCTION};

use crate::api::{ChatProvider, ModelConfig, ProviderRouter, WireEvent};
use crate::conversation::{ChatRepository, ConversationId, Message, MessageId, Role};
use crate::error::ChatError;
use futures_util::StreamExt;
use handle::ConversationState;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("message {0} is not an assistant message")]
    NotAssistant(MessageId),

    #[error("no user message precedes {0}")]
    NoPrecedingUserMessage(MessageId),

    #[error("history summary failed: {0}")]
    Summary(ChatError),
}

type ConversationSlot = Arc<Mutex<ConversationState>>;

/// Drives streamed generations and persists them through the repository
pub struct StreamOrchestrator {
    repository: Arc<dyn ChatRepository>,
    router: Arc<ProviderRouter>,
    conversations: Mutex<HashMap<ConversationId, ConversationSlot>>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamOrchestrator {
    /// Create an orchestrator and the receiver its notifications arrive on
    pub fn new(
        repository: Arc<dyn ChatRepository>,
        router: Arc<ProviderRouter>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let orchestrator = Self {
            repository,
            router,
            conversations: Mutex::new(HashMap::new()),
            events,
        };
        (orchestrator, receiver)
    }

    pub fn repository(&self) -> &Arc<dyn ChatRepository> {
        &self.repository
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    async fn slot(&self, conversation_id: ConversationId) -> ConversationSlot {
        self.conversations
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    async fn existing_slot(&self, conversation_id: ConversationId) -> Option<ConversationSlot> {
        self.conversations.lock().await.get(&conversation_id).cloned()
    }

    pub async fn phase(&self, conversation_id: ConversationId) -> StreamPhase {
        match self.existing_slot(conversation_id).await {
            Some(slot) => slot.lock().await.phase(),
            None => StreamPhase::Idle,
        }
    }

    /// The assistant message currently being written, if any
    pub async fn active_message(&self, conversation_id: ConversationId) -> Option<MessageId> {
        let slot = self.existing_slot(conversation_id).await?;
        let state = slot.lock().await;
        state.active.as_ref().map(StreamHandle::message_id)
    }

    pub async fn is_regeneratable(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> bool {
        match self.existing_slot(conversation_id).await {
            Some(slot) => slot.lock().await.regeneratable.contains(&message_id),
            None => false,
        }
    }

    /// Send `user_message` and stream the reply into a new assistant message
    pub async fn start(
        &self,
        conversation_id: ConversationId,
        user_message: Message,
        config: ModelConfig,
    ) -> StreamHandle {
        self.send(conversation_id, user_message, None, config).await
    }

    /// Persist `display_text` as the user turn but send `send_text` in its place
    pub async fn combine_then_send(
        &self,
        conversation_id: ConversationId,
        display_text: &str,
        send_text: &str,
        config: ModelConfig,
    ) -> StreamHandle {
        self.send(
            conversation_id,
            Message::user(display_text),
            Some(send_text.to_string()),
            config,
        )
        .await
    }

    async fn send(
        &self,
        conversation_id: ConversationId,
        user_message: Message,
        send_text: Option<String>,
        config: ModelConfig,
    ) -> StreamHandle {
        let slot = self.slot(conversation_id).await;
        let mut state = slot.lock().await;
        self.cancel_locked(conversation_id, &mut state);

        let user_id = user_message.id;
        self.repository
            .append_message(conversation_id, user_message)
            .await;

        let mut context = self.context(conversation_id).await;
        if let Some(send_text) = send_text {
            // Substitution applies to this request only; the log keeps the display text
            if let Some(turn) = context.iter_mut().rev().find(|m| m.id == user_id) {
                turn.content = send_text;
            }
        }

        let placeholder = Message::assistant("");
        self.repository
            .append_message(conversation_id, placeholder.clone())
            .await;

        self.launch(&slot, &mut state, conversation_id, placeholder, context, config)
    }

    /// Cancel the live generation; returns false when there was none
    pub async fn cancel(&self, conversation_id: ConversationId) -> bool {
        let Some(slot) = self.existing_slot(conversation_id).await else {
            return false;
        };
        let mut state = slot.lock().await;
        self.cancel_locked(conversation_id, &mut state)
    }

    /// Cancel any live generation and drop the conversation's bookkeeping.
    /// Returns false when the orchestrator never saw the conversation.
    pub async fn forget(&self, conversation_id: ConversationId) -> bool {
        let Some(slot) = self.conversations.lock().await.remove(&conversation_id) else {
            return false;
        };
        let mut state = slot.lock().await;
        self.cancel_locked(conversation_id, &mut state);
        debug!(%conversation_id, "Conversation state dropped");
        true
    }

    /// Delete a conversation from the repository, stopping its generation first
    pub async fn delete_conversation(&self, conversation_id: ConversationId) {
        self.forget(conversation_id).await;
        self.repository.delete_conversation(conversation_id).await;
    }

    fn cancel_locked(&self, conversation_id: ConversationId, state: &mut ConversationState) -> bool {
        let Some(handle) = state.active.take() else {
            return false;
        };

        handle.cancel();
        state.regeneratable.insert(handle.message_id());
        info!(
            %conversation_id,
            message_id = %handle.message_id(),
            generation = handle.generation(),
            "Generation cancelled"
        );

        self.emit(StreamEvent::finished(&handle, StreamOutcome::Cancelled));
        self.emit(StreamEvent::notice(&handle, ChatError::Cancelled));
        true
    }

    /// Regenerate an assistant message in place from the context that preceded it
    pub async fn regenerate(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        config: ModelConfig,
    ) -> Result<StreamHandle, OrchestratorError> {
        let slot = self.slot(conversation_id).await;
        let mut state = slot.lock().await;

        let messages = self.repository.fetch_messages(conversation_id).await;
        let index = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(OrchestratorError::MessageNotFound(message_id))?;
        if messages[index].role != Role::Assistant {
            return Err(OrchestratorError::NotAssistant(message_id));
        }
        let user_index = messages[..index]
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or(OrchestratorError::NoPrecedingUserMessage(message_id))?;

        self.cancel_locked(conversation_id, &mut state);

        // Everything up to the user turn; the old reply is left out
        let context: Vec<Message> = messages[..=user_index]
            .iter()
            .filter(|m| is_context_message(m))
            .cloned()
            .collect();

        self.repository
            .update_message_content(conversation_id, message_id, "")
            .await;
        self.repository
            .update_message_reasoning(conversation_id, message_id, "")
            .await;

        let mut message = messages[index].clone();
        message.content.clear();
        message.reasoning = None;

        debug!(%conversation_id, %message_id, context = context.len(), "Regenerating message");
        Ok(self.launch(&slot, &mut state, conversation_id, message, context, config))
    }

    /// Messages sent to the model for the next turn
    async fn context(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.repository
            .fetch_messages(conversation_id)
            .await
            .into_iter()
            .filter(is_context_message)
            .collect()
    }

    fn launch(
        &self,
        slot: &ConversationSlot,
        state: &mut ConversationState,
        conversation_id: ConversationId,
        message: Message,
        context: Vec<Message>,
        config: ModelConfig,
    ) -> StreamHandle {
        let handle = state.allocate(conversation_id, message.id);
        let provider = self.router.adapter_for(&config);

        info!(
            %conversation_id,
            message_id = %message.id,
            generation = handle.generation(),
            provider = provider.name(),
            model = %config.model_name,
            "Generation started"
        );

        self.emit(StreamEvent::Started {
            conversation_id,
            generation: handle.generation(),
            message: message.clone(),
        });

        let task = ConsumeTask {
            handle: handle.clone(),
            slot: slot.clone(),
            repository: self.repository.clone(),
            events: self.events.clone(),
            provider,
            message,
            context,
            config,
        };
        // Blocks on the conversation lock until the caller releases it
        tokio::spawn(task.run());

        handle
    }

    fn emit(&self, event: StreamEvent) {
        send_event(&self.events, event);
    }
}

fn send_event(events: &mpsc::UnboundedSender<StreamEvent>, event: StreamEvent) {
    if events.send(event).is_err() {
        debug!("Event receiver dropped");
    }
}

/// Empty assistant messages (placeholders that never got a token) are not context
fn is_context_message(message: &Message) -> bool {
    !(message.role == Role::Assistant && message.content.is_empty())
}

enum Update {
    Content,
    Reasoning,
}

/// The task that consumes one generation's wire events
struct ConsumeTask {
    handle: StreamHandle,
    slot: ConversationSlot,
    repository: Arc<dyn ChatRepository>,
    events: mpsc::UnboundedSender<StreamEvent>,
    provider: Arc<dyn ChatProvider>,
    message: Message,
    context: Vec<Message>,
    config: ModelConfig,
}

impl ConsumeTask {
    async fn run(mut self) {
        let result = self.consume().await;
        self.finish(result).await;
    }

    async fn consume(&mut self) -> Result<(), ChatError> {
        let token = self.handle.token().clone();

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ChatError::Cancelled),
            stream = self.provider.stream_tokens(&self.context, &self.config) => stream?,
        };

        loop {
            if token.is_cancelled() {
                return Err(ChatError::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ChatError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                None | Some(Ok(WireEvent::Done)) => return Ok(()),
                Some(Ok(WireEvent::Token(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.message.content.push_str(&text);
                    self.persist(Update::Content).await?;
                }
                Some(Ok(WireEvent::Reasoning(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.message
                        .reasoning
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                    self.persist(Update::Reasoning).await?;
                }
                Some(Ok(WireEvent::Ignore)) => continue,
                Some(Err(err)) => return Err(err),
            }
        }
    }

    /// Write the current buffer, unless this generation no longer owns the message
    async fn persist(&self, update: Update) -> Result<(), ChatError> {
        let state = self.slot.lock().await;
        if !state.may_write(&self.handle) {
            debug!(
                message_id = %self.message.id,
                generation = self.handle.generation(),
                "Write from superseded generation rejected"
            );
            return Err(ChatError::Cancelled);
        }

        let conversation_id = self.handle.conversation_id();
        let event = match update {
            Update::Content => {
                self.repository
                    .update_message_content(conversation_id, self.message.id, &self.message.content)
                    .await;
                StreamEvent::ContentUpdated {
                    conversation_id,
                    generation: self.handle.generation(),
                    message: self.message.clone(),
                }
            }
            Update::Reasoning => {
                self.repository
                    .update_message_reasoning(
                        conversation_id,
                        self.message.id,
                        self.message.reasoning_text(),
                    )
                    .await;
                StreamEvent::ReasoningUpdated {
                    conversation_id,
                    generation: self.handle.generation(),
                    message: self.message.clone(),
                }
            }
        };

        // Sent under the lock so notification order matches persistence order
        send_event(&self.events, event);
        Ok(())
    }

    async fn finish(self, result: Result<(), ChatError>) {
        let mut state = self.slot.lock().await;
        let conversation_id = self.handle.conversation_id();

        if !state.is_current(&self.handle) {
            // cancel() or a newer generation already did the bookkeeping
            debug!(
                message_id = %self.message.id,
                generation = self.handle.generation(),
                "Superseded generation stopped"
            );
            return;
        }

        state.active = None;
        state.regeneratable.insert(self.message.id);

        let outcome = match result {
            Ok(()) => {
                info!(
                    %conversation_id,
                    message_id = %self.message.id,
                    chars = self.message.content.chars().count(),
                    "Generation completed"
                );
                StreamOutcome::Completed
            }
            Err(ChatError::Cancelled) => StreamOutcome::Cancelled,
            Err(err) => {
                warn!(%conversation_id, message_id = %self.message.id, error = %err, "Generation failed");
                StreamOutcome::Failed(err)
            }
        };

        let notice = match &outcome {
            StreamOutcome::Failed(err) => Some(err.clone()),
            StreamOutcome::Cancelled => Some(ChatError::Cancelled),
            StreamOutcome::Completed => None,
        };

        send_event(&self.events, StreamEvent::finished(&self.handle, outcome));
        if let Some(error) = notice {
            send_event(&self.events, StreamEvent::notice(&self.handle, error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Scripted, ScriptedTransport};
    use crate::api::{OpenAIStyleAdapter, ProviderKind};
    use crate::conversation::InMemoryRepository;
    use crate::error::{HttpFailure, TransportError};
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        orchestrator: StreamOrchestrator,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        transport: Arc<ScriptedTransport>,
        repository: Arc<InMemoryRepository>,
        conversation: ConversationId,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let repository = Arc::new(InMemoryRepository::new());
        let router = ProviderRouter::single(Arc::new(OpenAIStyleAdapter::new(transport.clone())));
        let (orchestrator, events) = StreamOrchestrator::new(repository.clone(), Arc::new(router));
        Harness {
            orchestrator,
            events,
            transport,
            repository,
            conversation: Uuid::new_v4(),
        }
    }

    fn config() -> ModelConfig {
        ModelConfig::new(ProviderKind::OpenAIStyle, "x")
    }

    fn delta(text: &str) -> String {
        format!(r#"data: {{"choices":[{{"delta":{{"content":"{}"}}}}]}}"#, text)
    }

    /// Collect events up to and including the `Finished` raised by `handle`
    async fn until_finished(
        events: &mut mpsc::UnboundedReceiver<StreamEvent>,
        handle: &StreamHandle,
    ) -> Vec<StreamEvent> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                let done =
                    matches!(&event, StreamEvent::Finished { .. }) && event.belongs_to(handle);
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("stream did not finish");
        seen
    }

    /// Wait for the next content update and return its text
    async fn next_content(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(StreamEvent::ContentUpdated { message, .. }) => return message.content,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("no content update")
    }

    /// Yield until the transport has seen `count` requests
    async fn wait_for_requests(transport: &ScriptedTransport, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.requests().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request was never sent");
    }

    fn sent_messages(transport: &ScriptedTransport, index: usize) -> Vec<serde_json::Value> {
        transport.requests()[index].body.as_ref().unwrap()["messages"]
            .as_array()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_streams_tokens_into_placeholder() {
        let mut h = harness();
        h.transport
            .push_lines(&[delta("He"), delta("llo"), "data: [DONE]".to_string()]);

        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Idle);
        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("hi"), config())
            .await;
        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Streaming);
        assert_eq!(
            h.orchestrator.active_message(h.conversation).await,
            Some(handle.message_id())
        );

        let events = until_finished(&mut h.events, &handle).await;
        let content_updates: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentUpdated { message, .. } => Some(message.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(content_updates, vec!["He".to_string(), "Hello".to_string()]);
        assert!(matches!(events.first(), Some(StreamEvent::Started { .. })));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finished { outcome: StreamOutcome::Completed, .. })
        ));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StreamEvent::Finished { .. }))
                .count(),
            1
        );

        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Idle);
        assert!(h
            .orchestrator
            .is_regeneratable(h.conversation, handle.message_id())
            .await);

        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "hi");
        assert_eq!(log[1].id, handle.message_id());
        assert_eq!(log[1].content, "Hello");
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reasoning_is_persisted_separately() {
        let mut h = harness();
        h.transport.push_lines(&[
            r#"data: {"choices":[{"delta":{"reasoning_content":"think"}}]}"#.to_string(),
            delta("answer"),
        ]);

        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("q"), config())
            .await;
        let events = until_finished(&mut h.events, &handle).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ReasoningUpdated { message, .. } if message.reasoning_text() == "think")));
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[1].content, "answer");
        assert_eq!(log[1].reasoning.as_deref(), Some("think"));
    }

    #[tokio::test]
    async fn test_new_start_supersedes_live_stream() {
        let mut h = harness();
        let old_lines = h.transport.push_channel();
        h.transport
            .push_lines(&[delta("fresh"), "data: [DONE]".to_string()]);

        let old = h
            .orchestrator
            .start(h.conversation, Message::user("first"), config())
            .await;
        old_lines.send(Ok(delta("partial"))).unwrap();
        assert_eq!(next_content(&mut h.events).await, "partial");

        let new = h
            .orchestrator
            .start(h.conversation, Message::user("second"), config())
            .await;
        assert!(old.is_cancelled());
        assert_ne!(old.message_id(), new.message_id());

        // Late token from the superseded stream
        let _ = old_lines.send(Ok(delta(" late")));

        let events = until_finished(&mut h.events, &new).await;
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Finished { message_id, outcome: StreamOutcome::Cancelled, .. }
                if *message_id == old.message_id()
        )));
        assert!(!events.iter().any(|e| matches!(
            e,
            StreamEvent::ContentUpdated { message, .. } if message.id == old.message_id()
        )));

        tokio::task::yield_now().await;
        let log = h.repository.fetch_messages(h.conversation).await;
        let old_reply = log.iter().find(|m| m.id == old.message_id()).unwrap();
        let new_reply = log.iter().find(|m| m.id == new.message_id()).unwrap();
        assert_eq!(old_reply.content, "partial");
        assert_eq!(new_reply.content, "fresh");
        assert!(h
            .orchestrator
            .is_regeneratable(h.conversation, old.message_id())
            .await);
    }

    #[tokio::test]
    async fn test_cancel_is_immediate_and_idempotent() {
        let mut h = harness();
        let _lines = h.transport.push_channel();

        assert!(!h.orchestrator.cancel(h.conversation).await);
        assert!(h.events.try_recv().is_err());

        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("hi"), config())
            .await;
        assert!(h.orchestrator.cancel(h.conversation).await);
        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Idle);
        assert!(h
            .orchestrator
            .is_regeneratable(h.conversation, handle.message_id())
            .await);

        let events = until_finished(&mut h.events, &handle).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finished { outcome: StreamOutcome::Cancelled, .. })
        ));
        match h.events.recv().await {
            Some(StreamEvent::Notice { error, text, .. }) => {
                assert_eq!(error, ChatError::Cancelled);
                assert_eq!(text, ChatError::Cancelled.user_message());
            }
            other => panic!("expected notice, got {:?}", other),
        }

        assert!(!h.orchestrator.cancel(h.conversation).await);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_surfaces_notice() {
        let mut h = harness();
        h.transport.push(Scripted::Fail(TransportError::Http(HttpFailure::new(503))));

        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("hi"), config())
            .await;
        let events = until_finished(&mut h.events, &handle).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finished {
                outcome: StreamOutcome::Failed(ChatError::ServerError(503)),
                ..
            })
        ));
        match h.events.recv().await {
            Some(StreamEvent::Notice { error, .. }) => assert_eq!(error, ChatError::ServerError(503)),
            other => panic!("expected notice, got {:?}", other),
        }
        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Idle);
        assert!(h
            .orchestrator
            .is_regeneratable(h.conversation, handle.message_id())
            .await);
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_content() {
        let mut h = harness();
        let lines = h.transport.push_channel();
        lines.send(Ok(delta("par"))).unwrap();
        lines
            .send(Err(TransportError::ConnectionDropped("reset".into())))
            .unwrap();

        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("hi"), config())
            .await;
        let events = until_finished(&mut h.events, &handle).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Finished {
                outcome: StreamOutcome::Failed(ChatError::NetworkUnavailable),
                ..
            })
        ));
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[1].content, "par");
    }

    #[tokio::test]
    async fn test_regenerate_reuses_message_and_drops_old_reply() {
        let mut h = harness();
        h.transport.push_lines(&[delta("bad answer")]);
        h.transport.push_lines(&[delta("good answer")]);

        let first = h
            .orchestrator
            .start(h.conversation, Message::user("question"), config())
            .await;
        until_finished(&mut h.events, &first).await;

        let second = h
            .orchestrator
            .regenerate(h.conversation, first.message_id(), config())
            .await
            .unwrap();
        assert_eq!(second.message_id(), first.message_id());
        assert_ne!(second.generation(), first.generation());

        let events = until_finished(&mut h.events, &second).await;
        match events.first() {
            Some(StreamEvent::Started { message, .. }) => {
                assert_eq!(message.id, first.message_id());
                assert!(message.content.is_empty());
            }
            other => panic!("expected start, got {:?}", other),
        }

        let sent = sent_messages(&h.transport, 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["content"], "question");

        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].id, first.message_id());
        assert_eq!(log[1].content, "good answer");
    }

    #[tokio::test]
    async fn test_regenerate_while_streaming_cancels_first() {
        let mut h = harness();
        let _live = h.transport.push_channel();
        h.transport.push_lines(&[delta("again")]);

        let live = h
            .orchestrator
            .start(h.conversation, Message::user("q"), config())
            .await;
        wait_for_requests(&h.transport, 1).await;
        let again = h
            .orchestrator
            .regenerate(h.conversation, live.message_id(), config())
            .await
            .unwrap();
        assert!(live.is_cancelled());

        let events = until_finished(&mut h.events, &again).await;
        let finishes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Finished {
                    message_id,
                    generation,
                    outcome,
                    ..
                } => Some((*message_id, *generation, outcome.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            finishes,
            vec![
                (live.message_id(), live.generation(), StreamOutcome::Cancelled),
                (again.message_id(), again.generation(), StreamOutcome::Completed),
            ]
        );

        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].content, "again");
    }

    #[tokio::test]
    async fn test_regenerate_clears_persisted_reply_before_streaming() {
        let mut h = harness();
        h.transport.push_lines(&[
            r#"data: {"choices":[{"delta":{"reasoning_content":"old think"}}]}"#.to_string(),
            delta("old"),
        ]);

        let first = h
            .orchestrator
            .start(h.conversation, Message::user("q"), config())
            .await;
        until_finished(&mut h.events, &first).await;
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[1].content, "old");
        assert_eq!(log[1].reasoning.as_deref(), Some("old think"));

        let lines = h.transport.push_channel();
        let again = h
            .orchestrator
            .regenerate(h.conversation, first.message_id(), config())
            .await
            .unwrap();
        wait_for_requests(&h.transport, 2).await;

        // Nothing streamed yet for the new generation
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].id, first.message_id());
        assert_eq!(log[1].content, "");
        assert_eq!(log[1].reasoning, None);
        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Streaming);

        lines.send(Ok(delta("new"))).unwrap();
        drop(lines);
        until_finished(&mut h.events, &again).await;
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[1].content, "new");
        assert_eq!(log[1].reasoning, None);
    }

    #[tokio::test]
    async fn test_forget_stops_generation_and_drops_state() {
        let mut h = harness();
        let lines = h.transport.push_channel();
        let handle = h
            .orchestrator
            .start(h.conversation, Message::user("q"), config())
            .await;
        lines.send(Ok(delta("par"))).unwrap();
        assert_eq!(next_content(&mut h.events).await, "par");

        assert!(h.orchestrator.forget(h.conversation).await);
        assert!(handle.is_cancelled());
        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Idle);
        assert!(!h
            .orchestrator
            .is_regeneratable(h.conversation, handle.message_id())
            .await);
        assert!(!h.orchestrator.conversations.lock().await.contains_key(&h.conversation));

        let _ = lines.send(Ok(delta("tial")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[1].content, "par");

        assert!(!h.orchestrator.forget(h.conversation).await);
        h.orchestrator.delete_conversation(h.conversation).await;
        assert!(h.repository.fetch_messages(h.conversation).await.is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_rejects_bad_targets() {
        let h = harness();
        let user = Message::user("q");
        let user_id = user.id;
        let orphan = Message::assistant("no question");
        let orphan_id = orphan.id;
        h.repository.append_message(h.conversation, orphan).await;
        h.repository.append_message(h.conversation, user).await;

        let missing = Uuid::new_v4();
        assert_eq!(
            h.orchestrator
                .regenerate(h.conversation, missing, config())
                .await
                .unwrap_err(),
            OrchestratorError::MessageNotFound(missing)
        );
        assert_eq!(
            h.orchestrator
                .regenerate(h.conversation, user_id, config())
                .await
                .unwrap_err(),
            OrchestratorError::NotAssistant(user_id)
        );
        assert_eq!(
            h.orchestrator
                .regenerate(h.conversation, orphan_id, config())
                .await
                .unwrap_err(),
            OrchestratorError::NoPrecedingUserMessage(orphan_id)
        );
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_combine_then_send_keeps_display_text() {
        let mut h = harness();
        h.transport.push_lines(&[delta("ok")]);

        let handle = h
            .orchestrator
            .combine_then_send(h.conversation, "short", "summary\n\nshort", config())
            .await;
        until_finished(&mut h.events, &handle).await;

        let sent = sent_messages(&h.transport, 0);
        assert_eq!(sent.last().unwrap()["content"], "summary\n\nshort");

        let log = h.repository.fetch_messages(h.conversation).await;
        assert_eq!(log[0].content, "short");
        assert_eq!(log[1].content, "ok");
    }

    #[tokio::test]
    async fn test_empty_placeholder_not_sent_as_context() {
        let mut h = harness();
        let _stalled = h.transport.push_channel();
        h.transport.push_lines(&[delta("done")]);

        let first = h
            .orchestrator
            .start(h.conversation, Message::user("one"), config())
            .await;
        wait_for_requests(&h.transport, 1).await;
        h.orchestrator.cancel(h.conversation).await;
        let second = h
            .orchestrator
            .start(h.conversation, Message::user("two"), config())
            .await;
        until_finished(&mut h.events, &second).await;

        let sent = sent_messages(&h.transport, 1);
        let roles: Vec<_> = sent.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "user"]);

        // The placeholder itself stays in the log
        let log = h.repository.fetch_messages(h.conversation).await;
        assert!(log.iter().any(|m| m.id == first.message_id() && m.content.is_empty()));
    }

    #[tokio::test]
    async fn test_conversations_are_independent() {
        let mut h = harness();
        let _stalled = h.transport.push_channel();
        h.transport.push_lines(&[delta("b")]);
        let other = Uuid::new_v4();

        h.orchestrator
            .start(h.conversation, Message::user("a"), config())
            .await;
        wait_for_requests(&h.transport, 1).await;
        let b = h
            .orchestrator
            .start(other, Message::user("b"), config())
            .await;
        until_finished(&mut h.events, &b).await;

        assert_eq!(h.orchestrator.phase(h.conversation).await, StreamPhase::Streaming);
        assert_eq!(h.orchestrator.phase(other).await, StreamPhase::Idle);
    }
}
