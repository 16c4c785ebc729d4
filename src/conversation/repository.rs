//! Repository collaborator for conversations and messages
//!
//! The orchestrator awaits each call in turn and relies on writes for the same
//! message id never being reordered.

use super::{Conversation, ConversationId, Message, MessageId};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

/// Storage for conversation logs
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create_conversation(&self, title: &str) -> Conversation;

    async fn conversations(&self) -> Vec<Conversation>;

    async fn delete_conversation(&self, conversation_id: ConversationId);

    async fn append_message(&self, conversation_id: ConversationId, message: Message);

    async fn update_message_content(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: &str,
    );

    async fn update_message_reasoning(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reasoning: &str,
    );

    async fn fetch_messages(&self, conversation_id: ConversationId) -> Vec<Message>;
}

/// Process-local repository, used by the shell and in tests
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    conversations: RwLock<Vec<Conversation>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_message<F>(&self, conversation_id: ConversationId, message_id: MessageId, f: F)
    where
        F: FnOnce(&mut Message),
    {
        let mut conversations = self.conversations.write().await;
        let message = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.messages.iter_mut().find(|m| m.id == message_id));

        match message {
            Some(message) => f(message),
            None => warn!(
                %conversation_id,
                %message_id,
                "Update for unknown message ignored"
            ),
        }
    }
}

#[async_trait]
impl ChatRepository for InMemoryRepository {
    async fn create_conversation(&self, title: &str) -> Conversation {
        let conversation = Conversation::new(title);
        self.conversations.write().await.push(conversation.clone());
        conversation
    }

    async fn conversations(&self) -> Vec<Conversation> {
        self.conversations.read().await.clone()
    }

    async fn delete_conversation(&self, conversation_id: ConversationId) {
        self.conversations
            .write()
            .await
            .retain(|c| c.id != conversation_id);
    }

    async fn append_message(&self, conversation_id: ConversationId, message: Message) {
        let mut conversations = self.conversations.write().await;
        match conversations.iter_mut().find(|c| c.id == conversation_id) {
            Some(conversation) => conversation.messages.push(message),
            None => {
                // First write creates the log, so callers need not pre-register ids.
                let mut conversation = Conversation::new("New conversation");
                conversation.id = conversation_id;
                conversation.messages.push(message);
                conversations.push(conversation);
            }
        }
    }

    async fn update_message_content(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        content: &str,
    ) {
        self.with_message(conversation_id, message_id, |m| {
            m.content = content.to_string();
        })
        .await;
    }

    async fn update_message_reasoning(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reasoning: &str,
    ) {
        self.with_message(conversation_id, message_id, |m| {
            m.reasoning = if reasoning.is_empty() {
                None
            } else {
                Some(reasoning.to_string())
            };
        })
        .await;
    }

    async fn fetch_messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }
}
