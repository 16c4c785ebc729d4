//! Stream ownership tokens and the notifications sent to callers

use crate::conversation::{ConversationId, Message, MessageId};
use crate::error::ChatError;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Ownership of one in-flight generation, bound to one assistant message
///
/// Write permission for the message lasts only while this handle is the
/// conversation's current one and its token is not cancelled.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    conversation_id: ConversationId,
    message_id: MessageId,
    generation: u64,
    token: CancellationToken,
}

impl StreamHandle {
    pub(crate) fn new(conversation_id: ConversationId, message_id: MessageId, generation: u64) -> Self {
        Self {
            conversation_id,
            message_id,
            generation,
            token: CancellationToken::new(),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Streaming,
}

/// How a generation ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed,
    Failed(ChatError),
    Cancelled,
}

/// Notification sent to the caller, in persistence order
///
/// Lifecycle events carry the generation that raised them: regenerating a
/// message reuses its id, so `(message_id, generation)` is what identifies
/// one run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A generation began; `message` is the (empty) assistant message it owns
    Started {
        conversation_id: ConversationId,
        generation: u64,
        message: Message,
    },
    ContentUpdated {
        conversation_id: ConversationId,
        generation: u64,
        message: Message,
    },
    ReasoningUpdated {
        conversation_id: ConversationId,
        generation: u64,
        message: Message,
    },
    /// The generation is over and the message may be regenerated
    Finished {
        conversation_id: ConversationId,
        message_id: MessageId,
        generation: u64,
        outcome: StreamOutcome,
    },
    /// System-visible notice carrying the error's user-facing text
    Notice {
        conversation_id: ConversationId,
        generation: u64,
        error: ChatError,
        text: String,
    },
}

impl StreamEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            StreamEvent::Started { conversation_id, .. }
            | StreamEvent::ContentUpdated { conversation_id, .. }
            | StreamEvent::ReasoningUpdated { conversation_id, .. }
            | StreamEvent::Finished { conversation_id, .. }
            | StreamEvent::Notice { conversation_id, .. } => *conversation_id,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            StreamEvent::Started { generation, .. }
            | StreamEvent::ContentUpdated { generation, .. }
            | StreamEvent::ReasoningUpdated { generation, .. }
            | StreamEvent::Finished { generation, .. }
            | StreamEvent::Notice { generation, .. } => *generation,
        }
    }

    /// Whether this event was raised by the generation `handle` owns
    pub fn belongs_to(&self, handle: &StreamHandle) -> bool {
        self.conversation_id() == handle.conversation_id && self.generation() == handle.generation
    }

    pub(crate) fn notice(handle: &StreamHandle, error: ChatError) -> Self {
        let text = error.user_message();
        StreamEvent::Notice {
            conversation_id: handle.conversation_id,
            generation: handle.generation,
            error,
            text,
        }
    }

    pub(crate) fn finished(handle: &StreamHandle, outcome: StreamOutcome) -> Self {
        StreamEvent::Finished {
            conversation_id: handle.conversation_id,
            message_id: handle.message_id,
            generation: handle.generation,
            outcome,
        }
    }
}

/// Per-conversation bookkeeping, guarded by the conversation's lock
#[derive(Debug, Default)]
pub(crate) struct ConversationState {
    pub(crate) active: Option<StreamHandle>,
    pub(crate) next_generation: u64,
    pub(crate) regeneratable: HashSet<MessageId>,
}

impl ConversationState {
    /// Whether `handle` is still the live generation
    pub(crate) fn is_current(&self, handle: &StreamHandle) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| active.generation == handle.generation)
    }

    /// Whether `handle` may write to its message right now
    pub(crate) fn may_write(&self, handle: &StreamHandle) -> bool {
        self.is_current(handle) && !handle.is_cancelled()
    }

    pub(crate) fn phase(&self) -> StreamPhase {
        if self.active.is_some() {
            StreamPhase::Streaming
        } else {
            StreamPhase::Idle
        }
    }

    pub(crate) fn allocate(&mut self, conversation_id: ConversationId, message_id: MessageId) -> StreamHandle {
        self.next_generation += 1;
        let handle = StreamHandle::new(conversation_id, message_id, self.next_generation);
        self.regeneratable.remove(&message_id);
        self.active = Some(handle.clone());
        handle
    }
}
