//! chat_stream - one streaming pipeline for several chat backends
//!
//! This library talks to OpenAI-compatible (delta streaming) and DashScope
//! (message streaming) chat endpoints and exposes a single streaming
//! abstraction on top of them.
//!
//! ## Key Features
//!
//! - **Wire parsers**: provider SSE lines become provider-agnostic [`WireEvent`]s
//! - **Error taxonomy**: transport and HTTP failures map onto one closed [`ChatError`] set
//! - **Provider routing**: pick an adapter per [`ModelConfig`], or force a template adapter in tests
//! - **Stream orchestration**: one live generation per conversation, with cancel,
//!   regenerate and combine-then-send

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod tui;

pub use api::{
    ChatProvider, DashScopeAdapter, DashScopeParser, HttpRequest, HttpTransport, ModelConfig,
    OpenAIStyleAdapter, OpenAIStyleParser, ProviderKind, ProviderRouter, TemplateAdapter,
    Transport, WireEvent, WireParser,
};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use conversation::{
    Attachment, AttachmentKind, ChatRepository, Conversation, ConversationId, InMemoryRepository,
    Message, MessageId, Role,
};
pub use error::{map_error, ChatError, HttpFailure, TransportError};
pub use orchestrator::{
    OrchestratorError, StreamEvent, StreamHandle, StreamOrchestrator, StreamOutcome, StreamPhase,
};
