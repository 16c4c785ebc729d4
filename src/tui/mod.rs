//! Interactive terminal UI for chat-stream
//!
//! A line-based shell on top of [`StreamOrchestrator`]: replies stream as they
//! are persisted, Ctrl-C cancels the live generation, and slash commands cover
//! regenerate, combine-then-send and profile switching.

pub mod commands;
pub mod prompt;
pub mod renderer;
pub mod spinner;
pub mod theme;

use crate::api::{HttpTransport, ModelConfig, ProviderRouter, TemplateAdapter};
use crate::config::Config;
use crate::conversation::{ChatRepository, ConversationId, InMemoryRepository, Message, MessageId};
use crate::error::ChatError;
use crate::orchestrator::{
    OrchestratorError, StreamEvent, StreamHandle, StreamOrchestrator, StreamOutcome,
};

use commands::{parse_command, render_help, SlashCommand};
use prompt::PromptHandler;
use renderer::TerminalRenderer;
use spinner::ThinkingSpinner;

use anyhow::Result;
use crossterm::style::Stylize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

/// Build an orchestrator over an in-memory repository and the HTTP transport.
/// `mock` routes every profile through the template provider.
pub fn build_orchestrator(
    config: &Config,
    mock: bool,
) -> Result<(StreamOrchestrator, UnboundedReceiver<StreamEvent>)> {
    let transport = HttpTransport::new(config.transport.to_transport_config())?;
    let mut router = ProviderRouter::new(Arc::new(transport));
    if mock {
        let delay = Duration::from_millis(config.chat.mock_chunk_delay_ms);
        router = router.with_override(Arc::new(TemplateAdapter::default().with_chunk_delay(delay)));
    }

    let repository: Arc<dyn ChatRepository> = Arc::new(InMemoryRepository::new());
    Ok(StreamOrchestrator::new(repository, Arc::new(router)))
}

/// Tracks how much of a streaming message has already been printed
#[derive(Debug, Default)]
pub struct ReplyView {
    content_printed: usize,
    reasoning_printed: usize,
}

impl ReplyView {

    /// Unprinted tail of the reply content, if any
    pub fn content_delta(&mut self, message: &Message) -> Option<String> {
        Self::delta(&message.content, &mut self.content_printed)
    }

    /// Unprinted tail of the reasoning text, if any
    pub fn reasoning_delta(&mut self, message: &Message) -> Option<String> {
        Self::delta(message.reasoning_text(), &mut self.reasoning_printed)
    }

    pub fn has_content(&self) -> bool {
        self.content_printed > 0
    }

    pub fn has_reasoning(&self) -> bool {
        self.reasoning_printed > 0
    }

    fn delta(text: &str, printed: &mut usize) -> Option<String> {
        let tail = text.get(*printed..)?;
        if tail.is_empty() {
            return None;
        }
        *printed = text.len();
        Some(tail.to_string())
    }
}

/// Print one generation as it streams until it finishes.
///
/// Ctrl-C cancels the generation. Returns the outcome and the final content.
pub async fn follow_reply(
    orchestrator: &StreamOrchestrator,
    events: &mut UnboundedReceiver<StreamEvent>,
    handle: &StreamHandle,
    renderer: &TerminalRenderer,
    show_reasoning: bool,
) -> (StreamOutcome, String) {
    let mut spinner = ThinkingSpinner::new();
    spinner.start("Waiting for reply...");

    let mut view = ReplyView::default();
    let mut content = String::new();
    let mut finished: Option<StreamOutcome> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                debug!("Interrupt received");
                orchestrator.cancel(handle.conversation_id()).await;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                // Includes stale events of an earlier run of the same message
                if !event.belongs_to(handle) {
                    continue;
                }

                match event {
                    StreamEvent::ReasoningUpdated { message, .. } => {
                        spinner.stop();
                        if let Some(delta) = view.reasoning_delta(&message) {
                            if show_reasoning {
                                if !view.has_content() && view.reasoning_printed == delta.len() {
                                    println!();
                                }
                                renderer.render_reasoning_delta(&delta);
                            }
                        }
                    }
                    StreamEvent::ContentUpdated { message, .. } => {
                        spinner.stop();
                        if let Some(delta) = view.content_delta(&message) {
                            if view.content_printed == delta.len() {
                                if show_reasoning && view.has_reasoning() {
                                    renderer.render_reasoning_end();
                                } else {
                                    println!();
                                }
                            }
                            renderer.render_delta(&delta);
                        }
                        content = message.content;
                    }
                    StreamEvent::Finished { outcome, .. } => {
                        spinner.stop();
                        let completed = outcome == StreamOutcome::Completed;
                        finished = Some(outcome);
                        if completed {
                            break;
                        }
                        // A notice always follows a generation that did not complete
                    }
                    StreamEvent::Notice { text, .. } => {
                        spinner.stop();
                        if view.has_content() || view.has_reasoning() {
                            println!();
                        }
                        renderer.render_notice(&text);
                        if finished.is_some() {
                            break;
                        }
                    }
                    StreamEvent::Started { .. } => {}
                }
            }
        }
    }

    spinner.stop();
    let outcome = finished.unwrap_or(StreamOutcome::Cancelled);
    (outcome, content)
}

/// Interactive shell driving one conversation at a time
pub struct InteractiveShell {
    config: Config,
    profile: String,
    model_config: ModelConfig,
    orchestrator: StreamOrchestrator,
    events: UnboundedReceiver<StreamEvent>,
    conversation: ConversationId,
    renderer: TerminalRenderer,
    prompt_handler: PromptHandler,
    /// Assistant message `/retry` regenerates
    last_reply: Option<MessageId>,
    turn_count: usize,
    mock: bool,
}

impl InteractiveShell {
    /// Create a shell on `profile` (or the configured default)
    pub async fn new(config: Config, profile: Option<String>, mock: bool) -> Result<Self> {
        let profile = profile.unwrap_or_else(|| config.default_profile.clone());
        let model_config = config.model_config(Some(&profile))?;
        let (orchestrator, events) = build_orchestrator(&config, mock)?;
        let conversation = orchestrator
            .repository()
            .create_conversation("Chat")
            .await
            .id;

        Ok(Self {
            config,
            profile,
            model_config,
            orchestrator,
            events,
            conversation,
            renderer: TerminalRenderer::new(),
            prompt_handler: PromptHandler::new(),
            last_reply: None,
            turn_count: 0,
            mock,
        })
    }

    /// Run the interactive shell main loop
    pub async fn run(&mut self) -> Result<()> {
        self.renderer.render_banner(
            env!("CARGO_PKG_VERSION"),
            &self.profile,
            self.model_config.provider.as_str(),
            &self.model_config.model_name,
            self.mock,
        );

        loop {
            let input = match self.prompt_handler.read_line(self.renderer.prompt_color()) {
                Some(input) => input,
                None => {
                    self.render_session_summary();
                    break;
                }
            };

            if input.is_empty() {
                continue;
            }

            if let Some(cmd) = parse_command(&input) {
                match self.handle_command(cmd).await {
                    CommandResult::Continue => continue,
                    CommandResult::Quit => {
                        self.render_session_summary();
                        break;
                    }
                }
            } else {
                let started = Instant::now();
                let handle = self
                    .orchestrator
                    .start(self.conversation, Message::user(input), self.model_config.clone())
                    .await;
                self.follow(handle, started).await;
            }
        }

        Ok(())
    }

    async fn handle_command(&mut self, cmd: SlashCommand) -> CommandResult {
        match cmd {
            SlashCommand::Help => render_help(&self.renderer),
            SlashCommand::Quit => return CommandResult::Quit,
            SlashCommand::New => {
                self.orchestrator.forget(self.conversation).await;
                self.conversation = self
                    .orchestrator
                    .repository()
                    .create_conversation("Chat")
                    .await
                    .id;
                self.last_reply = None;
                self.renderer.render_success("Started a new conversation.");
            }
            SlashCommand::Profile(None) => self.render_profiles(),
            SlashCommand::Profile(Some(name)) => match self.config.model_config(Some(&name)) {
                Ok(model_config) => {
                    self.model_config = model_config;
                    self.profile = name;
                    self.renderer.render_success(&format!(
                        "Switched to profile {} ({} / {})",
                        self.profile,
                        self.model_config.provider,
                        self.model_config.model_name
                    ));
                }
                Err(e) => self.renderer.render_error(&e.to_string()),
            },
            SlashCommand::Model(None) => {
                self.renderer
                    .render_info(&format!("Current model: {}", self.model_config.model_name));
            }
            SlashCommand::Model(Some(name)) => {
                self.model_config.model_name = name;
                self.renderer.render_success(&format!(
                    "Model set to: {}",
                    self.model_config.model_name
                ));
            }
            SlashCommand::Think => {
                self.model_config.thinking = !self.model_config.thinking;
                let state = if self.model_config.thinking { "on" } else { "off" };
                self.renderer
                    .render_success(&format!("Reasoning output {}", state));
            }
            SlashCommand::Retry => self.retry().await,
            SlashCommand::Combine(text) => self.combine(&text).await,
            SlashCommand::History => self.render_history().await,
            SlashCommand::Status => self.render_status().await,
            SlashCommand::Unknown(msg) => {
                self.renderer.render_error(&msg);
                self.renderer.render_info("Type /help for the list of commands.");
            }
        }
        CommandResult::Continue
    }

    async fn retry(&mut self) {
        let Some(message_id) = self.last_reply else {
            self.renderer.render_error("Nothing to regenerate yet.");
            return;
        };

        let started = Instant::now();
        match self
            .orchestrator
            .regenerate(self.conversation, message_id, self.model_config.clone())
            .await
        {
            Ok(handle) => self.follow(handle, started).await,
            Err(e) => self.renderer.render_error(&e.to_string()),
        }
    }

    async fn combine(&mut self, text: &str) {
        let started = Instant::now();
        let mut spinner = ThinkingSpinner::new();
        spinner.start("Summarising history...");
        let result = self
            .orchestrator
            .summarize_and_send(self.conversation, text, self.model_config.clone())
            .await;
        spinner.stop();

        match result {
            Ok(handle) => self.follow(handle, started).await,
            Err(OrchestratorError::Summary(err)) => {
                self.renderer
                    .render_error(&format!("Summary failed: {}", err.user_message()));
            }
            Err(e) => self.renderer.render_error(&e.to_string()),
        }
    }

    /// Stream a generation to the terminal and record its result
    async fn follow(&mut self, handle: StreamHandle, started: Instant) {
        let (outcome, content) = follow_reply(
            &self.orchestrator,
            &mut self.events,
            &handle,
            &self.renderer,
            self.config.chat.show_reasoning,
        )
        .await;

        self.last_reply = Some(handle.message_id());
        match outcome {
            StreamOutcome::Completed => {
                self.turn_count += 1;
                self.renderer.render_markdown(&content);
                self.renderer.render_reply_footer(
                    &self.model_config.model_name,
                    content.chars().count(),
                    started.elapsed(),
                );
            }
            StreamOutcome::Failed(ChatError::InvalidApiKey | ChatError::Unauthorized) => {
                self.renderer.render_info(
                    "Set the key in the config file or the provider's environment variable.",
                );
            }
            StreamOutcome::Failed(_) | StreamOutcome::Cancelled => {
                self.renderer.render_info("Use /retry to regenerate this reply.");
            }
        }
    }

    fn render_profiles(&self) {
        self.renderer.render_system("Profiles:");
        for (name, profile) in &self.config.profiles {
            let marker = if *name == self.profile { "*" } else { " " };
            println!(
                "  {} {:<20} {}",
                marker.with(self.renderer.command_color()),
                name.as_str().with(self.renderer.command_color()),
                format!("{} / {}", profile.provider, profile.model).with(self.renderer.dim_color()),
            );
        }
    }

    async fn render_history(&self) {
        let messages = self
            .orchestrator
            .repository()
            .fetch_messages(self.conversation)
            .await;
        if messages.is_empty() {
            self.renderer.render_info("No messages yet.");
            return;
        }
        println!();
        for (index, message) in messages.iter().enumerate() {
            self.renderer.render_history_entry(index, message);
        }
        println!();
    }

    async fn render_status(&self) {
        let messages = self
            .orchestrator
            .repository()
            .fetch_messages(self.conversation)
            .await;
        let phase = self.orchestrator.phase(self.conversation).await;

        println!();
        self.renderer.render_system("Current Status:");
        let rows = [
            ("Profile:", self.profile.clone()),
            ("Provider:", self.model_config.provider.to_string()),
            ("Model:", self.model_config.model_name.clone()),
            ("Reasoning:", if self.model_config.thinking { "on" } else { "off" }.to_string()),
            ("Stream:", format!("{:?}", phase)),
            ("Conversation:", self.conversation.to_string()),
            ("Messages:", messages.len().to_string()),
        ];
        for (label, value) in rows {
            println!(
                "  {:<14} {}",
                label.with(self.renderer.dim_color()),
                value.with(self.renderer.stats_color()),
            );
        }
        println!();
    }

    fn render_session_summary(&self) {
        println!();
        self.renderer.render_system("Session Summary:");
        println!(
            "  {} replies completed",
            self.turn_count.to_string().with(self.renderer.stats_color()),
        );
        self.renderer.render_info("Goodbye!");
        println!();
    }
}

/// Result of handling a slash command
enum CommandResult {
    Continue,
    Quit,
}
