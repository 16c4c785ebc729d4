//! Slash command parsing and definitions

use crossterm::style::Stylize;

/// Available slash commands
#[derive(Debug, PartialEq)]
pub enum SlashCommand {
    Help,
    Quit,
    /// Start a fresh conversation
    New,
    Profile(Option<String>),
    Model(Option<String>),
    /// Toggle reasoning output for the current profile
    Think,
    /// Regenerate the last reply in place
    Retry,
    /// Summarise history and send the text with that summary attached
    Combine(String),
    History,
    Status,
    Unknown(String),
}

/// Parse a slash command from user input.
/// Returns None if the input is not a slash command.
pub fn parse_command(input: &str) -> Option<SlashCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let (cmd, rest) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (input, ""),
    };
    let arg = if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    };

    let command = match cmd.to_lowercase().as_str() {
        "/help" | "/h" | "/?" => SlashCommand::Help,
        "/quit" | "/q" | "/exit" => SlashCommand::Quit,
        "/new" | "/clear" => SlashCommand::New,
        "/profile" | "/p" => SlashCommand::Profile(arg),
        "/model" => SlashCommand::Model(arg),
        "/think" => SlashCommand::Think,
        "/retry" | "/regen" => SlashCommand::Retry,
        "/combine" => match arg {
            Some(text) => SlashCommand::Combine(text),
            None => SlashCommand::Unknown("/combine needs a message".to_string()),
        },
        "/history" => SlashCommand::History,
        "/status" => SlashCommand::Status,
        other => SlashCommand::Unknown(format!("Unknown command: {}", other)),
    };
    Some(command)
}

/// Render help text for all slash commands
pub fn render_help(renderer: &super::renderer::TerminalRenderer) {
    let cmd_color = renderer.command_color();
    let dim_color = renderer.dim_color();

    println!();
    renderer.render_system("Available commands:");
    println!();

    let commands = [
        ("/help", "Show this help message"),
        ("/quit", "Exit the chat"),
        ("/new", "Start a new conversation"),
        ("/profile [name]", "Show profiles or switch to one"),
        ("/model [name]", "Show or change the model of the current profile"),
        ("/think", "Toggle reasoning output"),
        ("/retry", "Regenerate the last reply"),
        ("/combine <text>", "Send text with a summary of the history attached"),
        ("/history", "Show the messages of this conversation"),
        ("/status", "Show profile, provider and stream state"),
    ];

    for (cmd, desc) in &commands {
        println!("  {:<25} {}", cmd.with(cmd_color), desc.with(dim_color));
    }
    println!();
    println!(
        "  {}",
        "End a line with \\ to continue it. Ctrl-C stops the reply being streamed."
            .with(dim_color)
    );
    println!();
}
