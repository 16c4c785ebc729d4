//! Terminal rendering for streamed replies

use crossterm::style::{Color, Stylize};
use std::io::Write;
use std::time::Duration;
use termimad::MadSkin;

use super::theme::Theme;
use crate::conversation::{Message, Role};

/// Terminal renderer with markdown and styled output
pub struct TerminalRenderer {
    theme: Theme,
    skin: MadSkin,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        let theme = Theme::default();
        let skin = Self::build_skin(&theme);
        Self { theme, skin }
    }

    fn build_skin(theme: &Theme) -> MadSkin {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(to_termimad_color(theme.title));
        skin.bold.set_fg(to_termimad_color(Color::White));
        skin.italic.set_fg(to_termimad_color(Color::DarkYellow));
        skin.inline_code.set_fg(to_termimad_color(Color::Green));
        skin.code_block.set_fg(to_termimad_color(Color::Green));
        skin
    }

    pub fn render_banner(&self, version: &str, profile: &str, provider: &str, model: &str, mock: bool) {
        println!();
        println!("{}", "  chat-stream".with(self.theme.title));
        println!("  {} {}", "v".with(self.theme.dim), version.with(self.theme.dim));
        println!(
            "  {} {} {}",
            "Profile:".with(self.theme.dim),
            profile.with(self.theme.stats),
            format!("({} / {})", provider, model).with(self.theme.dim),
        );
        if mock {
            println!(
                "  {}",
                "Mock mode: replies come from the template provider".with(self.theme.notice)
            );
        }
        println!(
            "  {}",
            "Type /help for commands, /quit to exit".with(self.theme.dim)
        );
        println!();
    }

    /// Print newly streamed reply text as-is
    pub fn render_delta(&self, text: &str) {
        print!("{}", text.with(self.theme.assistant));
        let _ = std::io::stdout().flush();
    }

    /// Print newly streamed reasoning text
    pub fn render_reasoning_delta(&self, text: &str) {
        print!("{}", text.with(self.theme.reasoning).italic());
        let _ = std::io::stdout().flush();
    }

    /// Separator printed once between reasoning and the reply
    pub fn render_reasoning_end(&self) {
        println!();
        println!("  {}", "\u{2500}\u{2500}\u{2500}".with(self.theme.dim));
    }

    /// Re-render a completed reply when it carries markdown worth formatting
    pub fn render_markdown(&self, content: &str) {
        println!();
        if has_markdown_elements(content) {
            println!();
            self.skin.print_text(content);
        }
    }

    pub fn render_reply_footer(&self, model: &str, chars: usize, elapsed: Duration) {
        println!(
            "\n  {} {} chars in {} [{}]",
            "\u{2022}".with(self.theme.dim),
            chars.to_string().with(self.theme.stats),
            format!("{:.1}s", elapsed.as_secs_f64()).with(self.theme.stats),
            model.with(self.theme.dim),
        );
        println!();
    }

    /// Render a notice raised by a generation
    pub fn render_notice(&self, text: &str) {
        println!(
            "  {} {}",
            "!".with(self.theme.notice),
            text.with(self.theme.notice)
        );
    }

    /// One line per message for `/history`
    pub fn render_history_entry(&self, index: usize, message: &Message) {
        let (label, color) = match message.role {
            Role::User => ("you", self.theme.prompt),
            Role::Assistant => ("assistant", self.theme.assistant),
            Role::System => ("system", self.theme.system),
        };
        let preview = preview(&message.content, 72);
        let preview = if preview.is_empty() {
            "(empty)".to_string()
        } else {
            preview
        };
        println!(
            "  {} {:<10} {}",
            format!("[{}]", index).with(self.theme.dim),
            label.with(color),
            preview,
        );
    }

    pub fn render_system(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{25b6}".with(self.theme.system),
            msg.with(self.theme.system)
        );
    }

    pub fn render_error(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{2717}".with(self.theme.error),
            msg.with(self.theme.error)
        );
    }

    pub fn render_success(&self, msg: &str) {
        println!(
            "  {} {}",
            "\u{2713}".with(self.theme.success),
            msg.with(self.theme.success)
        );
    }

    pub fn render_info(&self, msg: &str) {
        println!("  {}", msg.with(self.theme.dim));
    }

    pub fn prompt_color(&self) -> Color {
        self.theme.prompt
    }

    pub fn command_color(&self) -> Color {
        self.theme.command
    }

    pub fn dim_color(&self) -> Color {
        self.theme.dim
    }

    pub fn stats_color(&self) -> Color {
        self.theme.stats
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if content has markdown elements worth re-rendering
fn has_markdown_elements(content: &str) -> bool {
    content.contains("```")
        || content.contains("# ")
        || content.contains("**")
        || content.contains("| ")
        || content.contains("- [")
}

/// First line of `text`, cut to `max_chars` characters
fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// termimad pins its own crossterm, so colors are mapped by name
fn to_termimad_color(color: Color) -> termimad::crossterm::style::Color {
    use termimad::crossterm::style::Color as Mad;
    match color {
        Color::Black => Mad::Black,
        Color::DarkGrey => Mad::DarkGrey,
        Color::Red => Mad::Red,
        Color::DarkRed => Mad::DarkRed,
        Color::Green => Mad::Green,
        Color::DarkGreen => Mad::DarkGreen,
        Color::Yellow => Mad::Yellow,
        Color::DarkYellow => Mad::DarkYellow,
        Color::Blue => Mad::Blue,
        Color::DarkBlue => Mad::DarkBlue,
        Color::Magenta => Mad::Magenta,
        Color::DarkMagenta => Mad::DarkMagenta,
        Color::Cyan => Mad::Cyan,
        Color::DarkCyan => Mad::DarkCyan,
        Color::White => Mad::White,
        Color::Grey => Mad::Grey,
        Color::Rgb { r, g, b } => Mad::Rgb { r, g, b },
        Color::AnsiValue(v) => Mad::AnsiValue(v),
        _ => Mad::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_detection() {
        assert!(has_markdown_elements("```rust\nfn main() {}\n```"));
        assert!(has_markdown_elements("## Heading"));
        assert!(has_markdown_elements("some **bold** text"));
        assert!(!has_markdown_elements("Just a plain sentence."));
    }

    #[test]
    fn test_preview_cuts_on_characters() {
        assert_eq!(preview("short\nsecond line", 10), "short");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("", 5), "");
    }
}
