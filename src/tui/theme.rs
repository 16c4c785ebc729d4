//! Terminal theme and color definitions

use crossterm::style::Color;

/// Colors used by the chat shell
pub struct Theme {
    /// User prompt symbol
    pub prompt: Color,
    /// Streamed reply text
    pub assistant: Color,
    /// Streamed reasoning ("thinking") text
    pub reasoning: Color,
    pub system: Color,
    pub error: Color,
    /// Notices raised by a generation (cancelled, rate limited, ...)
    pub notice: Color,
    pub dim: Color,
    pub success: Color,
    pub title: Color,
    pub stats: Color,
    pub command: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            prompt: Color::Cyan,
            assistant: Color::White,
            reasoning: Color::DarkGrey,
            system: Color::DarkYellow,
            error: Color::Red,
            notice: Color::Yellow,
            dim: Color::DarkGrey,
            success: Color::Green,
            title: Color::Magenta,
            stats: Color::Blue,
            command: Color::Yellow,
        }
    }
}
