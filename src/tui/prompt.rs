//! Line input with continuation and history

use crossterm::style::{Color, Stylize};
use std::io::{self, BufRead, Write};

/// Reads user input; a line ending in `\` continues on the next line
pub struct PromptHandler {
    history: Vec<String>,
}

impl PromptHandler {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Display the prompt and read one (possibly continued) entry.
    /// Returns None on EOF (Ctrl+D).
    pub fn read_line(&mut self, prompt_color: Color) -> Option<String> {
        print!("{} ", ">".with(prompt_color));
        io::stdout().flush().ok()?;

        let stdin = io::stdin();
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) if lines.is_empty() => return None,
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    let continues = line.ends_with('\\');
                    lines.push(line);
                    if !continues {
                        break;
                    }
                    print!("{} ", ".".with(prompt_color));
                    io::stdout().flush().ok()?;
                }
                Err(_) => return None,
            }
        }

        let entry = join_continuation(&lines);
        if !entry.is_empty() {
            self.history.push(entry.clone());
        }
        Some(entry)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl Default for PromptHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Join raw input lines, dropping the trailing `\` of continued lines
pub fn join_continuation(lines: &[String]) -> String {
    let joined: Vec<&str> = lines
        .iter()
        .map(|line| line.strip_suffix('\\').unwrap_or(line))
        .collect();
    joined.join("\n").trim().to_string()
}
