//! Waiting spinner shown until the first streamed event

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICKS: &[&str] = &[
    "\u{2800}", "\u{2801}", "\u{2803}", "\u{2807}", "\u{280f}", "\u{281f}", "\u{283f}",
    "\u{287f}", "\u{28ff}", "\u{28fe}", "\u{28fc}", "\u{28f8}", "\u{28f0}", "\u{28e0}",
    "\u{28c0}", "\u{2880}", "\u{2800}",
];

pub struct ThinkingSpinner {
    bar: ProgressBar,
    active: bool,
}

impl ThinkingSpinner {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        // Keep indicatif's default style if the template is rejected
        if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg} {elapsed:.dim}") {
            bar.set_style(style.tick_strings(TICKS));
        }
        Self { bar, active: false }
    }

    pub fn start(&mut self, msg: &str) {
        self.bar.set_message(msg.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.active = true;
    }

    pub fn set_message(&self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    /// Stop and clear the spinner; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.active {
            self.bar.finish_and_clear();
            self.active = false;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for ThinkingSpinner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThinkingSpinner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent() {
        let mut spinner = ThinkingSpinner::new();
        assert!(!spinner.is_active());
        spinner.start("Waiting...");
        assert!(spinner.is_active());
        spinner.stop();
        spinner.stop();
        assert!(!spinner.is_active());
    }
}
