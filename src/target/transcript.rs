//! Bounded command transcript
//!
//! Keeps the most recent lines of every dispatched command and its output.

use std::collections::VecDeque;

const DEFAULT_MAX_LINES: usize = 5_000;

#[derive(Debug)]
pub struct Transcript {
    lines: VecDeque<String>,
    max_lines: usize,
    dropped: usize,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LINES)
    }
}

impl Transcript {
    pub fn with_capacity(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
            dropped: 0,
        }
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.max_lines {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line.into());
    }

    /// Record a dispatched command followed by its output lines
    pub fn record(&mut self, command: &str, output: &str, exit_code: Option<i32>) {
        self.push_line(format!("$ {}", command));
        for line in output.lines() {
            self.push_line(line);
        }
        match exit_code {
            Some(code) => self.push_line(format!("[exit {}]", code)),
            None => self.push_line("[not dispatched]"),
        }
    }

    /// Last `n` lines joined with newlines
    pub fn tail(&self, n: usize) -> String {
        let skip = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whole retained transcript, noting how many lines were discarded
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        if self.dropped > 0 {
            text.push_str(&format!("[{} earlier lines discarded]\n", self.dropped));
        }
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
