//! Document text as an owned, ordered sequence of lines.
//!
//! All edits are index-range splices. Ranges are clamped to the buffer, so an
//! anchor that resolves past the end appends instead of panicking.

use std::ops::Range;

/// Converts `\r\n` line endings to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineBuffer {
    lines: Vec<String>,
}

impl LineBuffer {
    /// Splits normalized text into lines. A single trailing newline terminates
    /// the last line rather than starting an empty one.
    pub fn parse(text: &str) -> Self {
        let normalized = normalize_line_endings(text);
        let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
        if normalized.is_empty() {
            return Self::default();
        }
        Self {
            lines: body.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines joined with `\n`, without a trailing newline.
    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }

    /// File contents: every line terminated by `\n`. A blank last line
    /// survives the `parse`/`render` round trip.
    pub fn render(&self) -> String {
        let mut text = self.joined();
        text.push('\n');
        text
    }

    /// Lines in `range` widened by `context` on both sides, clamped.
    pub fn window(&self, range: &Range<usize>, context: usize) -> &[String] {
        let start = range.start.saturating_sub(context).min(self.len());
        let end = range.end.saturating_add(context).min(self.len()).max(start);
        &self.lines[start..end]
    }

    fn clamp(&self, range: &Range<usize>) -> Range<usize> {
        let start = range.start.min(self.len());
        let end = range.end.min(self.len()).max(start);
        start..end
    }

    /// Splices `new_lines` in before index `at`; existing lines are untouched.
    pub fn insert_at(&mut self, at: usize, new_lines: Vec<String>) {
        let at = at.min(self.len());
        self.lines.splice(at..at, new_lines);
    }

    /// Removes `range` and splices `new_lines` in at its start.
    pub fn replace(&mut self, range: &Range<usize>, new_lines: Vec<String>) {
        let range = self.clamp(range);
        self.lines.splice(range, new_lines);
    }

    pub fn delete(&mut self, range: &Range<usize>) {
        let range = self.clamp(range);
        self.lines.drain(range);
    }
}
