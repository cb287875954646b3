//! Anchor grammar and resolution to half-open line ranges.
//!
//! - `line:<N>`      1-based line N → `[N-1, N)`, clamped to `[0, len]`
//! - `regex:<pat>`   first multiline match in the whole document → the lines it spans
//! - `SECTION:<key>` first line containing `SECTION:<key>` → empty range just after it

use std::ops::Range;
use std::str::FromStr;

use regex::RegexBuilder;

use super::buffer::LineBuffer;
use super::PatchError;

const LINE_PREFIX: &str = "line:";
const REGEX_PREFIX: &str = "regex:";
const SECTION_PREFIX: &str = "SECTION:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Line(i64),
    Regex(String),
    Section(String),
}

impl FromStr for Anchor {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(number) = s.strip_prefix(LINE_PREFIX) {
            let line = number.trim().parse::<i64>().map_err(|_| {
                PatchError::InvalidAnchor(format!("'{s}' is not a valid line number"))
            })?;
            Ok(Anchor::Line(line))
        } else if let Some(pattern) = s.strip_prefix(REGEX_PREFIX) {
            Ok(Anchor::Regex(pattern.to_string()))
        } else if let Some(key) = s.strip_prefix(SECTION_PREFIX) {
            Ok(Anchor::Section(key.trim().to_string()))
        } else {
            Err(PatchError::InvalidAnchor(format!(
                "unsupported anchor format '{s}'"
            )))
        }
    }
}

impl Anchor {
    pub fn resolve(&self, buffer: &LineBuffer) -> Result<Range<usize>, PatchError> {
        match self {
            Anchor::Line(number) => {
                let len = buffer.len() as i64;
                let index = number.saturating_sub(1).clamp(0, len) as usize;
                Ok(index..index + 1)
            }
            Anchor::Regex(pattern) => {
                let regex = RegexBuilder::new(pattern)
                    .multi_line(true)
                    .build()
                    .map_err(|e| PatchError::InvalidAnchor(format!("bad regex '{pattern}': {e}")))?;
                let text = buffer.joined();
                let found = regex
                    .find(&text)
                    .ok_or_else(|| PatchError::AnchorNotFound(format!("regex:{pattern}")))?;
                let start = text[..found.start()].matches('\n').count();
                let spanned = found.as_str().matches('\n').count() + 1;
                Ok(start..start + spanned)
            }
            Anchor::Section(key) => {
                let marker = format!("{SECTION_PREFIX}{key}");
                let index = buffer
                    .lines()
                    .iter()
                    .position(|line| line.contains(&marker))
                    .ok_or_else(|| PatchError::AnchorNotFound(marker.clone()))?;
                Ok(index + 1..index + 1)
            }
        }
    }
}

/// Parses and resolves an anchor string in one step.
pub fn resolve_anchor(anchor: &str, buffer: &LineBuffer) -> Result<Range<usize>, PatchError> {
    anchor.parse::<Anchor>()?.resolve(buffer)
}
