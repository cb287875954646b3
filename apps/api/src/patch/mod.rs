//! Patch Engine: applies refiner diffs to résumé source files.
//!
//! Every failure here is scoped to a single diff: the finalize step records it
//! in the diff summary and moves on to the next one.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::pipeline::schemas::{Diff, PatchType, SchemaError};
use crate::store::write_atomic;

pub mod anchor;
pub mod buffer;

use anchor::resolve_anchor;
use buffer::{normalize_line_endings, LineBuffer};

/// First line of every inserted or replaced fragment.
pub const PROVENANCE_MARKER: &str = "% [agent:finalizer]";

/// Lines of original context shown on each side of the anchor in a preview.
const PREVIEW_CONTEXT: usize = 3;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Anchor not found: {0}")]
    AnchorNotFound(String),

    #[error("Invalid anchor: {0}")]
    InvalidAnchor(String),

    #[error("Unsupported patch type '{0}'")]
    UnsupportedPatchType(String),

    #[error("Diff failed validation: {0}")]
    Schema(#[from] SchemaError),

    #[error("Target '{0}' is outside the workspace")]
    TargetOutsideWorkspace(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result of one `apply_diff` call.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub preview: String,
    /// Full pre-patch text; `None` when nothing was written (dry run).
    pub backup: Option<String>,
}

/// Tags fragment lines with the provenance marker unless already tagged.
pub fn annotate(content: &str) -> Vec<String> {
    let normalized = normalize_line_endings(content);
    let trimmed = normalized.trim();
    let mut lines = Vec::new();
    if !trimmed.starts_with(PROVENANCE_MARKER) {
        lines.push(PROVENANCE_MARKER.to_string());
    }
    lines.extend(trimmed.split('\n').map(str::to_string));
    lines
}

/// Header, up to three lines of original context on each side, then the new content.
pub fn render_preview(
    diff: &Diff,
    original: &LineBuffer,
    range: &std::ops::Range<usize>,
) -> String {
    let header = format!(
        "# Diff for {} ({} @ {})",
        diff.target_file, diff.patch_type, diff.anchor
    );
    let context = original.window(range, PREVIEW_CONTEXT).join("\n");
    format!("{header}\n{context}\n---\n{}", diff.content)
}

/// Applies `diff` to the buffer in place.
pub fn apply_to_buffer(buffer: &mut LineBuffer, diff: &Diff, range: &std::ops::Range<usize>) {
    match diff.patch_type {
        PatchType::Insert => buffer.insert_at(range.end, annotate(&diff.content)),
        PatchType::Replace => buffer.replace(range, annotate(&diff.content)),
        PatchType::Delete => buffer.delete(range),
    }
}

/// Reads `target`, resolves the anchor and either previews (`dry_run`) or
/// writes the patched text atomically. The target is either fully replaced or
/// untouched.
pub async fn apply_diff(
    target: &Path,
    diff: &Diff,
    dry_run: bool,
) -> Result<PatchOutcome, PatchError> {
    let original = tokio::fs::read_to_string(target)
        .await
        .map_err(|source| PatchError::Io {
            path: target.to_path_buf(),
            source,
        })?;

    let mut buffer = LineBuffer::parse(&original);
    let range = resolve_anchor(&diff.anchor, &buffer)?;
    let preview = render_preview(diff, &buffer, &range);

    if dry_run {
        return Ok(PatchOutcome {
            preview,
            backup: None,
        });
    }

    apply_to_buffer(&mut buffer, diff, &range);
    write_atomic(target, buffer.render())
        .await
        .map_err(|source| PatchError::Io {
            path: target.to_path_buf(),
            source,
        })?;

    debug!(
        "Applied {} to {} at lines {}..{}",
        diff.patch_type,
        target.display(),
        range.start,
        range.end
    );

    Ok(PatchOutcome {
        preview,
        backup: Some(original),
    })
}

/// Restores a file to the exact text captured before a patch.
pub async fn restore(target: &Path, backup: &str) -> Result<(), PatchError> {
    write_atomic(target, backup.to_string())
        .await
        .map_err(|source| PatchError::Io {
            path: target.to_path_buf(),
            source,
        })
}
