//! Base résumé loader and diff target resolution.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::errors::AppError;
use crate::patch::PatchError;

/// Main document, relative to the workspace root.
pub const BASE_DOCUMENT: &str = "resume/cv.tex";
/// Directory of optional include fragments, relative to the workspace root.
pub const INCLUDE_DIR: &str = "resume/includes";

/// Snapshot of the résumé sources handed to every stage prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeContext {
    pub main: String,
    /// Include fragments keyed by file name, in name order.
    pub includes: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reads `resume/cv.tex` and every `*.tex` file in `resume/includes`.
    /// The include directory is optional.
    pub async fn load(&self) -> Result<ResumeContext, AppError> {
        let main_path = self.root.join(BASE_DOCUMENT);
        let main = match tokio::fs::read_to_string(&main_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::MissingBaseDocument(main_path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut includes = BTreeMap::new();
        let include_dir = self.root.join(INCLUDE_DIR);
        let mut entries = match tokio::fs::read_dir(&include_dir).await {
            Ok(entries) => Some(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(entries) = entries.as_mut() {
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".tex") || !entry.file_type().await?.is_file() {
                    continue;
                }
                let text = tokio::fs::read_to_string(entry.path()).await?;
                includes.insert(name, text);
            }
        }

        debug!("Loaded base document with {} include(s)", includes.len());
        Ok(ResumeContext { main, includes })
    }

    /// Maps a diff's `target_file` to a path inside the workspace.
    /// Absolute paths and parent-directory components are rejected.
    pub fn resolve_target(&self, target_file: &str) -> Result<PathBuf, PatchError> {
        let relative = Path::new(target_file);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(PatchError::TargetOutsideWorkspace(target_file.to_string()));
        }
        Ok(self.root.join(relative))
    }
}
