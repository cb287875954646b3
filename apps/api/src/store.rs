//! File-backed run records.
//!
//! Layout under the data root, one directory per run:
//!
//! ```text
//! <root>/<run id>/config.json      immutable RunConfig
//! <root>/<run id>/summary.json     RunState, rewritten after every transition
//! <root>/<run id>/<stage>.json     validated stage output
//! <root>/<run id>/build.log        build tool output
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::run::{RunState, RunStatus, Stage};

const CONFIG_FILE: &str = "config.json";
const SUMMARY_FILE: &str = "summary.json";

/// Query parameters for `GET /api/v1/runs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Creates the run directory and writes the initial `config.json` and `summary.json`.
    pub async fn create_run(&self, state: &RunState) -> Result<PathBuf, AppError> {
        let dir = self.run_dir(state.id);
        tokio::fs::create_dir_all(&dir).await?;
        write_json(&dir.join(CONFIG_FILE), &state.config).await?;
        self.save_state(state).await?;
        Ok(dir)
    }

    /// Overwrites `summary.json` with a full snapshot of `state`.
    pub async fn save_state(&self, state: &RunState) -> Result<(), AppError> {
        let path = self.run_dir(state.id).join(SUMMARY_FILE);
        write_json(&path, state).await?;
        debug!("Run {} persisted with status {:?}", state.id, state.status);
        Ok(())
    }

    /// Writes `<stage>.json` for a run and returns its path.
    pub async fn write_artifact<T: Serialize>(
        &self,
        id: Uuid,
        stage: Stage,
        output: &T,
    ) -> Result<PathBuf, AppError> {
        let path = self.run_dir(id).join(stage.artifact_file());
        write_json(&path, output).await?;
        Ok(path)
    }

    pub async fn read_run(&self, id: Uuid) -> Result<RunState, AppError> {
        let path = self.run_dir(id).join(SUMMARY_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Run {id} not found")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    /// Newest first. Directories without a readable summary are skipped.
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunState>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(id) = entry.file_name().to_string_lossy().parse::<Uuid>() else {
                continue;
            };
            match self.read_run(id).await {
                Ok(state) => runs.push(state),
                Err(e) => warn!("Skipping unreadable run {id}: {e}"),
            }
        }

        if let Some(status) = filter.status {
            runs.retain(|run| run.status == status);
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)?;
    write_atomic(path, text).await?;
    Ok(())
}

/// Replaces `path` with `contents` via a temp file in the same directory and a
/// rename, so readers see either the old or the new file. Existing permissions
/// are carried over.
pub(crate) async fn write_atomic(path: &Path, contents: String) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        if let Ok(metadata) = std::fs::metadata(&path) {
            tmp.as_file().set_permissions(metadata.permissions())?;
        }
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
