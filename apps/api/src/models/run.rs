use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::ProviderId;
use crate::pipeline::schemas::{FinalizerOutput, Verdict};
use crate::render::BuildStatus;

/// Minimum job-description length (characters) accepted by `RunConfig::validate`.
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 10;

/// One step of the fixed pipeline. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reviewer,
    Swot,
    Refiner,
    Judge,
    Finalizer,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Reviewer,
        Stage::Swot,
        Stage::Refiner,
        Stage::Judge,
        Stage::Finalizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reviewer => "reviewer",
            Stage::Swot => "swot",
            Stage::Refiner => "refiner",
            Stage::Judge => "judge",
            Stage::Finalizer => "finalizer",
        }
    }

    /// File name of this stage's artifact inside a run directory.
    pub fn artifact_file(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider selection per stage. Every field is required, so an incomplete map
/// fails deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMap {
    pub reviewer: ProviderId,
    pub swot: ProviderId,
    pub refiner: ProviderId,
    pub judge: ProviderId,
    pub finalizer: ProviderId,
}

impl ProviderMap {
    /// Same provider for every stage.
    pub fn uniform(id: ProviderId) -> Self {
        Self {
            reviewer: id,
            swot: id,
            refiner: id,
            judge: id,
            finalizer: id,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> ProviderId {
        match stage {
            Stage::Reviewer => self.reviewer,
            Stage::Swot => self.swot,
            Stage::Refiner => self.refiner,
            Stage::Judge => self.judge,
            Stage::Finalizer => self.finalizer,
        }
    }
}

/// Immutable input to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub job_description: String,
    pub dry_run: bool,
    pub providers: ProviderMap,
}

impl RunConfig {
    /// Parses and validates a raw request body.
    pub fn from_json(value: Value) -> Result<Self, AppError> {
        let config: RunConfig =
            serde_json::from_value(value).map_err(|e| AppError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let length = self.job_description.chars().count();
        if length < MIN_JOB_DESCRIPTION_CHARS {
            return Err(AppError::InvalidConfig(format!(
                "jobDescription must be at least {MIN_JOB_DESCRIPTION_CHARS} characters (got {length})"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Record of one stage execution. One per stage per run, updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub stage: Stage,
    pub status: ArtifactStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
}

impl Artifact {
    pub fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: ArtifactStatus::Pending,
            output: None,
            error: None,
            stored_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    NeedsReview,
    Failed,
    Completed,
}

/// Derives the overall run status. Never assigned directly.
///
/// Precedence: a recorded run fault, then the finalize build result, then any
/// failed stage, then an exhausted revision loop (two `REVISE` verdicts).
pub fn derive_status(
    artifacts: &[Artifact],
    verdicts: &[Verdict],
    build: Option<BuildStatus>,
    faulted: bool,
) -> RunStatus {
    if faulted {
        return RunStatus::Failed;
    }
    match build {
        Some(BuildStatus::Ok) => return RunStatus::Completed,
        Some(BuildStatus::Failed) => return RunStatus::NeedsReview,
        None => {}
    }
    if artifacts.iter().any(|a| a.status == ArtifactStatus::Failed) {
        return RunStatus::Failed;
    }
    let revisions = verdicts.iter().filter(|v| **v == Verdict::Revise).count();
    if revisions >= 2 {
        return RunStatus::NeedsReview;
    }
    if artifacts.iter().all(|a| a.status == ArtifactStatus::Pending) {
        RunStatus::Pending
    } else {
        RunStatus::Running
    }
}

/// Aggregate state of one run; the content of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: Uuid,
    pub status: RunStatus,
    pub config: RunConfig,
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Judge verdicts in the order they were returned.
    #[serde(default)]
    pub verdicts: Vec<Verdict>,
    #[serde(default)]
    pub build_status: Option<BuildStatus>,
    #[serde(default)]
    pub pdf_path: Option<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default)]
    pub diff_summary: Option<String>,
    /// Message of the error that aborted the run, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunState {
    pub fn new(id: Uuid, config: RunConfig) -> Self {
        let now = Utc::now();
        let artifacts: Vec<Artifact> = Stage::ALL.into_iter().map(Artifact::pending).collect();
        Self {
            id,
            status: derive_status(&artifacts, &[], None, false),
            config,
            artifacts,
            created_at: now,
            updated_at: now,
            verdicts: Vec::new(),
            build_status: None,
            pdf_path: None,
            log_path: None,
            diff_summary: None,
            error: None,
        }
    }

    pub fn artifact(&self, stage: Stage) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }

    fn artifact_mut(&mut self, stage: Stage) -> &mut Artifact {
        let index = match self.artifacts.iter().position(|a| a.stage == stage) {
            Some(index) => index,
            None => {
                self.artifacts.push(Artifact::pending(stage));
                self.artifacts.len() - 1
            }
        };
        &mut self.artifacts[index]
    }

    /// Starts (or restarts, inside the revision loop) a stage. A rerun replaces
    /// the previous snapshot.
    pub fn mark_running(&mut self, stage: Stage) {
        let artifact = self.artifact_mut(stage);
        *artifact = Artifact::pending(stage);
        artifact.status = ArtifactStatus::Running;
        self.refresh();
    }

    pub fn record_success(&mut self, stage: Stage, output: Value, stored_path: PathBuf) {
        let artifact = self.artifact_mut(stage);
        artifact.status = ArtifactStatus::Succeeded;
        artifact.output = Some(output);
        artifact.error = None;
        artifact.stored_path = Some(stored_path);
        self.refresh();
    }

    pub fn record_failure(&mut self, stage: Stage, error: String) {
        let artifact = self.artifact_mut(stage);
        artifact.status = ArtifactStatus::Failed;
        artifact.error = Some(error);
        self.refresh();
    }

    pub fn record_verdict(&mut self, verdict: Verdict) {
        self.verdicts.push(verdict);
        self.refresh();
    }

    /// Records the finalize summary. The finalizer artifact succeeds only when
    /// the build did.
    pub fn record_finalize(
        &mut self,
        output: &FinalizerOutput,
        stored_path: PathBuf,
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(output)?;
        let artifact = self.artifact_mut(Stage::Finalizer);
        artifact.status = match output.build.status {
            BuildStatus::Ok => ArtifactStatus::Succeeded,
            BuildStatus::Failed => ArtifactStatus::Failed,
        };
        artifact.output = Some(value);
        artifact.stored_path = Some(stored_path);
        self.build_status = Some(output.build.status);
        self.log_path = Some(output.build.log_path.clone());
        self.pdf_path = output.build.pdf_path.clone();
        self.refresh();
        Ok(())
    }

    pub fn record_fault(&mut self, message: String) {
        self.error = Some(message);
        self.refresh();
    }

    pub fn set_diff_summary(&mut self, summary: Option<String>) {
        self.diff_summary = summary;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.status = derive_status(
            &self.artifacts,
            &self.verdicts,
            self.build_status,
            self.error.is_some(),
        );
        self.updated_at = Utc::now();
    }
}
