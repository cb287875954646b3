//! Scripted collaborators for pipeline tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{
    Completion, CompletionOptions, CompletionProvider, LlmError, Prompt, ProviderId,
};
use crate::render::{BuildResult, BuildStatus, BuildTool, BUILD_LOG};

pub enum Reply {
    Content(String),
    Failure(u16),
}

impl Reply {
    pub fn content(value: Value) -> Self {
        Reply::Content(value.to_string())
    }
}

/// Answers calls from a fixed queue, in order, and records every prompt.
pub struct ScriptedProvider {
    id: ProviderId,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId, replies: Vec<Reply>) -> Self {
        Self {
            id,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Prompt> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        self.calls.lock().unwrap().push(prompt.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Content(content)) => Ok(Completion {
                id: Uuid::new_v4().to_string(),
                model: options.model.clone(),
                content,
                usage: None,
            }),
            Some(Reply::Failure(status)) => Err(LlmError::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Err(LlmError::EmptyContent),
        }
    }
}

/// Build tool with a fixed outcome that counts invocations.
pub struct ScriptedBuildTool {
    status: BuildStatus,
    builds: AtomicUsize,
}

impl ScriptedBuildTool {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildTool for ScriptedBuildTool {
    async fn build(&self, _run_id: Uuid, run_dir: &Path) -> Result<BuildResult, AppError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let log_path = run_dir.join(BUILD_LOG);
        tokio::fs::write(&log_path, "scripted build\n").await?;
        Ok(BuildResult {
            status: self.status,
            log_path: log_path.display().to_string(),
            pdf_path: match self.status {
                BuildStatus::Ok => Some(run_dir.join("final.pdf").display().to_string()),
                BuildStatus::Failed => None,
            },
        })
    }
}

/// Schema-valid stage outputs. Numbers are floats so that values survive a
/// typed round trip unchanged.
pub mod fixtures {
    use serde_json::{json, Value};

    pub fn reviewer() -> Value {
        json!({
            "ats_keywords": ["Rust", "Tokio", "Kubernetes"],
            "coverage": {"must_have_pct": 62.5, "nice_to_have_pct": 30.0},
            "section_issues": [
                {"section": "experience", "issue": "no metrics", "evidence": "Worked on services"}
            ],
            "bullet_suggestions": [
                {"section": "experience", "latex_fragment": "\\item Cut latency by 40\\%", "rationale": "impact"}
            ]
        })
    }

    pub fn swot() -> Value {
        json!({
            "strengths": ["systems programming"],
            "weaknesses": ["no cloud keywords"],
            "opportunities": ["highlight Kubernetes work"],
            "threats": ["crowded applicant pool"],
            "positioning_statement": "Backend engineer who ships reliable Rust services."
        })
    }

    /// `diffs` are `(target_file, patch_type, anchor, content)` tuples.
    pub fn refiner(diffs: &[(&str, &str, &str, &str)]) -> Value {
        let diffs: Vec<Value> = diffs
            .iter()
            .map(|(target, patch_type, anchor, content)| {
                json!({
                    "target_file": target,
                    "patch_type": patch_type,
                    "anchor": anchor,
                    "content": content,
                    "rationale": "align with the job description"
                })
            })
            .collect();
        json!({ "diffs": diffs })
    }

    pub fn judge(status: &str) -> Value {
        json!({
            "status": status,
            "reasons": ["edits are grounded"],
            "numeric_scores": {"clarity": 8.0, "brevity": 7.0, "impact": 8.0, "ats_fit": 9.0},
            "flagged": []
        })
    }
}
