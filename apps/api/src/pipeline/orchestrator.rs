//! Run Orchestrator: owns a run from config to terminal status.
//!
//! Flow: validate config → persist run → load résumé → reviewer → swot →
//!       refiner → judge → [refiner → judge on REVISE] → finalize (patch,
//!       build, single-step rollback).
//!
//! `RunState` is mutated only here and is written to `summary.json` after
//! every transition. A run that fails is persisted as `failed` before the
//! error is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::documents::DocumentStore;
use crate::errors::AppError;
use crate::models::run::{RunConfig, RunState, Stage};
use crate::patch::{self, PatchError, PatchOutcome};
use crate::pipeline::invoker::{StageContext, StageInvoker};
use crate::pipeline::schemas::{
    Diff, FinalizerOutput, JudgeOutput, RefinerOutput, ReviewerOutput, StageOutput, SwotOutput,
    Validate, Verdict,
};
use crate::render::{BuildResult, BuildTool};
use crate::store::{RunFilter, RunStore};

/// A patch that was written to disk, with the text needed to undo it.
#[derive(Debug)]
struct AppliedPatch {
    target: PathBuf,
    backup: String,
}

pub struct Orchestrator {
    invoker: StageInvoker,
    store: RunStore,
    documents: DocumentStore,
    build_tool: Arc<dyn BuildTool>,
}

impl Orchestrator {
    pub fn new(
        invoker: StageInvoker,
        store: RunStore,
        documents: DocumentStore,
        build_tool: Arc<dyn BuildTool>,
    ) -> Self {
        Self {
            invoker,
            store,
            documents,
            build_tool,
        }
    }

    /// Runs the whole pipeline and returns the terminal state.
    ///
    /// `InvalidConfig` is returned before anything is written. Every later
    /// error leaves a persisted `failed` run behind.
    pub async fn create_run(&self, config: RunConfig) -> Result<RunState, AppError> {
        config.validate()?;

        let mut state = RunState::new(Uuid::new_v4(), config);
        let run_dir = self.store.create_run(&state).await?;
        info!(
            "Run {} created (dry_run={})",
            state.id, state.config.dry_run
        );

        match self.drive(&mut state, &run_dir).await {
            Ok(()) => {
                self.store.save_state(&state).await?;
                info!("Run {} finished with status {:?}", state.id, state.status);
                Ok(state)
            }
            Err(e) => {
                error!("Run {} failed: {e}", state.id);
                state.record_fault(e.to_string());
                if let Err(save_err) = self.store.save_state(&state).await {
                    error!("Could not persist failed run {}: {save_err}", state.id);
                }
                Err(e)
            }
        }
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunState>, AppError> {
        self.store.list_runs(filter).await
    }

    pub async fn get_run(&self, id: Uuid) -> Result<RunState, AppError> {
        self.store.read_run(id).await
    }

    async fn drive(&self, state: &mut RunState, run_dir: &Path) -> Result<(), AppError> {
        let resume = self.documents.load().await?;
        let config = state.config.clone();
        let base = StageContext::new(&config.job_description, &resume);

        let reviewer: ReviewerOutput = self.run_stage(state, &base).await?;
        let swot: SwotOutput = self
            .run_stage(
                state,
                &StageContext {
                    reviewer: Some(&reviewer),
                    ..base
                },
            )
            .await?;

        let grounded = StageContext {
            reviewer: Some(&reviewer),
            swot: Some(&swot),
            ..base
        };

        let refiner: RefinerOutput = self.run_stage(state, &grounded).await?;
        let judge: JudgeOutput = self
            .run_stage(
                state,
                &StageContext {
                    refiner: Some(&refiner),
                    ..grounded
                },
            )
            .await?;
        state.record_verdict(judge.status);
        info!("Run {}: judge verdict {:?}", state.id, judge.status);

        if judge.status == Verdict::Pass {
            state.set_diff_summary(Some(refiner.preview()));
            return self.finalize(state, run_dir, &refiner).await;
        }

        // One revision round: the refiner sees its own earlier diffs and the
        // judge's feedback; the judge sees the new diffs and its earlier verdict.
        let revised: RefinerOutput = self
            .run_stage(
                state,
                &StageContext {
                    previous_refiner: Some(&refiner),
                    judge: Some(&judge),
                    ..grounded
                },
            )
            .await?;
        let second: JudgeOutput = self
            .run_stage(
                state,
                &StageContext {
                    refiner: Some(&revised),
                    judge: Some(&judge),
                    ..grounded
                },
            )
            .await?;
        state.record_verdict(second.status);
        state.set_diff_summary(Some(revised.preview()));
        info!("Run {}: second judge verdict {:?}", state.id, second.status);

        if second.status == Verdict::Revise {
            warn!(
                "Run {} still REVISE after one revision round; needs review",
                state.id
            );
            return Ok(());
        }

        self.finalize(state, run_dir, &revised).await
    }

    /// Marks the stage running, invokes it, records the outcome. State is
    /// persisted after each of those transitions.
    async fn run_stage<T: StageOutput>(
        &self,
        state: &mut RunState,
        context: &StageContext<'_>,
    ) -> Result<T, AppError> {
        let stage = T::STAGE;
        state.mark_running(stage);
        self.store.save_state(state).await?;
        info!("Run {}: stage {stage} running", state.id);

        let result = self
            .invoker
            .invoke::<T>(state.id, &state.config.providers, context)
            .await;
        match result {
            Ok(outcome) => {
                state.record_success(stage, outcome.value, outcome.stored_path);
                self.store.save_state(state).await?;
                info!("Run {}: stage {stage} succeeded", state.id);
                Ok(outcome.output)
            }
            Err(e) => {
                warn!("Run {}: stage {stage} failed: {e}", state.id);
                state.record_failure(stage, e.to_string());
                self.store.save_state(state).await?;
                Err(e)
            }
        }
    }

    /// Applies the accepted diffs, builds, and rolls back the most recent patch
    /// if the build fails.
    async fn finalize(
        &self,
        state: &mut RunState,
        run_dir: &Path,
        refiner: &RefinerOutput,
    ) -> Result<(), AppError> {
        state.mark_running(Stage::Finalizer);
        self.store.save_state(state).await?;
        let dry_run = state.config.dry_run;

        let mut applied: Vec<AppliedPatch> = Vec::new();
        let mut notes: Vec<String> = Vec::new();
        for diff in &refiner.diffs {
            match self.apply_one(diff, dry_run).await {
                Ok((target, outcome)) => {
                    notes.push(outcome.preview);
                    if let Some(backup) = outcome.backup {
                        applied.push(AppliedPatch { target, backup });
                    }
                }
                Err(e) => {
                    warn!("Run {}: skipping diff for {}: {e}", state.id, diff.target_file);
                    notes.push(format!("Failed to apply {}: {e}", diff.target_file));
                }
            }
        }

        let build = if dry_run {
            info!("Run {}: dry run, build skipped", state.id);
            BuildResult::dry_run()
        } else {
            let build = match self.build_tool.build(state.id, run_dir).await {
                Ok(build) => build,
                Err(e) => {
                    self.roll_back_last(&mut applied).await?;
                    return Err(e);
                }
            };
            if !build.is_ok() {
                self.roll_back_last(&mut applied).await?;
            }
            build
        };

        let total = refiner.diffs.len() as u32;
        let applied_count = if dry_run { 0 } else { applied.len() as u32 };
        let output = FinalizerOutput {
            applied: applied_count,
            skipped: total - applied_count,
            build,
        };
        output
            .validate()
            .map_err(|error| AppError::SchemaViolation {
                stage: Stage::Finalizer,
                error,
            })?;

        let stored_path = self
            .store
            .write_artifact(state.id, Stage::Finalizer, &output)
            .await?;
        state.record_finalize(&output, stored_path)?;
        state.set_diff_summary((!notes.is_empty()).then(|| notes.join("\n\n")));
        self.store.save_state(state).await?;

        info!(
            "Run {}: finalize applied {} skipped {} build {:?}",
            state.id, output.applied, output.skipped, output.build.status
        );
        Ok(())
    }

    async fn apply_one(
        &self,
        diff: &Diff,
        dry_run: bool,
    ) -> Result<(PathBuf, PatchOutcome), PatchError> {
        diff.validate()?;
        let target = self.documents.resolve_target(&diff.target_file)?;
        let outcome = patch::apply_diff(&target, diff, dry_run).await?;
        Ok((target, outcome))
    }

    /// Restores only the most recently applied patch and drops it from `applied`.
    async fn roll_back_last(&self, applied: &mut Vec<AppliedPatch>) -> Result<(), AppError> {
        let Some(last) = applied.pop() else {
            return Ok(());
        };
        warn!("Build failed; rolling back {}", last.target.display());
        patch::restore(&last.target, &last.backup)
            .await
            .map_err(|e| AppError::Internal(anyhow::Error::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::BASE_DOCUMENT;
    use crate::llm_client::{ProviderId, ProviderRegistry};
    use crate::models::run::{ArtifactStatus, ProviderMap, RunStatus};
    use crate::patch::PROVENANCE_MARKER;
    use crate::pipeline::invoker::CallPolicy;
    use crate::pipeline::testing::{fixtures, Reply, ScriptedBuildTool, ScriptedProvider};
    use crate::render::BuildStatus;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;

    const CV: &str = "\\documentclass{article}\n\
        \\begin{document}\n\
        % SECTION:EXPERIENCE\n\
        \\item Built services\n\
        % SECTION:SKILLS\n\
        Rust\n\
        \\end{document}\n";

    struct Harness {
        workspace: TempDir,
        orchestrator: Orchestrator,
        provider: Arc<ScriptedProvider>,
        build: Arc<ScriptedBuildTool>,
    }

    impl Harness {
        fn new(replies: Vec<Reply>, build_status: BuildStatus) -> Self {
            let workspace = TempDir::new().unwrap();
            std::fs::create_dir_all(workspace.path().join("resume")).unwrap();
            std::fs::write(workspace.path().join(BASE_DOCUMENT), CV).unwrap();
            Self::in_workspace(workspace, replies, build_status)
        }

        fn in_workspace(
            workspace: TempDir,
            replies: Vec<Reply>,
            build_status: BuildStatus,
        ) -> Self {
            let provider = Arc::new(ScriptedProvider::new(ProviderId::Groq, replies));
            let build = Arc::new(ScriptedBuildTool::new(build_status));
            let mut registry = ProviderRegistry::new();
            registry.register(provider.clone());

            let store = RunStore::new(workspace.path().join("data/runs"));
            let policy = CallPolicy {
                base_delay: Duration::from_millis(1),
                ..CallPolicy::default()
            };
            let orchestrator = Orchestrator::new(
                StageInvoker::new(registry, store.clone(), policy),
                store,
                DocumentStore::new(workspace.path()),
                build.clone(),
            );
            Self {
                workspace,
                orchestrator,
                provider,
                build,
            }
        }

        fn cv(&self) -> String {
            std::fs::read_to_string(self.workspace.path().join(BASE_DOCUMENT)).unwrap()
        }

        fn run_file(&self, id: Uuid, name: &str) -> PathBuf {
            self.workspace
                .path()
                .join("data/runs")
                .join(id.to_string())
                .join(name)
        }

        fn finalizer_json(&self, id: Uuid) -> Value {
            let text = std::fs::read_to_string(self.run_file(id, "finalizer.json")).unwrap();
            serde_json::from_str(&text).unwrap()
        }
    }

    fn config(dry_run: bool) -> RunConfig {
        RunConfig {
            job_description: "Senior Rust engineer building async services".to_string(),
            dry_run,
            providers: ProviderMap::uniform(ProviderId::Groq),
        }
    }

    fn replies(rounds: &[(Value, &str)]) -> Vec<Reply> {
        let mut replies = vec![
            Reply::content(fixtures::reviewer()),
            Reply::content(fixtures::swot()),
        ];
        for (refiner, verdict) in rounds {
            replies.push(Reply::content(refiner.clone()));
            replies.push(Reply::content(fixtures::judge(verdict)));
        }
        replies
    }

    fn insert(anchor: &str, content: &str) -> Value {
        fixtures::refiner(&[("resume/cv.tex", "insert", anchor, content)])
    }

    #[tokio::test]
    async fn test_pass_finalizes_once_with_first_round_output() {
        let h = Harness::new(
            replies(&[(insert("SECTION:SKILLS", "Tokio"), "PASS")]),
            BuildStatus::Ok,
        );

        let run = h.orchestrator.create_run(config(false)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.verdicts, vec![Verdict::Pass]);
        assert_eq!(h.provider.calls().len(), 4);
        assert_eq!(h.build.builds(), 1);
        assert!(h
            .cv()
            .contains(&format!("% SECTION:SKILLS\n{PROVENANCE_MARKER}\nTokio\nRust\n")));

        let finalizer = h.finalizer_json(run.id);
        assert_eq!(finalizer["applied"], 1);
        assert_eq!(finalizer["skipped"], 0);
        assert_eq!(finalizer["build"]["status"], "OK");
        assert!(run
            .artifacts
            .iter()
            .all(|a| a.status == ArtifactStatus::Succeeded));
        assert!(run
            .diff_summary
            .as_deref()
            .unwrap()
            .starts_with("# Diff for resume/cv.tex (insert @ SECTION:SKILLS)"));
        assert!(run.pdf_path.is_some());

        let persisted = h.orchestrator.get_run(run.id).await.unwrap();
        assert_eq!(persisted, run);
    }

    #[tokio::test]
    async fn test_revise_then_pass_finalizes_with_second_round_output() {
        let h = Harness::new(
            replies(&[
                (insert("SECTION:SKILLS", "FirstDraft"), "REVISE"),
                (insert("SECTION:SKILLS", "SecondDraft"), "PASS"),
            ]),
            BuildStatus::Ok,
        );

        let run = h.orchestrator.create_run(config(false)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.verdicts, vec![Verdict::Revise, Verdict::Pass]);
        assert_eq!(h.build.builds(), 1);
        let cv = h.cv();
        assert!(cv.contains("SecondDraft"));
        assert!(!cv.contains("FirstDraft"));

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls[4].system.contains("\"previous_refiner\""));
        assert!(calls[4].system.contains("\"judge_feedback\""));
        assert!(calls[5].system.contains("\"previous_judge\""));
        assert!(calls[5].user.contains("SecondDraft"));
    }

    #[tokio::test]
    async fn test_revise_twice_needs_review_without_finalize() {
        let h = Harness::new(
            replies(&[
                (insert("SECTION:SKILLS", "FirstDraft"), "REVISE"),
                (insert("SECTION:SKILLS", "SecondDraft"), "REVISE"),
            ]),
            BuildStatus::Ok,
        );

        let run = h.orchestrator.create_run(config(false)).await.unwrap();

        assert_eq!(run.status, RunStatus::NeedsReview);
        assert_eq!(h.build.builds(), 0);
        assert_eq!(h.cv(), CV);
        assert_eq!(
            run.artifact(Stage::Finalizer).unwrap().status,
            ArtifactStatus::Pending
        );
        assert!(!h.run_file(run.id, "finalizer.json").exists());
        let summary = run.diff_summary.as_deref().unwrap();
        assert!(summary.starts_with("File: resume/cv.tex\nType: insert\n"));
        assert!(summary.contains("SecondDraft"));
    }

    #[tokio::test]
    async fn test_build_failure_reverts_only_the_last_patch() {
        let refiner = fixtures::refiner(&[
            ("resume/cv.tex", "insert", "SECTION:EXPERIENCE", "\\item Led the migration"),
            ("resume/cv.tex", "insert", "SECTION:SKILLS", "Kubernetes"),
        ]);
        let h = Harness::new(replies(&[(refiner, "PASS")]), BuildStatus::Failed);

        let run = h.orchestrator.create_run(config(false)).await.unwrap();

        assert_eq!(run.status, RunStatus::NeedsReview);
        let cv = h.cv();
        assert!(cv.contains("\\item Led the migration"));
        assert!(!cv.contains("Kubernetes"));

        let finalizer = h.finalizer_json(run.id);
        assert_eq!(finalizer["applied"], 1);
        assert_eq!(finalizer["skipped"], 1);
        assert_eq!(finalizer["build"]["status"], "FAILED");
        assert_eq!(
            run.artifact(Stage::Finalizer).unwrap().status,
            ArtifactStatus::Failed
        );
        assert!(run.log_path.is_some());
        assert!(run.pdf_path.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_pass_completes_without_touching_document() {
        let h = Harness::new(
            replies(&[(insert("SECTION:SKILLS", "Tokio"), "PASS")]),
            BuildStatus::Ok,
        );

        let run = h.orchestrator.create_run(config(true)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(h.cv(), CV);
        assert_eq!(h.build.builds(), 0);
        let finalizer = h.finalizer_json(run.id);
        assert_eq!(finalizer["applied"], 0);
        assert_eq!(finalizer["skipped"], 1);
        assert_eq!(finalizer["build"]["log_path"], "dry-run");
        assert!(finalizer["build"]["pdf_path"].is_null());
        assert!(run.diff_summary.unwrap().contains("---\nTokio"));
    }

    #[tokio::test]
    async fn test_dry_run_exhausted_loop_needs_review() {
        let h = Harness::new(
            replies(&[
                (insert("SECTION:SKILLS", "A"), "REVISE"),
                (insert("SECTION:SKILLS", "B"), "REVISE"),
            ]),
            BuildStatus::Ok,
        );

        let run = h.orchestrator.create_run(config(true)).await.unwrap();

        assert_eq!(run.status, RunStatus::NeedsReview);
        assert_eq!(h.cv(), CV);
        assert_eq!(h.build.builds(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_creates_nothing() {
        let h = Harness::new(vec![], BuildStatus::Ok);
        let mut config = config(false);
        config.job_description = "Rust dev".to_string();

        let result = h.orchestrator.create_run(config).await;

        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
        assert!(!h.workspace.path().join("data/runs").exists());
    }

    #[tokio::test]
    async fn test_malformed_output_fails_and_persists_run() {
        let h = Harness::new(
            vec![Reply::Content("I think the résumé is great!".to_string())],
            BuildStatus::Ok,
        );

        let result = h.orchestrator.create_run(config(false)).await;
        assert!(matches!(
            result,
            Err(AppError::MalformedOutput {
                stage: Stage::Reviewer,
                ..
            })
        ));

        let runs = h.orchestrator.list_runs(&RunFilter::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.status, RunStatus::Failed);
        let reviewer = run.artifact(Stage::Reviewer).unwrap();
        assert_eq!(reviewer.status, ArtifactStatus::Failed);
        assert!(reviewer.error.as_deref().unwrap().contains("malformed JSON"));
        assert_eq!(
            run.artifact(Stage::Swot).unwrap().status,
            ArtifactStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_missing_base_document_fails_run() {
        let workspace = TempDir::new().unwrap();
        let h = Harness::in_workspace(workspace, replies(&[]), BuildStatus::Ok);

        let result = h.orchestrator.create_run(config(false)).await;

        assert!(matches!(result, Err(AppError::MissingBaseDocument(_))));
        assert!(h.provider.calls().is_empty());
        let runs = h.orchestrator.list_runs(&RunFilter::default()).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_deref().unwrap().contains("resume/cv.tex"));
    }

    #[tokio::test]
    async fn test_unregistered_provider_fails_at_its_stage() {
        let h = Harness::new(replies(&[]), BuildStatus::Ok);
        let mut config = config(false);
        config.providers.swot = ProviderId::Gemini;

        let result = h.orchestrator.create_run(config).await;

        assert!(matches!(
            result,
            Err(AppError::UnknownProvider {
                stage: Stage::Swot,
                provider: ProviderId::Gemini
            })
        ));
        let run = &h.orchestrator.list_runs(&RunFilter::default()).await.unwrap()[0];
        assert_eq!(
            run.artifact(Stage::Reviewer).unwrap().status,
            ArtifactStatus::Succeeded
        );
        assert_eq!(
            run.artifact(Stage::Swot).unwrap().status,
            ArtifactStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_bad_diffs_are_skipped_not_fatal() {
        let refiner = fixtures::refiner(&[
            ("resume/cv.tex", "insert", "SECTION:AWARDS", "Hackathon winner"),
            ("../outside.tex", "insert", "line:1", "escape"),
            ("resume/cv.tex", "insert", "after:SKILLS", "Go"),
            ("resume/cv.tex", "replace", "regex:^Rust$", "Rust, Tokio"),
        ]);
        let h = Harness::new(replies(&[(refiner, "PASS")]), BuildStatus::Ok);

        let run = h.orchestrator.create_run(config(false)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let finalizer = h.finalizer_json(run.id);
        assert_eq!(finalizer["applied"], 1);
        assert_eq!(finalizer["skipped"], 3);
        assert!(h.cv().contains("Rust, Tokio"));

        let summary = run.diff_summary.unwrap();
        assert!(summary.contains("Failed to apply resume/cv.tex: Anchor not found"));
        assert!(summary.contains("Failed to apply ../outside.tex: Target"));
        assert!(summary.contains("Failed to apply resume/cv.tex: Invalid anchor"));
        assert!(!h.workspace.path().parent().unwrap().join("outside.tex").exists());
    }

    #[tokio::test]
    async fn test_get_unknown_run_is_not_found() {
        let h = Harness::new(vec![], BuildStatus::Ok);
        let result = h.orchestrator.get_run(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
