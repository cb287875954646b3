//! Build step: turns the patched LaTeX sources into a PDF.
//!
//! The orchestrator only depends on `BuildTool`; `ScriptBuildTool` shells out to
//! `scripts/build-resume.sh <run id>` from the workspace root.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;

pub const BUILD_LOG: &str = "build.log";
pub const FINAL_PDF: &str = "final.pdf";
/// Environment variable telling the script where the run's outputs go.
pub const RUN_DIR_ENV: &str = "RUN_DIR";
/// `log_path` reported when a dry run skips the build.
pub const DRY_RUN_LOG: &str = "dry-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Ok,
    Failed,
}

/// Outcome of one build, as stored in `finalizer.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub log_path: String,
    pub pdf_path: Option<String>,
}

impl BuildResult {
    /// Result reported when finalize runs without a build.
    pub fn dry_run() -> Self {
        Self {
            status: BuildStatus::Ok,
            log_path: DRY_RUN_LOG.to_string(),
            pdf_path: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == BuildStatus::Ok
    }
}

/// External document compiler.
///
/// A failed compile is a `BuildStatus::Failed` result, not an error. `Err` is
/// reserved for the log itself being unwritable.
#[async_trait]
pub trait BuildTool: Send + Sync {
    async fn build(&self, run_id: Uuid, run_dir: &Path) -> Result<BuildResult, AppError>;
}

/// Runs `<program> [args..] <run id>` in `workdir` with `RUN_DIR` set,
/// capturing stdout and stderr into `<run dir>/build.log`. The PDF is
/// expected at `<run dir>/final.pdf`.
#[derive(Debug, Clone)]
pub struct ScriptBuildTool {
    program: PathBuf,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl ScriptBuildTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: PathBuf::from("."),
            timeout: Duration::from_secs(300),
        }
    }

    /// Extra argument placed before the run id.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns whether the process exited successfully plus everything to log.
    async fn run(&self, run_id: Uuid, run_dir: &Path) -> (bool, Vec<u8>) {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(run_id.to_string())
            .current_dir(&self.workdir)
            .env(RUN_DIR_ENV, run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {e}\n", self.program.display());
                return (false, message.into_bytes());
            }
        };

        // Dropping the wait future on timeout kills the child.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut log = output.stdout;
                log.extend_from_slice(&output.stderr);
                if !output.status.success() {
                    let exit = format!("\nbuild exited with {}\n", output.status);
                    log.extend_from_slice(exit.as_bytes());
                }
                (output.status.success(), log)
            }
            Ok(Err(e)) => (false, format!("build process error: {e}\n").into_bytes()),
            Err(_) => (
                false,
                format!("build timed out after {}s\n", self.timeout.as_secs_f64()).into_bytes(),
            ),
        }
    }
}

#[async_trait]
impl BuildTool for ScriptBuildTool {
    async fn build(&self, run_id: Uuid, run_dir: &Path) -> Result<BuildResult, AppError> {
        let log_path = run_dir.join(BUILD_LOG);
        let pdf_path = run_dir.join(FINAL_PDF);

        info!("Building run {run_id} with {}", self.program.display());
        let (succeeded, log) = self.run(run_id, run_dir).await;

        write_log(run_dir, &log_path, log).await.map_err(|e| {
            AppError::BuildFailure(format!("could not write {}: {e}", log_path.display()))
        })?;

        if succeeded {
            info!("Build for run {run_id} succeeded");
            let pdf_exists = tokio::fs::try_exists(&pdf_path).await.unwrap_or(false);
            if !pdf_exists {
                warn!("Build for run {run_id} produced no {}", pdf_path.display());
            }
            Ok(BuildResult {
                status: BuildStatus::Ok,
                log_path: log_path.display().to_string(),
                pdf_path: pdf_exists.then(|| pdf_path.display().to_string()),
            })
        } else {
            warn!("Build for run {run_id} failed; see {}", log_path.display());
            Ok(BuildResult {
                status: BuildStatus::Failed,
                log_path: log_path.display().to_string(),
                pdf_path: None,
            })
        }
    }
}

async fn write_log(run_dir: &Path, log_path: &Path, log: Vec<u8>) -> std::io::Result<()> {
    tokio::fs::create_dir_all(run_dir).await?;
    tokio::fs::write(log_path, log).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("build.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn tool(dir: &TempDir, body: &str) -> ScriptBuildTool {
        ScriptBuildTool::new("/bin/sh")
            .arg(script(dir, body).display().to_string())
            .current_dir(dir.path())
    }

    #[tokio::test]
    async fn test_successful_build_captures_both_streams() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("runs/abc");
        let run_id = Uuid::new_v4();

        let result = tool(
            &dir,
            "echo \"compiling $1 into $RUN_DIR\"\necho warning >&2\n\
             mkdir -p \"$RUN_DIR\" && : > \"$RUN_DIR/final.pdf\"\n",
        )
        .build(run_id, &run_dir)
        .await
        .unwrap();

        assert_eq!(result.status, BuildStatus::Ok);
        assert_eq!(
            result.pdf_path.as_deref(),
            Some(run_dir.join(FINAL_PDF).display().to_string().as_str())
        );
        let log = std::fs::read_to_string(run_dir.join(BUILD_LOG)).unwrap();
        assert!(log.contains(&format!("compiling {run_id} into {}", run_dir.display())));
        assert!(log.contains("warning"));
    }

    #[tokio::test]
    async fn test_default_script_builds_the_working_directory() {
        use std::os::unix::fs::PermissionsExt;

        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("resume")).unwrap();
        std::fs::write(workspace.path().join("resume/cv.tex"), "cv").unwrap();

        // The script lives outside the workspace it builds.
        let elsewhere = TempDir::new().unwrap();
        let script = elsewhere.path().join("scripts/build-resume.sh");
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        let shipped =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scripts/build-resume.sh");
        std::fs::copy(shipped, &script).unwrap();

        let bin = elsewhere.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let latexmk = bin.join("latexmk");
        std::fs::write(
            &latexmk,
            "#!/bin/sh\n\
             for a in \"$@\"; do case \"$a\" in -outdir=*) out=\"${a#-outdir=}\";; esac; done\n\
             test -f cv.tex && : > \"$out/cv.pdf\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&latexmk, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = format!(
            "PATH={}:{}",
            bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let run_dir = workspace.path().join("data/runs/abc");
        let result = ScriptBuildTool::new("/usr/bin/env")
            .arg(path)
            .arg("sh")
            .arg(script.display().to_string())
            .current_dir(workspace.path())
            .build(Uuid::new_v4(), &run_dir)
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Ok);
        assert!(run_dir.join(FINAL_PDF).exists());
        assert!(result.pdf_path.is_some());
    }

    #[tokio::test]
    async fn test_clean_exit_without_pdf_reports_no_pdf_path() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run");

        let result = tool(&dir, "echo 'nothing to do'\n")
            .build(Uuid::new_v4(), &run_dir)
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Ok);
        assert!(result.pdf_path.is_none());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failed_result() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run");

        let result = tool(&dir, "echo 'Undefined control sequence' >&2\nexit 3\n")
            .build(Uuid::new_v4(), &run_dir)
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Failed);
        assert!(result.pdf_path.is_none());
        let log = std::fs::read_to_string(run_dir.join(BUILD_LOG)).unwrap();
        assert!(log.contains("Undefined control sequence"));
    }

    #[tokio::test]
    async fn test_timeout_is_failed_and_logged() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run");

        let result = tool(&dir, "sleep 5\n")
            .timeout(Duration::from_millis(100))
            .build(Uuid::new_v4(), &run_dir)
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Failed);
        let log = std::fs::read_to_string(run_dir.join(BUILD_LOG)).unwrap();
        assert!(log.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_is_failed_and_logged() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run");

        let result = ScriptBuildTool::new(dir.path().join("no-such-script.sh"))
            .build(Uuid::new_v4(), &run_dir)
            .await
            .unwrap();

        assert_eq!(result.status, BuildStatus::Failed);
        let log = std::fs::read_to_string(run_dir.join(BUILD_LOG)).unwrap();
        assert!(log.contains("failed to start"));
    }

    #[test]
    fn test_build_result_wire_format() {
        let value = serde_json::to_value(BuildResult::dry_run()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "OK", "log_path": "dry-run", "pdf_path": null})
        );
    }
}
