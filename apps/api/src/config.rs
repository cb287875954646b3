use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Provider keys are optional; a provider without a key is simply not registered.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Repository root holding `resume/` and `scripts/`; diff targets resolve against it.
    pub workspace_root: PathBuf,
    pub data_root: PathBuf,
    pub build_script: PathBuf,
    pub build_timeout: Duration,
    pub anthropic_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let workspace_root =
            PathBuf::from(optional_env("WORKSPACE_ROOT").unwrap_or_else(|| ".".to_string()));
        let data_root = optional_env("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("data").join("runs"));
        let build_script = optional_env("BUILD_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("scripts").join("build-resume.sh"));

        Ok(Config {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            workspace_root,
            data_root,
            build_script,
            build_timeout: Duration::from_secs(
                std::env::var("BUILD_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse::<u64>()
                    .context("BUILD_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            groq_api_key: optional_env("GROQ_API_KEY"),
            google_api_key: optional_env("GOOGLE_API_KEY"),
        })
    }
}

/// Unset and blank variables both read as `None`.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
