//! Typed stage outputs and their field-level contracts.
//!
//! Shape is enforced by serde (missing fields, wrong types, unknown enum values);
//! bounds are enforced by `Validate`, which returns a structured `SchemaError`
//! rather than panicking or throwing.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::run::Stage;
use crate::patch::PatchError;
use crate::render::BuildResult;

pub const MAX_ATS_KEYWORDS: usize = 200;
pub const MAX_SECTION_ISSUES: usize = 50;
pub const MAX_BULLET_SUGGESTIONS: usize = 50;
pub const MAX_DIFFS: usize = 40;

/// A single contract violation, located by a JSON-path-like `path`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), SchemaError>;
}

/// A validated output produced by a completion stage.
pub trait StageOutput: Serialize + DeserializeOwned + Validate + Send + Sync {
    const STAGE: Stage;
}

fn check_max_len<T>(path: &str, items: &[T], max: usize) -> Result<(), SchemaError> {
    if items.len() > max {
        return Err(SchemaError::new(
            path,
            format!("at most {max} items allowed, got {}", items.len()),
        ));
    }
    Ok(())
}

fn check_range(path: &str, value: f64, min: f64, max: f64) -> Result<(), SchemaError> {
    if !value.is_finite() || value < min || value > max {
        return Err(SchemaError::new(
            path,
            format!("must be within [{min}, {max}], got {value}"),
        ));
    }
    Ok(())
}

fn check_non_empty(path: &str, value: &str) -> Result<(), SchemaError> {
    if value.is_empty() {
        return Err(SchemaError::new(path, "must not be empty"));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// reviewer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub must_have_pct: f64,
    pub nice_to_have_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionIssue {
    pub section: String,
    pub issue: String,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletSuggestion {
    pub section: String,
    pub latex_fragment: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerOutput {
    pub ats_keywords: Vec<String>,
    pub coverage: Coverage,
    pub section_issues: Vec<SectionIssue>,
    pub bullet_suggestions: Vec<BulletSuggestion>,
}

impl Validate for ReviewerOutput {
    fn validate(&self) -> Result<(), SchemaError> {
        check_max_len("ats_keywords", &self.ats_keywords, MAX_ATS_KEYWORDS)?;
        check_range("coverage.must_have_pct", self.coverage.must_have_pct, 0.0, 100.0)?;
        check_range(
            "coverage.nice_to_have_pct",
            self.coverage.nice_to_have_pct,
            0.0,
            100.0,
        )?;
        check_max_len("section_issues", &self.section_issues, MAX_SECTION_ISSUES)?;
        check_max_len(
            "bullet_suggestions",
            &self.bullet_suggestions,
            MAX_BULLET_SUGGESTIONS,
        )
    }
}

impl StageOutput for ReviewerOutput {
    const STAGE: Stage = Stage::Reviewer;
}

// ────────────────────────────────────────────────────────────────────────────
// swot
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwotOutput {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
    pub positioning_statement: String,
}

impl Validate for SwotOutput {
    fn validate(&self) -> Result<(), SchemaError> {
        Ok(())
    }
}

impl StageOutput for SwotOutput {
    const STAGE: Stage = Stage::Swot;
}

// ────────────────────────────────────────────────────────────────────────────
// refiner
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum PatchType {
    Insert,
    Replace,
    Delete,
}

impl PatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchType::Insert => "insert",
            PatchType::Replace => "replace",
            PatchType::Delete => "delete",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchType {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(PatchType::Insert),
            "replace" => Ok(PatchType::Replace),
            "delete" => Ok(PatchType::Delete),
            other => Err(PatchError::UnsupportedPatchType(other.to_string())),
        }
    }
}

impl TryFrom<String> for PatchType {
    type Error = PatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One proposed edit to a résumé source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub target_file: String,
    pub patch_type: PatchType,
    pub anchor: String,
    /// Ignored for `delete`, but still required to be non-empty.
    pub content: String,
    pub rationale: String,
}

impl Validate for Diff {
    fn validate(&self) -> Result<(), SchemaError> {
        check_non_empty("target_file", &self.target_file)?;
        check_non_empty("anchor", &self.anchor)?;
        check_non_empty("content", &self.content)?;
        check_non_empty("rationale", &self.rationale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinerOutput {
    pub diffs: Vec<Diff>,
}

impl RefinerOutput {
    /// Plain-text listing of the proposed diffs, used as the run's diff summary
    /// when finalize does not run.
    pub fn preview(&self) -> String {
        self.diffs
            .iter()
            .map(|d| {
                format!(
                    "File: {}\nType: {}\nAnchor: {}\nContent:\n{}\n---",
                    d.target_file, d.patch_type, d.anchor, d.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Validate for RefinerOutput {
    fn validate(&self) -> Result<(), SchemaError> {
        check_max_len("diffs", &self.diffs, MAX_DIFFS)?;
        for (i, diff) in self.diffs.iter().enumerate() {
            diff.validate()
                .map_err(|e| SchemaError::new(format!("diffs[{i}].{}", e.path), e.message))?;
        }
        Ok(())
    }
}

impl StageOutput for RefinerOutput {
    const STAGE: Stage = Stage::Refiner;
}

// ────────────────────────────────────────────────────────────────────────────
// judge
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Revise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericScores {
    pub clarity: f64,
    pub brevity: f64,
    pub impact: f64,
    pub ats_fit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedItem {
    pub file: String,
    pub reason: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutput {
    pub status: Verdict,
    pub reasons: Vec<String>,
    pub numeric_scores: NumericScores,
    pub flagged: Vec<FlaggedItem>,
}

impl Validate for JudgeOutput {
    fn validate(&self) -> Result<(), SchemaError> {
        let scores = &self.numeric_scores;
        check_range("numeric_scores.clarity", scores.clarity, 0.0, 10.0)?;
        check_range("numeric_scores.brevity", scores.brevity, 0.0, 10.0)?;
        check_range("numeric_scores.impact", scores.impact, 0.0, 10.0)?;
        check_range("numeric_scores.ats_fit", scores.ats_fit, 0.0, 10.0)
    }
}

impl StageOutput for JudgeOutput {
    const STAGE: Stage = Stage::Judge;
}

// ────────────────────────────────────────────────────────────────────────────
// finalizer
// ────────────────────────────────────────────────────────────────────────────

/// Content of `finalizer.json`. Counts are unsigned, so non-negativity holds by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizerOutput {
    pub applied: u32,
    pub skipped: u32,
    pub build: BuildResult,
}

impl Validate for FinalizerOutput {
    fn validate(&self) -> Result<(), SchemaError> {
        check_non_empty("build.log_path", &self.build.log_path)
    }
}
