//! Stage Invoker: one completion stage, end to end.
//!
//! prompt assembly → provider (retry + deadline) → JSON parse → schema
//! validation → `<stage>.json`. The invoker never touches `RunState`; the
//! orchestrator records the outcome.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::documents::ResumeContext;
use crate::errors::AppError;
use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM, SCHEMA_CLOSING};
use crate::llm_client::retry::{DEFAULT_ATTEMPTS, DEFAULT_BASE_DELAY, DEFAULT_CALL_TIMEOUT};
use crate::llm_client::{
    strip_json_fences, with_retry, with_timeout, CompletionOptions, Prompt, ProviderRegistry,
};
use crate::models::run::{ProviderMap, Stage};
use crate::pipeline::prompts::{
    JUDGE_TEMPLATE, JUDGE_TRAILER, REFINER_TEMPLATE, REFINER_TRAILER, REVIEWER_TEMPLATE,
    REVIEWER_TRAILER, SWOT_TEMPLATE, SWOT_TRAILER,
};
use crate::pipeline::schemas::{
    JudgeOutput, RefinerOutput, ReviewerOutput, SchemaError, StageOutput, SwotOutput,
};
use crate::store::RunStore;

/// Read-only inputs available to a stage. Built fresh by the orchestrator for
/// every invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub job_description: &'a str,
    pub resume: &'a ResumeContext,
    pub reviewer: Option<&'a ReviewerOutput>,
    pub swot: Option<&'a SwotOutput>,
    /// Refiner output under judgment (judge stage).
    pub refiner: Option<&'a RefinerOutput>,
    /// Round-one refiner output (second refiner round).
    pub previous_refiner: Option<&'a RefinerOutput>,
    /// Earlier verdict (second refiner and judge rounds).
    pub judge: Option<&'a JudgeOutput>,
}

impl<'a> StageContext<'a> {
    pub fn new(job_description: &'a str, resume: &'a ResumeContext) -> Self {
        Self {
            job_description,
            resume,
            reviewer: None,
            swot: None,
            refiner: None,
            previous_refiner: None,
            judge: None,
        }
    }
}

/// Sampling and resilience settings applied to every provider call.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            timeout: DEFAULT_CALL_TIMEOUT,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

/// A validated stage output plus where it was persisted.
#[derive(Debug, Clone)]
pub struct StageOutcome<T> {
    pub output: T,
    pub value: Value,
    pub stored_path: PathBuf,
}

#[derive(Clone)]
pub struct StageInvoker {
    registry: ProviderRegistry,
    store: RunStore,
    policy: CallPolicy,
}

impl StageInvoker {
    pub fn new(registry: ProviderRegistry, store: RunStore, policy: CallPolicy) -> Self {
        Self {
            registry,
            store,
            policy,
        }
    }

    pub async fn invoke<T: StageOutput>(
        &self,
        run_id: Uuid,
        providers: &ProviderMap,
        context: &StageContext<'_>,
    ) -> Result<StageOutcome<T>, AppError> {
        let stage = T::STAGE;
        let provider_id = providers.for_stage(stage);
        let prompt = build_prompt(stage, context)?;

        let provider = self
            .registry
            .get(provider_id)
            .ok_or(AppError::UnknownProvider {
                stage,
                provider: provider_id,
            })?;

        let options = CompletionOptions {
            model: provider_id.default_model().to_string(),
            temperature: self.policy.temperature,
            max_tokens: self.policy.max_tokens,
            timeout: self.policy.timeout,
        };

        let provider = provider.as_ref();
        let (prompt_ref, options_ref) = (&prompt, &options);
        let completion = with_retry(
            self.policy.attempts,
            self.policy.base_delay,
            move |attempt| async move {
                debug!("Calling {provider_id} for {stage} (attempt {attempt})");
                with_timeout(options_ref.timeout, provider.complete(prompt_ref, options_ref)).await
            },
        )
        .await
        .map_err(|source| AppError::ProviderFailure { stage, source })?;

        info!(
            "Stage {stage} answered by {provider_id} (id={}, model={}, {} chars)",
            completion.id,
            completion.model,
            completion.content.len()
        );
        if let Some(usage) = &completion.usage {
            debug!("Stage {stage} usage: {usage}");
        }

        let output: T = parse_output(stage, &completion.content)?;
        let stored_path = self.store.write_artifact(run_id, stage, &output).await?;
        let value = serde_json::to_value(&output)?;

        Ok(StageOutcome {
            output,
            value,
            stored_path,
        })
    }
}

/// Parses raw model text into a validated stage output.
///
/// Not JSON at all is `MalformedOutput`; JSON of the wrong shape or out of
/// bounds is `SchemaViolation`.
pub fn parse_output<T: StageOutput>(stage: Stage, content: &str) -> Result<T, AppError> {
    let value: Value = serde_json::from_str(strip_json_fences(content))
        .map_err(|e| AppError::MalformedOutput {
            stage,
            message: e.to_string(),
        })?;

    let output: T = serde_json::from_value(value).map_err(|e| AppError::SchemaViolation {
        stage,
        error: SchemaError::new("$", e.to_string()),
    })?;

    output
        .validate()
        .map_err(|error| AppError::SchemaViolation { stage, error })?;
    Ok(output)
}

/// `system`: stage template, prior-stage context as JSON, closing rule.
/// `user`: job description, main document, include fragments, stage trailer.
pub fn build_prompt(stage: Stage, context: &StageContext<'_>) -> Result<Prompt, AppError> {
    let (template, prior, trailer) = match stage {
        Stage::Reviewer => (REVIEWER_TEMPLATE, Map::new(), REVIEWER_TRAILER.to_string()),
        Stage::Swot => {
            let mut prior = Map::new();
            insert(&mut prior, "reviewer", context.reviewer)?;
            (SWOT_TEMPLATE, prior, SWOT_TRAILER.to_string())
        }
        Stage::Refiner => {
            let mut prior = Map::new();
            insert(&mut prior, "reviewer", context.reviewer)?;
            insert(&mut prior, "swot", context.swot)?;
            insert(&mut prior, "previous_refiner", context.previous_refiner)?;
            insert(&mut prior, "judge_feedback", context.judge)?;
            (REFINER_TEMPLATE, prior, REFINER_TRAILER.to_string())
        }
        Stage::Judge => {
            let mut prior = Map::new();
            insert(&mut prior, "reviewer", context.reviewer)?;
            insert(&mut prior, "swot", context.swot)?;
            insert(&mut prior, "previous_judge", context.judge)?;
            let refiner = serde_json::to_string(&context.refiner)?;
            let trailer = format!("Refiner output:\n{refiner}\n\n{JUDGE_TRAILER}");
            (JUDGE_TEMPLATE, prior, trailer)
        }
        Stage::Finalizer => {
            let trailer = format!(
                "Refiner output:\n{}\nJudge output:\n{}",
                serde_json::to_string(&context.refiner)?,
                serde_json::to_string(&context.judge)?
            );
            ("", Map::new(), trailer)
        }
    };

    let mut system = vec![JSON_ONLY_SYSTEM.to_string()];
    if !template.is_empty() {
        system.push(template.trim().to_string());
    }
    if matches!(stage, Stage::Refiner | Stage::Judge) {
        system.push(GROUNDING_INSTRUCTION.to_string());
    }
    if !prior.is_empty() {
        system.push(serde_json::to_string(&Value::Object(prior))?);
    }
    system.push(SCHEMA_CLOSING.to_string());

    Ok(Prompt {
        system: system.join("\n\n"),
        user: format!("{}\n\n{trailer}", document_section(context)),
    })
}

fn insert<T: Serialize>(
    map: &mut Map<String, Value>,
    key: &str,
    value: Option<&T>,
) -> Result<(), serde_json::Error> {
    if let Some(value) = value {
        map.insert(key.to_string(), serde_json::to_value(value)?);
    }
    Ok(())
}

fn document_section(context: &StageContext<'_>) -> String {
    let includes = context
        .resume
        .includes
        .iter()
        .map(|(file, content)| format!("--- {file} ---\n{}", content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Job Description:\n{}\n\nMain Resume (cv.tex):\n{}\n\nIncludes:\n{includes}",
        context.job_description.trim(),
        context.resume.main.trim()
    )
}
