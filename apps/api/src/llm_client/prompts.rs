// Shared prompt fragments used across stages.
// Stage-specific templates live in pipeline/prompts.rs.

/// Fragment that enforces JSON-only output. Prepended to every stage template.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Closing instruction appended to every system section.
pub const SCHEMA_CLOSING: &str = "Follow the schema strictly.";

/// Rule shared by every stage that proposes or judges résumé edits.
pub const GROUNDING_INSTRUCTION: &str = "\
    Never invent employers, dates, titles, degrees or metrics. \
    Every change must be supported by the existing résumé text.";
