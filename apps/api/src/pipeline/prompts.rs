// Stage prompt templates for the refinement pipeline.
// Shared fragments (JSON-only rule, schema closing, grounding) live in llm_client::prompts.

/// Reviewer: ATS keyword coverage and section-level critique.
pub const REVIEWER_TEMPLATE: &str = r#"You are a senior technical recruiter reviewing a LaTeX résumé against a job description.

Return a JSON object with this EXACT schema (no extra fields):
{
  "ats_keywords": ["Rust", "Kubernetes"],
  "coverage": {"must_have_pct": 70, "nice_to_have_pct": 40},
  "section_issues": [
    {"section": "experience", "issue": "bullets lack metrics", "evidence": "Worked on backend services"}
  ],
  "bullet_suggestions": [
    {"section": "experience", "latex_fragment": "\\item Cut p99 latency by 40\\% ...", "rationale": "quantifies impact"}
  ]
}

Rules:
- ats_keywords: at most 200 terms taken from the job description.
- coverage percentages are numbers between 0 and 100.
- section_issues and bullet_suggestions: at most 50 entries each.
- latex_fragment must be valid LaTeX that compiles inside the existing document."#;

/// SWOT: candidate positioning relative to the role.
pub const SWOT_TEMPLATE: &str = r#"You are a career strategist. Using the reviewer findings below, produce a SWOT analysis of the candidate for this role.

Return a JSON object with this EXACT schema (no extra fields):
{
  "strengths": ["..."],
  "weaknesses": ["..."],
  "opportunities": ["..."],
  "threats": ["..."],
  "positioning_statement": "One or two sentences on how the résumé should position the candidate."
}"#;

/// Refiner: concrete, anchor-addressed edits to the LaTeX sources.
pub const REFINER_TEMPLATE: &str = r#"You are a résumé editor. Propose precise edits to the LaTeX sources that close the gaps identified by the reviewer and SWOT analysis.

Return a JSON object with this EXACT schema (no extra fields):
{
  "diffs": [
    {
      "target_file": "resume/cv.tex",
      "patch_type": "insert",
      "anchor": "SECTION:EXPERIENCE",
      "content": "\\item ...",
      "rationale": "why this edit helps"
    }
  ]
}

Rules:
- At most 40 diffs. Every field is a non-empty string.
- target_file is relative to the repository root: resume/cv.tex or resume/includes/<name>.tex.
- patch_type is one of "insert", "replace", "delete".
- anchor is one of:
    "line:<N>"        1-based line number
    "regex:<pattern>" first match in the file, multiline
    "SECTION:<key>"   the line containing the marker SECTION:<key>; inserts go right after it
- insert places content after the anchor; replace swaps the anchored lines; delete removes them.
- If judge feedback from a previous round is present, address every flagged item."#;

/// Judge: accept or send the refiner's diffs back for one more round.
pub const JUDGE_TEMPLATE: &str = r#"You are a hiring manager judging proposed résumé edits for this role.

Return a JSON object with this EXACT schema (no extra fields):
{
  "status": "PASS",
  "reasons": ["..."],
  "numeric_scores": {"clarity": 8, "brevity": 7, "impact": 8, "ats_fit": 9},
  "flagged": [
    {"file": "resume/cv.tex", "reason": "claim not supported", "suggestion": "drop the metric"}
  ]
}

Rules:
- status is exactly "PASS" or "REVISE".
- Each numeric score is between 0 and 10.
- Use REVISE only when an edit is wrong or unsupported by the résumé. Minor polish is a PASS."#;

pub const REVIEWER_TRAILER: &str = "Return Reviewer JSON.";
pub const SWOT_TRAILER: &str = "Reviewer JSON is in the system prompt.";
pub const REFINER_TRAILER: &str = "Produce diffs adhering to the schema.";
pub const JUDGE_TRAILER: &str = "Judge per schema.";
