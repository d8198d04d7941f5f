//! Per-stage prompts and response parsing.
//!
//! Structured JSON is the preferred path: every stage ships a schema and
//! parses the returned object with full validation. When a client replies
//! with plain text instead, a strict line-oriented parser takes over, with
//! fixed section delimiters (SCORE / CRITIQUE / STRENGTHS / WEAKNESSES and
//! friends). Anything that fails validation is a permanent error for that
//! stage - malformed payloads never travel further down the pipeline.

use serde_json::Value;

use crate::client::Completion;
use crate::error::CompletionError;
use crate::types::{Advocacy, Evaluation, Idea, Skepticism};

const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 10.0;

// ---------------------------------------------------------------------------
// Prompt builders
// ---------------------------------------------------------------------------

/// Prompt for one generation slot.
///
/// `variation` seeds diversity across slots so concurrent calls at the same
/// temperature do not collapse onto one phrasing.
pub fn generation_prompt(topic: &str, constraints: &str, variation: usize) -> String {
    format!(
        r#"You are a creative idea generator.

## Topic
{topic}

## Constraints
{constraints}

Propose ONE concrete idea addressing the topic within the constraints.
This is variation #{n}; take a distinct angle from the obvious first answer.
Reply with the idea text only - no preamble, no numbering."#,
        topic = topic,
        constraints = constraints,
        n = variation + 1,
    )
}

/// Prompt for the critique and re-evaluation stages.
pub fn critique_prompt(idea: &Idea, topic: &str, context_hint: Option<&str>) -> String {
    let context_block = match context_hint {
        Some(hint) if !hint.is_empty() => format!("\n## Relevant prior context\n{hint}\n"),
        _ => String::new(),
    };
    format!(
        r#"You are a rigorous critic evaluating an idea.

## Topic
{topic}

## Idea
{idea}
{context_block}
Rate the idea from 0 to 10 and justify the rating. Be rigorous and honest.

Respond in this exact format:

SCORE: [0-10]

CRITIQUE:
[2-4 sentences assessing the idea]

STRENGTHS:
- [strength 1]
- [strength 2]

WEAKNESSES:
- [weakness 1]
- [weakness 2]
"#,
        topic = topic,
        idea = idea.text,
        context_block = context_block,
    )
}

/// Prompt for the advocacy stage.
pub fn advocacy_prompt(idea: &Idea, critique: &Evaluation) -> String {
    format!(
        r#"You are an advocate building the strongest honest case FOR an idea.

## Idea
{idea}

## Critique it received
{critique}

Make the case for this idea, addressing the critique head-on.

Respond in this exact format:

ARGUMENT:
[2-4 sentences arguing for the idea]

BENEFITS:
- [benefit 1]
- [benefit 2]
"#,
        idea = idea.text,
        critique = critique.critique,
    )
}

/// Prompt for the skepticism stage.
pub fn skepticism_prompt(idea: &Idea, critique: &Evaluation) -> String {
    format!(
        r#"You are a skeptic stress-testing an idea. Find what breaks it.

## Idea
{idea}

## Critique it received
{critique}

Challenge the idea's assumptions and surface its failure modes.

Respond in this exact format:

ARGUMENT:
[2-4 sentences challenging the idea]

RISKS:
- [risk 1]
- [risk 2]
"#,
        idea = idea.text,
        critique = critique.critique,
    )
}

/// Prompt for the improvement stage, synthesizing the full debate.
pub fn improvement_prompt(
    idea: &Idea,
    critique: &Evaluation,
    advocacy: &Advocacy,
    skepticism: &Skepticism,
    context_hint: Option<&str>,
) -> String {
    let context_block = match context_hint {
        Some(hint) if !hint.is_empty() => format!("\n## Relevant prior context\n{hint}\n"),
        _ => String::new(),
    };
    format!(
        r#"You are refining an idea using the debate it went through.

## Original idea
{idea}

## Critique (score {score:.1}/10)
{critique}

## Advocate's case
{advocacy}

## Skeptic's case
{skepticism}
{context_block}
Write an improved version of the idea that keeps the advocate's strengths
and answers the skeptic's risks. Reply with the improved idea text only."#,
        idea = idea.text,
        score = critique.score,
        critique = critique.critique,
        advocacy = advocacy.argument,
        skepticism = skepticism.argument,
        context_block = context_block,
    )
}

// ---------------------------------------------------------------------------
// JSON schemas for the structured path
// ---------------------------------------------------------------------------

pub fn evaluation_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": {"type": "number", "minimum": 0, "maximum": 10},
            "critique": {"type": "string"},
            "strengths": {"type": "array", "items": {"type": "string"}},
            "weaknesses": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["score", "critique"]
    })
}

pub fn advocacy_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "argument": {"type": "string"},
            "key_benefits": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["argument"]
    })
}

pub fn skepticism_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "argument": {"type": "string"},
            "key_risks": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["argument"]
    })
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parse a critique reply, JSON-first with the line format as fallback.
pub fn parse_evaluation(completion: &Completion) -> Result<Evaluation, CompletionError> {
    match completion {
        Completion::Structured(value) => {
            let score = value["score"]
                .as_f64()
                .ok_or_else(|| CompletionError::malformed("evaluation missing numeric score"))?;
            validate_score(score)?;
            let critique = value["critique"]
                .as_str()
                .ok_or_else(|| CompletionError::malformed("evaluation missing critique"))?
                .to_string();
            Ok(Evaluation {
                score,
                critique,
                strengths: string_array(value, "strengths"),
                weaknesses: string_array(value, "weaknesses"),
            })
        }
        Completion::Text(text) => {
            let score_line = text
                .lines()
                .map(str::trim)
                .find(|l| l.to_uppercase().starts_with("SCORE:"))
                .ok_or_else(|| CompletionError::malformed("evaluation missing SCORE line"))?;
            let score: f64 = score_line[6..]
                .trim()
                .trim_matches(|c| c == '[' || c == ']')
                .parse()
                .map_err(|_| CompletionError::malformed("unparseable SCORE value"))?;
            validate_score(score)?;

            let critique = section_text(text, "CRITIQUE:", &["STRENGTHS:", "WEAKNESSES:"]);
            if critique.is_empty() {
                return Err(CompletionError::malformed(
                    "evaluation missing CRITIQUE section",
                ));
            }

            Ok(Evaluation {
                score,
                critique,
                strengths: section_bullets(text, "STRENGTHS:", &["WEAKNESSES:"]),
                weaknesses: section_bullets(text, "WEAKNESSES:", &[]),
            })
        }
    }
}

/// Parse an advocacy reply.
pub fn parse_advocacy(completion: &Completion) -> Result<Advocacy, CompletionError> {
    match completion {
        Completion::Structured(value) => Ok(Advocacy {
            argument: required_str(value, "argument", "advocacy")?,
            key_benefits: string_array(value, "key_benefits"),
        }),
        Completion::Text(text) => {
            let argument = section_text(text, "ARGUMENT:", &["BENEFITS:"]);
            if argument.is_empty() {
                return Err(CompletionError::malformed(
                    "advocacy missing ARGUMENT section",
                ));
            }
            Ok(Advocacy {
                argument,
                key_benefits: section_bullets(text, "BENEFITS:", &[]),
            })
        }
    }
}

/// Parse a skepticism reply.
pub fn parse_skepticism(completion: &Completion) -> Result<Skepticism, CompletionError> {
    match completion {
        Completion::Structured(value) => Ok(Skepticism {
            argument: required_str(value, "argument", "skepticism")?,
            key_risks: string_array(value, "key_risks"),
        }),
        Completion::Text(text) => {
            let argument = section_text(text, "ARGUMENT:", &["RISKS:"]);
            if argument.is_empty() {
                return Err(CompletionError::malformed(
                    "skepticism missing ARGUMENT section",
                ));
            }
            Ok(Skepticism {
                argument,
                key_risks: section_bullets(text, "RISKS:", &[]),
            })
        }
    }
}

/// Parse a generation or improvement reply into idea text.
pub fn parse_idea_text(completion: &Completion) -> Result<String, CompletionError> {
    let text = match completion {
        Completion::Text(t) => t.trim(),
        Completion::Structured(v) => v["text"]
            .as_str()
            .ok_or_else(|| CompletionError::malformed("idea payload missing text"))?
            .trim(),
    };
    if text.is_empty() {
        return Err(CompletionError::malformed("empty idea text"));
    }
    Ok(text.to_string())
}

fn validate_score(score: f64) -> Result<(), CompletionError> {
    if !(SCORE_MIN..=SCORE_MAX).contains(&score) || !score.is_finite() {
        return Err(CompletionError::malformed(format!(
            "score {score} outside {SCORE_MIN}..={SCORE_MAX}"
        )));
    }
    Ok(())
}

fn required_str(value: &Value, key: &str, what: &str) -> Result<String, CompletionError> {
    value[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| CompletionError::malformed(format!("{what} missing {key}")))
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Free text under `header`, up to the next of `stop_headers`.
fn section_text(content: &str, header: &str, stop_headers: &[&str]) -> String {
    let mut in_section = false;
    let mut out = String::new();
    for line in content.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        if upper.starts_with(header) {
            in_section = true;
            continue;
        }
        if stop_headers.iter().any(|h| upper.starts_with(h)) {
            if in_section {
                break;
            }
            continue;
        }
        if in_section && !line.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(line);
        }
    }
    out
}

/// Bullet lines (`- item`) under `header`, up to the next of `stop_headers`.
fn section_bullets(content: &str, header: &str, stop_headers: &[&str]) -> Vec<String> {
    let mut in_section = false;
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        if upper.starts_with(header) {
            in_section = true;
            continue;
        }
        if stop_headers.iter().any(|h| upper.starts_with(h)) {
            if in_section {
                break;
            }
            continue;
        }
        if in_section && line.starts_with('-') {
            out.push(line.trim_start_matches('-').trim().to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_oriented_evaluation() {
        let reply = Completion::Text(
            r#"
SCORE: 7.5

CRITIQUE:
Solid concept with a realistic path to adoption.
Scope is ambitious for the stated budget.

STRENGTHS:
- Clear target user
- Uses proven components

WEAKNESSES:
- Unclear maintenance story
"#
            .to_string(),
        );

        let eval = parse_evaluation(&reply).unwrap();
        assert!((eval.score - 7.5).abs() < 1e-9);
        assert!(eval.critique.contains("realistic path"));
        assert_eq!(eval.strengths.len(), 2);
        assert_eq!(eval.weaknesses, vec!["Unclear maintenance story"]);
    }

    #[test]
    fn parses_structured_evaluation() {
        let reply = Completion::Structured(serde_json::json!({
            "score": 4.0,
            "critique": "Needs work.",
            "weaknesses": ["vague"]
        }));

        let eval = parse_evaluation(&reply).unwrap();
        assert_eq!(eval.score, 4.0);
        assert!(eval.strengths.is_empty());
        assert_eq!(eval.weaknesses, vec!["vague"]);
    }

    #[test]
    fn missing_score_is_a_permanent_error() {
        let reply = Completion::Text("CRITIQUE:\nFine idea.".to_string());
        let err = parse_evaluation(&reply).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let reply = Completion::Structured(serde_json::json!({
            "score": 11.0,
            "critique": "Too enthusiastic."
        }));
        assert!(parse_evaluation(&reply).is_err());

        let reply = Completion::Text("SCORE: -1\n\nCRITIQUE:\nNo.".to_string());
        assert!(parse_evaluation(&reply).is_err());
    }

    #[test]
    fn parses_advocacy_and_skepticism_sections() {
        let advocacy = parse_advocacy(&Completion::Text(
            "ARGUMENT:\nWorth doing.\n\nBENEFITS:\n- cheap\n- fast".to_string(),
        ))
        .unwrap();
        assert_eq!(advocacy.argument, "Worth doing.");
        assert_eq!(advocacy.key_benefits, vec!["cheap", "fast"]);

        let skepticism = parse_skepticism(&Completion::Text(
            "ARGUMENT:\nFragile plan.\n\nRISKS:\n- vendor lock-in".to_string(),
        ))
        .unwrap();
        assert_eq!(skepticism.argument, "Fragile plan.");
        assert_eq!(skepticism.key_risks, vec!["vendor lock-in"]);
    }

    #[test]
    fn empty_idea_text_is_rejected() {
        assert!(parse_idea_text(&Completion::Text("   \n".to_string())).is_err());
        assert_eq!(
            parse_idea_text(&Completion::Text(" A solar kiosk. ".to_string())).unwrap(),
            "A solar kiosk."
        );
    }
}
