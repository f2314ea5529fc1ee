//! verify → critique → refine. Each stage is one generation call whose raw text
//! seeds the next prompt. Only a refine output that parses into a reply replaces
//! the draft.

use serde::{Deserialize, Serialize};

use lodestar_llm::{Generate, LlmRequest};

use crate::budget::Usage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefineReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    Parsed(RefineReply),
    RawText(String),
}

impl StageOutput {
    /// The parsed reply, or the fallback when the output was not structured.
    pub fn reply_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            StageOutput::Parsed(parsed) => &parsed.reply,
            StageOutput::RawText(_) => fallback,
        }
    }
}

/// Accepts a bare JSON object, a fenced block, or an object embedded in prose.
pub fn parse_refine_output(raw: &str) -> StageOutput {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];
    if let Some(fenced) = strip_fence(trimmed) {
        candidates.push(fenced);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }
    candidates
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<RefineReply>(candidate).ok())
        .map(StageOutput::Parsed)
        .unwrap_or_else(|| StageOutput::RawText(raw.to_string()))
}

fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageText {
    pub text: String,
    pub failed: bool,
    #[serde(skip)]
    pub usage: Usage,
}

/// One generation call. A failure becomes an embedded error string rather than an
/// error, so the caller always has text to carry forward.
pub async fn generate_text<G: Generate>(generator: &G, model: &str, prompt: String) -> StageText {
    let mut usage = Usage::default();
    match generator.generate(model, &LlmRequest::user(prompt)).await {
        Ok(response) => {
            usage.record(response.prompt_tokens, response.completion_tokens);
            StageText {
                text: response.content,
                failed: false,
                usage,
            }
        }
        Err(err) => {
            tracing::warn!(model, error = %err, "generation failed");
            StageText {
                text: format!("[generation error: {err}]"),
                failed: true,
                usage,
            }
        }
    }
}

pub fn verify_prompt(draft: &str) -> String {
    format!(
        "Verify the draft below. List factual errors, unsupported claims and internal \
         contradictions, or say none were found.\nDRAFT:\n{draft}\nEND DRAFT"
    )
}

pub fn critique_prompt(draft: &str, verification: &str) -> String {
    format!(
        "Critique the draft using the verification notes. Name concrete improvements to \
         structure and sourcing.\nDRAFT:\n{draft}\nEND DRAFT\nVERIFICATION:\n{verification}"
    )
}

pub fn refine_prompt(draft: &str, verification: &str, critique: &str) -> String {
    format!(
        "Rewrite the draft applying the critique. Keep its ## Claims, ## Evidence and ## Tests \
         sections. Respond only with a JSON object of the form {{\"reply\": \"<revised answer>\"}}.\n\
         DRAFT:\n{draft}\nVERIFICATION:\n{verification}\nCRITIQUE:\n{critique}"
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct GovernanceTrace {
    pub draft: String,
    pub verification: StageText,
    pub critique: StageText,
    pub refine_raw: StageText,
    pub refined: StageOutput,
    pub reply: String,
    #[serde(skip)]
    pub usage: Usage,
}

impl GovernanceTrace {
    pub fn replaced_draft(&self) -> bool {
        matches!(self.refined, StageOutput::Parsed(_))
    }
}

pub struct GovernanceLoop<'a, G> {
    generator: &'a G,
    model: &'a str,
}

impl<'a, G: Generate> GovernanceLoop<'a, G> {
    pub fn new(generator: &'a G, model: &'a str) -> Self {
        Self { generator, model }
    }

    pub async fn verify(&self, draft: &str) -> StageText {
        generate_text(self.generator, self.model, verify_prompt(draft)).await
    }

    pub async fn critique(&self, draft: &str, verification: &str) -> StageText {
        generate_text(self.generator, self.model, critique_prompt(draft, verification)).await
    }

    pub async fn refine(
        &self,
        draft: &str,
        verification: &str,
        critique: &str,
    ) -> (StageOutput, StageText) {
        let raw = generate_text(
            self.generator,
            self.model,
            refine_prompt(draft, verification, critique),
        )
        .await;
        let output = if raw.failed {
            StageOutput::RawText(raw.text.clone())
        } else {
            parse_refine_output(&raw.text)
        };
        (output, raw)
    }

    /// Stages run strictly in sequence.
    pub async fn run(&self, draft: &str) -> GovernanceTrace {
        let verification = self.verify(draft).await;
        tracing::debug!(failed = verification.failed, "verify stage done");
        let critique = self.critique(draft, &verification.text).await;
        tracing::debug!(failed = critique.failed, "critique stage done");
        let (refined, refine_raw) = self
            .refine(draft, &verification.text, &critique.text)
            .await;
        let reply = refined.reply_or(draft).to_string();
        tracing::debug!(
            replaced = matches!(refined, StageOutput::Parsed(_)),
            "refine stage done"
        );
        let mut usage = Usage::default();
        for stage in [&verification, &critique, &refine_raw] {
            usage.prompt_tokens += stage.usage.prompt_tokens;
            usage.completion_tokens += stage.usage.completion_tokens;
            usage.calls += stage.usage.calls;
        }
        GovernanceTrace {
            draft: draft.to_string(),
            verification,
            critique,
            refine_raw,
            refined,
            reply,
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_fenced_and_embedded_objects() {
        let bare = parse_refine_output(r#"{"reply": "better"}"#);
        assert_eq!(bare.reply_or("draft"), "better");

        let fenced = parse_refine_output("```json\n{\"reply\": \"fenced\", \"notes\": \"n\"}\n```");
        assert_eq!(fenced.reply_or("draft"), "fenced");

        let prose = parse_refine_output("Sure! Here you go: {\"reply\": \"inline\"} hope it helps");
        assert_eq!(prose.reply_or("draft"), "inline");
    }

    #[test]
    fn malformed_output_keeps_the_draft() {
        for raw in [
            "no json here",
            "{\"reply\": 42}",
            "{\"answer\": \"wrong key\"}",
            "{broken",
        ] {
            let parsed = parse_refine_output(raw);
            assert!(matches!(parsed, StageOutput::RawText(_)), "{raw}");
            assert_eq!(parsed.reply_or("draft"), "draft");
        }
    }

    #[test]
    fn prompts_carry_markers() {
        assert!(verify_prompt("d").starts_with("Verify"));
        assert!(critique_prompt("d", "v").starts_with("Critique"));
        let refine = refine_prompt("d", "v", "c");
        assert!(refine.contains("\"reply\""));
        assert!(refine.find("DRAFT:").unwrap() < refine.find("VERIFICATION:").unwrap());
    }
}
