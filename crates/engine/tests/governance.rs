use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use lodestar_engine::{GovernanceLoop, StageOutput};
use lodestar_llm::{Generate, LlmRequest, LlmResponse};

/// Answers each stage from a fixed script keyed on the prompt's first word.
struct Scripted {
    refine: &'static str,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(refine: &'static str) -> Self {
        Self {
            refine,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Generate for Scripted {
    async fn generate(&self, _model: &str, req: &LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = if req.user.starts_with("Verify") {
            "Verification: one unsupported claim.".to_string()
        } else if req.user.starts_with("Critique") {
            assert!(req.user.contains("Verification: one unsupported claim."));
            "Critique: add a source.".to_string()
        } else {
            assert!(req.user.contains("Critique: add a source."));
            self.refine.to_string()
        };
        Ok(LlmResponse {
            content,
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }
}

struct Unreachable;

impl Generate for Unreachable {
    async fn generate(&self, _model: &str, _req: &LlmRequest) -> Result<LlmResponse> {
        Err(anyhow!("connection refused"))
    }
}

#[tokio::test]
async fn structured_refine_replaces_the_draft() {
    let generator = Scripted::new("```json\n{\"reply\": \"improved [1]\"}\n```");
    let trace = GovernanceLoop::new(&generator, "m").run("original draft").await;
    assert_eq!(trace.reply, "improved [1]");
    assert!(trace.replaced_draft());
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert_eq!(trace.usage.calls, 3);
    assert_eq!(trace.usage.prompt_tokens, 30);
}

#[tokio::test]
async fn malformed_refine_keeps_the_draft() {
    let generator = Scripted::new("I improved it but forgot the JSON.");
    let trace = GovernanceLoop::new(&generator, "m").run("original draft").await;
    assert_eq!(trace.reply, "original draft");
    assert!(matches!(trace.refined, StageOutput::RawText(ref raw) if raw.contains("forgot")));
}

#[tokio::test]
async fn failing_generator_never_aborts() {
    let trace = GovernanceLoop::new(&Unreachable, "m").run("original draft").await;
    assert_eq!(trace.reply, "original draft");
    assert!(trace.verification.failed);
    assert!(trace.critique.failed);
    assert!(trace.refine_raw.text.starts_with("[generation error:"));
    assert!(!trace.replaced_draft());
}

#[tokio::test]
async fn stages_are_individually_callable() {
    let generator = Scripted::new("{\"reply\": \"r\"}");
    let stages = GovernanceLoop::new(&generator, "m");
    let verification = stages.verify("d").await;
    assert!(verification.text.starts_with("Verification"));
    let critique = stages.critique("d", &verification.text).await;
    assert_eq!(critique.text, "Critique: add a source.");
    let (refined, raw) = stages.refine("d", &verification.text, &critique.text).await;
    assert_eq!(refined.reply_or("d"), "r");
    assert!(!raw.failed);
}
