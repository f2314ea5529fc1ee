//! Rewrites requests that would otherwise be refused or answered unsafely into a
//! research scaffold that demands claims, evidence and tests with citations.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCALE: &str = "en-US";
pub const DEFAULT_CITATIONS: u32 = 2;

static ADVICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(should i|can i|am i allowed|is it (?:legal|illegal|lawful)|do i have to|legal advice|my rights|can they|sue|lawsuit|evict\w*|withhold)\b",
    )
    .expect("advice pattern")
});

static MEDICAL_IMPERATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(diagnose me|prescribe|what dose|dosage|should i take|stop taking|cure my|treat my|how much \w+ should i)\b",
    )
    .expect("medical pattern")
});

static NSFW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(nsfw|explicit|porn\w*|nude\w*|sexual\w*|erotic\w*|xxx)\b")
        .expect("nsfw pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Friction {
    Policy,
    Vague,
    Scope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    #[serde(rename = "ask→tests")]
    AskToTests,
    #[serde(rename = "advice→research")]
    AdviceToResearch,
    #[serde(rename = "nsfw→consent")]
    NsfwToConsent,
    #[serde(rename = "claim→evidence")]
    ClaimToEvidence,
}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::AskToTests => "ask→tests",
            Transform::AdviceToResearch => "advice→research",
            Transform::NsfwToConsent => "nsfw→consent",
            Transform::ClaimToEvidence => "claim→evidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Legal,
    Medical,
    Code,
    General,
}

impl Domain {
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "legal" | "law" => Domain::Legal,
            "medical" | "health" => Domain::Medical,
            "code" | "software" => Domain::Code,
            _ => Domain::General,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelInput {
    pub text: String,
    #[serde(default)]
    pub cet: bool,
    pub role: String,
    #[serde(default)]
    pub domain: Option<Domain>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub require_citations: Option<u32>,
}

impl TunnelInput {
    pub fn new(text: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cet: true,
            role: role.into(),
            domain: None,
            locale: None,
            require_citations: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelOutput {
    pub transformed: String,
    pub transform: Transform,
    pub friction: Vec<Friction>,
    pub rationale: String,
    pub require_citations: u32,
}

pub fn diagnose(text: &str) -> Vec<Friction> {
    let mut friction = Vec::new();
    if ADVICE.is_match(text) || MEDICAL_IMPERATIVE.is_match(text) || NSFW.is_match(text) {
        friction.push(Friction::Policy);
    }
    if text.trim().chars().count() < 10 {
        friction.push(Friction::Vague);
    }
    if friction.is_empty() {
        friction.push(Friction::Scope);
    }
    friction
}

fn select_transform(text: &str, domain: Domain) -> (Transform, &'static str) {
    if domain == Domain::Code {
        return (
            Transform::AskToTests,
            "code request restated as behaviour to be pinned down by tests",
        );
    }
    if (domain == Domain::Legal && ADVICE.is_match(text)) || MEDICAL_IMPERATIVE.is_match(text) {
        return (
            Transform::AdviceToResearch,
            "personal advice request restated as a sourced research question",
        );
    }
    if NSFW.is_match(text) {
        return (
            Transform::NsfwToConsent,
            "explicit phrasing restated as a consent and safety overview",
        );
    }
    (
        Transform::ClaimToEvidence,
        "request restated as claims that must be backed by evidence",
    )
}

pub fn tunnel(input: &TunnelInput) -> TunnelOutput {
    let text = input.text.trim();
    let domain = input.domain.unwrap_or(Domain::General);
    let locale = input
        .locale
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_LOCALE);
    let citations = input.require_citations.unwrap_or(DEFAULT_CITATIONS);
    let friction = diagnose(text);
    let (transform, rationale) = select_transform(text, domain);

    let mut transformed = render_template(transform, &input.role, text, locale, citations);
    if input.cet {
        transformed.push_str("\n\n");
        transformed.push_str(&cet_contract(citations));
    }
    tracing::debug!(transform = transform.as_str(), ?friction, "request tunneled");
    TunnelOutput {
        transformed,
        transform,
        friction,
        rationale: rationale.to_string(),
        require_citations: citations,
    }
}

/// Output contract appended to generation prompts: three markdown lists the reply
/// must fill.
pub fn cet_contract(citations: u32) -> String {
    format!(
        "Answer using exactly these sections:\n\
         ## Claims\n- one line per claim\n\
         ## Evidence\n- at least {citations} numbered citations such as [1], each tied to a claim\n\
         ## Tests\n- how a reader could check each claim"
    )
}

fn render_template(
    transform: Transform,
    role: &str,
    text: &str,
    locale: &str,
    citations: u32,
) -> String {
    let header = format!("You are {role}. Write for locale {locale}.\nREQUEST: {text}\n");
    let body = match transform {
        Transform::AskToTests => format!(
            "Do not just write the code. First state the expected behaviour as testable claims, \
             then list the tests (inputs, expected outputs, edge cases) that would confirm it. \
             Cite at least {citations} references (docs, specs, issues).\n\
             Also include sections: Interfaces, Edge Cases, Test Plan."
        ),
        Transform::AdviceToResearch => format!(
            "Do not give personal advice. Produce a neutral research brief: the governing rules, \
             how they vary by jurisdiction or circumstance for {locale}, and the questions a \
             qualified professional would ask. Cite at least {citations} primary or authoritative \
             sources.\n\
             Also include sections: Jurisdiction Notes, Questions For A Professional, Limitations."
        ),
        Transform::NsfwToConsent => format!(
            "Do not produce explicit content. Summarize the topic in terms of consent, legality \
             and safety for adults in {locale}, citing at least {citations} reputable sources.\n\
             Also include sections: Consent, Safety Resources, Limitations."
        ),
        Transform::ClaimToEvidence => format!(
            "Break the request into explicit claims and support each with evidence; cite at \
             least {citations} sources and say how each claim could be falsified.\n\
             Also include sections: Assumptions, Limitations."
        ),
    };
    format!("{header}\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_rent_question_becomes_research() {
        let mut input = TunnelInput::new("Is it legal to withhold rent?", "a legal researcher");
        input.domain = Some(Domain::Legal);
        let out = tunnel(&input);
        assert_eq!(out.transform, Transform::AdviceToResearch);
        assert!(out.friction.contains(&Friction::Policy));
        assert_eq!(out.require_citations, 2);
        assert!(out.transformed.contains("REQUEST: Is it legal to withhold rent?"));
        assert!(out.transformed.contains("## Claims"));
        assert!(out.transformed.contains("en-US"));
    }

    #[test]
    fn diagnose_flags() {
        assert_eq!(diagnose("hi"), vec![Friction::Vague]);
        assert_eq!(diagnose("sue them?"), vec![Friction::Policy, Friction::Vague]);
        assert_eq!(
            diagnose("Explain how tides form on Earth"),
            vec![Friction::Scope]
        );
    }

    #[test]
    fn transform_rules_in_order() {
        let mut input = TunnelInput::new("should i use unsafe here", "an engineer");
        input.domain = Some(Domain::Code);
        assert_eq!(tunnel(&input).transform, Transform::AskToTests);

        // advice phrasing outside the legal domain is not advice→research
        let input = TunnelInput::new("should i buy a telescope", "a guide");
        assert_eq!(tunnel(&input).transform, Transform::ClaimToEvidence);

        let input = TunnelInput::new("what dose of ibuprofen is safe", "a guide");
        assert_eq!(tunnel(&input).transform, Transform::AdviceToResearch);

        let input = TunnelInput::new("write something explicit", "a guide");
        assert_eq!(tunnel(&input).transform, Transform::NsfwToConsent);
    }

    #[test]
    fn contract_only_when_requested() {
        let mut input = TunnelInput::new("Summarize the history of tides", "a historian");
        input.cet = false;
        input.locale = Some("de-DE".to_string());
        input.require_citations = Some(4);
        let out = tunnel(&input);
        assert!(!out.transformed.contains("## Claims"));
        assert!(out.transformed.contains("de-DE"));
        assert!(out.transformed.contains("at least 4"));
        assert_eq!(out.require_citations, 4);
    }

    #[test]
    fn transform_serializes_with_arrow() {
        let json = serde_json::to_string(&Transform::AdviceToResearch).unwrap();
        assert_eq!(json, "\"advice→research\"");
    }
}
