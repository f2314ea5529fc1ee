use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use lodestar_core::non_latin_runs;
use lodestar_ledger::{MemoryLog, MAX_SESSION_ENTRIES};

pub const MAX_FACTS: usize = 50;
pub const MAX_ENTITIES: usize = 100;

static CONNECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(because|therefore|thus|hence|consequently|as a result|due to|according to|which means|this shows|studies show|research (?:shows|indicates|suggests)|evidence (?:shows|suggests|indicates)|demonstrates?|is defined as|was founded|was born)\b",
    )
    .expect("connective pattern")
});

static CAPITALIZED_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\p{Lu}[\p{Ll}\p{Lu}'’-]*(?:[ \t]+\p{Lu}[\p{Ll}\p{Lu}'’-]*)+\b")
        .expect("entity pattern")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Distilled {
    pub facts: Vec<String>,
    pub entities: Vec<String>,
}

impl Distilled {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.entities.is_empty()
    }

    /// Short header prepended to later prompts; empty when nothing was distilled.
    pub fn context_header(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut header = String::from("Context from earlier in this session:\n");
        for fact in self.facts.iter().rev().take(5).rev() {
            header.push_str("- ");
            header.push_str(fact);
            header.push('\n');
        }
        if !self.entities.is_empty() {
            let names: Vec<&str> = self.entities.iter().take(12).map(String::as_str).collect();
            header.push_str("Entities: ");
            header.push_str(&names.join(", "));
            header.push('\n');
        }
        header
    }
}

/// Facts are sentences carrying an evidentiary connective; entities are
/// capitalized multi-word spans and runs of non-Latin script.
pub fn distill<S: AsRef<str>>(responses: &[S]) -> Distilled {
    let mut out = Distilled::default();
    for response in responses {
        let response = response.as_ref();
        for sentence in response.unicode_sentences() {
            let sentence = sentence.trim();
            if out.facts.len() < MAX_FACTS
                && CONNECTIVE.is_match(sentence)
                && !out.facts.iter().any(|f| f == sentence)
            {
                out.facts.push(sentence.to_string());
            }
        }
        let spans = CAPITALIZED_SPAN
            .find_iter(response)
            .map(|m| m.as_str().trim_end_matches(['\'', '’', '-']).to_string())
            .chain(non_latin_runs(response));
        for entity in spans {
            if out.entities.len() >= MAX_ENTITIES {
                break;
            }
            if !entity.is_empty() && !out.entities.contains(&entity) {
                out.entities.push(entity);
            }
        }
    }
    out
}

/// Distills the last [`MAX_SESSION_ENTRIES`] responses of a session.
pub fn extract_distilled(memory: &MemoryLog, session_id: &str) -> anyhow::Result<Distilled> {
    let entries = memory.recent(session_id, MAX_SESSION_ENTRIES)?;
    let responses: Vec<&str> = entries.iter().map(|e| e.response.as_str()).collect();
    Ok(distill(&responses))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_connective_sentences_only() {
        let distilled = distill(&[
            "The tide rises twice a day. This happens because the Moon pulls the ocean. Nice weather.",
            "According to the Royal Society, tides are predictable.",
        ]);
        assert_eq!(
            distilled.facts,
            vec![
                "This happens because the Moon pulls the ocean.",
                "According to the Royal Society, tides are predictable."
            ]
        );
    }

    #[test]
    fn collects_entities_in_first_seen_order() {
        let distilled = distill(&[
            "We met at New York City with Ada Lovelace. Later, New York City again.",
            "Она живёт в Москве.",
        ]);
        assert_eq!(distilled.entities[0], "New York City");
        assert_eq!(distilled.entities[1], "Ada Lovelace");
        assert_eq!(
            distilled.entities.iter().filter(|e| *e == "New York City").count(),
            1
        );
        assert!(distilled.entities.iter().any(|e| e.contains("Москве")));
    }

    #[test]
    fn caps_are_enforced() {
        let responses: Vec<String> = (0..80)
            .map(|i| format!("Item {i} matters because reason {i}."))
            .collect();
        let distilled = distill(&responses);
        assert_eq!(distilled.facts.len(), MAX_FACTS);
    }

    #[test]
    fn empty_distillation_renders_nothing() {
        assert_eq!(Distilled::default().context_header(), "");
        let header = distill(&["Rent is owed because the lease says so."]).context_header();
        assert!(header.starts_with("Context from earlier"));
        assert!(header.contains("because the lease"));
    }
}
