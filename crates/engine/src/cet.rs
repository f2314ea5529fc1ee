use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s+(?P<hash>.+?)|\*\*(?P<bold>[^*]+?)\*\*:?)\s*#*\s*$")
        .expect("heading pattern")
});

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("bullet pattern"));

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]|https?://\S+|\bdoi:\s*10\.\d+").expect("citation pattern"));

pub const ERROR_MARKER: &str = "[generation error";

/// Claims/Evidence/Tests: the structure a governed reply is checked against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CetOutput {
    pub claims: Vec<String>,
    pub evidence: Vec<String>,
    pub tests: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, String>,
}

impl CetOutput {
    /// Reads `## Heading` (or `**Heading**`) sections out of a reply. Items under
    /// Claims, Evidence and Tests are one per line with list markers stripped; every
    /// other heading lands in `sections` with its body text.
    pub fn from_text(text: &str) -> Self {
        let mut out = CetOutput::default();
        let mut current: Option<String> = None;
        let mut body: Vec<&str> = Vec::new();
        for line in text.lines() {
            if let Some(caps) = HEADING.captures(line) {
                out.close_section(current.take(), &body);
                body.clear();
                let name = caps
                    .name("hash")
                    .or_else(|| caps.name("bold"))
                    .map(|m| m.as_str().trim().trim_end_matches(':').to_string());
                current = name;
            } else if current.is_some() {
                body.push(line);
            }
        }
        out.close_section(current, &body);
        out
    }

    fn close_section(&mut self, heading: Option<String>, body: &[&str]) {
        let Some(heading) = heading else {
            return;
        };
        let items = || -> Vec<String> {
            body.iter()
                .map(|line| BULLET.replace(line, "").trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        };
        match heading.to_lowercase().as_str() {
            "claims" => self.claims.extend(items()),
            "evidence" => self.evidence.extend(items()),
            "tests" => self.tests.extend(items()),
            _ => {
                let text = body.join("\n").trim().to_string();
                self.sections.insert(heading, text);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CetValidation {
    pub ok: bool,
    pub missing: Vec<String>,
}

pub fn validate_cet(cet: &CetOutput) -> CetValidation {
    let missing: Vec<String> = [
        ("claims", cet.claims.is_empty()),
        ("evidence", cet.evidence.is_empty()),
        ("tests", cet.tests.is_empty()),
    ]
    .into_iter()
    .filter(|(_, empty)| *empty)
    .map(|(name, _)| name.to_string())
    .collect();
    CetValidation {
        ok: missing.is_empty(),
        missing,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyCheck {
    NonEmpty,
    HasClaims,
    HasEvidence,
    HasTests,
    HasCitation,
    NoErrorMarker,
}

impl PropertyCheck {
    pub const ALL: [PropertyCheck; 6] = [
        PropertyCheck::NonEmpty,
        PropertyCheck::HasClaims,
        PropertyCheck::HasEvidence,
        PropertyCheck::HasTests,
        PropertyCheck::HasCitation,
        PropertyCheck::NoErrorMarker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyCheck::NonEmpty => "non_empty",
            PropertyCheck::HasClaims => "has_claims",
            PropertyCheck::HasEvidence => "has_evidence",
            PropertyCheck::HasTests => "has_tests",
            PropertyCheck::HasCitation => "has_citation",
            PropertyCheck::NoErrorMarker => "no_error_marker",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|check| check.as_str() == value)
    }

    fn holds(&self, text: &str, cet: &CetOutput) -> bool {
        match self {
            PropertyCheck::NonEmpty => !text.trim().is_empty(),
            PropertyCheck::HasClaims => !cet.claims.is_empty(),
            PropertyCheck::HasEvidence => !cet.evidence.is_empty(),
            PropertyCheck::HasTests => !cet.tests.is_empty(),
            PropertyCheck::HasCitation => CITATION.is_match(text),
            PropertyCheck::NoErrorMarker => !text.contains(ERROR_MARKER),
        }
    }
}

pub const DEFAULT_PROPERTY_TESTS: &[&str] = &[
    "non_empty",
    "has_claims",
    "has_evidence",
    "has_tests",
    "has_citation",
    "no_error_marker",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyResult {
    pub name: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyReport {
    pub passed: bool,
    pub results: Vec<PropertyResult>,
    pub failing: Vec<String>,
}

/// Evaluates named boolean checks over a reply. Unknown names fail.
pub fn run_property_tests<S: AsRef<str>>(text: &str, tests: &[S]) -> PropertyReport {
    let cet = CetOutput::from_text(text);
    let results: Vec<PropertyResult> = tests
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let passed = match PropertyCheck::from_str(name) {
                Some(check) => check.holds(text, &cet),
                None => {
                    tracing::debug!(check = name, "unknown property check");
                    false
                }
            };
            PropertyResult {
                name: name.to_string(),
                passed,
            }
        })
        .collect();
    let failing: Vec<String> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.name.clone())
        .collect();
    PropertyReport {
        passed: failing.is_empty(),
        results,
        failing,
    }
}
