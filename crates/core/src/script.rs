use serde::{Deserialize, Serialize};

/// Writing-system families the router and distiller care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Latin,
    Arabic,
    Cjk,
    Cyrillic,
    Devanagari,
}

impl Script {
    pub fn as_str(&self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Arabic => "arabic",
            Script::Cjk => "cjk",
            Script::Cyrillic => "cyrillic",
            Script::Devanagari => "devanagari",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "latin" => Some(Script::Latin),
            "arabic" => Some(Script::Arabic),
            "cjk" => Some(Script::Cjk),
            "cyrillic" => Some(Script::Cyrillic),
            "devanagari" => Some(Script::Devanagari),
            _ => None,
        }
    }

    pub fn is_latin(&self) -> bool {
        matches!(self, Script::Latin)
    }
}

/// Classifies a single alphabetic character. Digits, punctuation and symbols return `None`.
pub fn detect_script(ch: char) -> Option<Script> {
    let cp = ch as u32;
    match cp {
        0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F | 0x1E00..=0x1EFF => {
            Some(Script::Latin)
        }
        0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => {
            Some(Script::Arabic)
        }
        0x0400..=0x052F => Some(Script::Cyrillic),
        0x0900..=0x097F => Some(Script::Devanagari),
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF => {
            Some(Script::Cjk)
        }
        _ => None,
    }
}

/// Most frequent non-Latin script in `text`, if any non-Latin letters occur.
/// Ties resolve in declaration order (Arabic, CJK, Cyrillic, Devanagari).
pub fn dominant_script(text: &str) -> Option<Script> {
    let order = [
        Script::Arabic,
        Script::Cjk,
        Script::Cyrillic,
        Script::Devanagari,
    ];
    let mut counts = [0usize; 4];
    for ch in text.chars() {
        if let Some(script) = detect_script(ch) {
            if let Some(idx) = order.iter().position(|s| *s == script) {
                counts[idx] += 1;
            }
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (idx, count) in counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        match best {
            Some((_, top)) if top >= *count => {}
            _ => best = Some((idx, *count)),
        }
    }
    best.map(|(idx, _)| order[idx])
}

/// Maximal runs of non-Latin letters. Whitespace is kept inside a run only when
/// both neighbours belong to the run, so "مرحبا بالعالم" stays one entity.
pub fn non_latin_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut pending_space = false;
    for ch in text.chars() {
        let non_latin = detect_script(ch).map(|s| !s.is_latin()).unwrap_or(false);
        if non_latin {
            if pending_space && !current.is_empty() {
                current.push(' ');
            }
            pending_space = false;
            current.push(ch);
        } else if ch.is_whitespace() && !current.is_empty() {
            pending_space = true;
        } else {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            pending_space = false;
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_text_has_no_dominant_script() {
        assert_eq!(dominant_script("Is it legal to withhold rent?"), None);
    }

    #[test]
    fn detects_arabic_and_cjk() {
        assert_eq!(dominant_script("ما هو القانون"), Some(Script::Arabic));
        assert_eq!(dominant_script("what is 東京"), Some(Script::Cjk));
        assert_eq!(dominant_script("привет world"), Some(Script::Cyrillic));
    }

    #[test]
    fn runs_keep_inner_spaces() {
        let runs = non_latin_runs("Hello مرحبا بالعالم and 東京タワー.");
        assert_eq!(runs, vec!["مرحبا بالعالم".to_string(), "東京タワー".to_string()]);
    }

    #[test]
    fn script_names_roundtrip() {
        for script in [Script::Latin, Script::Arabic, Script::Cjk] {
            assert_eq!(Script::from_str(script.as_str()), Some(script));
        }
    }
}
