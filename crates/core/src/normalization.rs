use unicode_normalization::UnicodeNormalization;

/// NFKC-normalizes a query, drops control characters and collapses whitespace.
pub fn normalize_query(text: &str) -> String {
    let nfkc = text.nfkc().collect::<String>();
    let mut result = String::with_capacity(nfkc.len());
    let mut prev_space = false;
    for ch in nfkc.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
            continue;
        }
        if ch.is_control() {
            continue;
        }
        result.push(ch);
        prev_space = false;
    }
    result.trim().to_string()
}

/// Lowercased alphanumeric terms of a normalized query, in order, duplicates kept.
pub fn query_terms(text: &str) -> Vec<String> {
    normalize_query(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| term.to_lowercase())
        .collect()
}
