/// Lowercase, replace punctuation with spaces and collapse runs of whitespace.
///
/// This is the canonical form used for selection fingerprints and for
/// duplicate detection between reranked results.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Words of the normalized text.
pub fn normalized_words(input: &str) -> Vec<String> {
    normalize_text(input).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect()
}

/// Collapse whitespace without touching case or punctuation.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
