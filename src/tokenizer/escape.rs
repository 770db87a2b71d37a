//! SentencePiece whitespace escaping

/// U+2581 LOWER ONE EIGHTH BLOCK, the SentencePiece space marker
pub const SPM_SPACE: char = '\u{2581}';

/// Prefix `▁` and collapse every run of spaces into one `▁`
pub fn escape_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 3);
    out.push(SPM_SPACE);
    let mut escaping = false;
    for c in text.chars() {
        if c == ' ' {
            if !escaping {
                out.push(SPM_SPACE);
                escaping = true;
            }
        } else {
            escaping = false;
            out.push(c);
        }
    }
    out
}

/// Replace every `▁` with a space
pub fn unescape_whitespace(text: &str) -> String {
    text.replace(SPM_SPACE, " ")
}
