//! Tag-integrity validation.
//!
//! A translation is only acceptable when the multiset of tag tokens
//! (opening and closing tag names, case-sensitive, attributes ignored)
//! is identical between the original and translated markup. Anything
//! else means the model invented, dropped, or reordered structure.

use std::sync::OnceLock;

use regex::Regex;

fn tag_regex() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9]*").expect("static regex compiles"))
}

/// Sorted multiset of tag opener/closer tokens in `markup`.
pub fn tag_tokens(markup: &str) -> Vec<String> {
    let mut tokens: Vec<String> = tag_regex()
        .find_iter(markup)
        .map(|m| m.as_str().to_string())
        .collect();
    tokens.sort();
    tokens
}

/// Multiset equality of tag tokens between two fragments.
pub fn tags_match(original: &str, translated: &str) -> bool {
    tag_tokens(original) == tag_tokens(translated)
}

/// Strip a leading ```` ```html ```` fence and a trailing ```` ``` ````
/// that models like to wrap raw markup in.
pub fn strip_code_fence(markup: &str) -> &str {
    let mut text = markup.trim();
    for opener in ["```html", "```"] {
        if let Some(rest) = text.strip_prefix(opener) {
            text = rest;
            break;
        }
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
