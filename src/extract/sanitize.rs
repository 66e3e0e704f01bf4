//! Text sanitization for extracted markup.
//!
//! All text leaving an extractor goes through [`sanitize_text`]. Composer
//! contents additionally go through [`sanitize_composer_text`], which removes
//! the placeholder and hint phrases the host renders inside empty editors.

use lazy_static::lazy_static;
use regex::Regex;

/// Zero-width and invisible formatting characters the host sprinkles into text
const ZERO_WIDTH: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

lazy_static! {
    // Embedded tags that leak into text content (e.g. from aria labels)
    static ref TAG: Regex = Regex::new(r"</?[a-zA-Z][^>]*>").unwrap();

    // Placeholder and drag-and-drop hint phrases rendered inside empty composers.
    // Placeholders only ever lead the text; the drop hints can trail it.
    static ref PLACEHOLDERS: Vec<Regex> = vec![
        Regex::new(r"(?i)^write a message(?:…|\.\.\.|$)").unwrap(),
        Regex::new(r"(?i)drag your file here\.?").unwrap(),
        Regex::new(r"(?i)select your file").unwrap(),
        Regex::new(r"(?i)^add a comment(?:…|\.\.\.|$)").unwrap(),
        Regex::new(r"(?i)^start a post$").unwrap(),
        Regex::new(r"(?i)^ex: we know each other from(?:…|\.\.\.)?").unwrap(),
    ];
}

/// Strip zero-width characters and embedded tags, then collapse whitespace.
///
/// Idempotent: `sanitize_text(&sanitize_text(s)) == sanitize_text(s)`.
pub fn sanitize_text(input: &str) -> String {
    let visible: String = input.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect();

    // Tags become spaces so neighbours never fuse into a new tag
    let mut text = visible;
    loop {
        let stripped = TAG.replace_all(&text, " ").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitize composer contents, treating placeholder text as empty.
///
/// Placeholders are removed until none remain, so a string made only of
/// placeholder phrases yields `""`.
pub fn sanitize_composer_text(input: &str) -> String {
    let mut text = sanitize_text(input);
    loop {
        let mut stripped = text.clone();
        for pattern in PLACEHOLDERS.iter() {
            stripped = pattern.replace_all(&stripped, " ").into_owned();
        }
        let stripped = sanitize_text(&stripped);
        if stripped == text {
            return text;
        }
        text = stripped;
    }
}

/// Whether `input` is nothing but placeholder text (or blank)
pub fn is_placeholder(input: &str) -> bool {
    sanitize_composer_text(input).is_empty()
}

/// Lowercased, sanitized form used to compare user text across renders
pub fn normalize_for_match(input: &str) -> String {
    sanitize_text(input).to_lowercase()
}

/// First `max_chars` characters of `input`, on a char boundary
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}
