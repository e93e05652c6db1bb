//! Cell normalisation: deterministic cleanup of transcribed cell strings.
//!
//! Vision models copy what they see, and what they see in a PDF often
//! includes typographic ligatures, soft hyphens and zero-width characters
//! inherited from the text layer the prompt shows them. The pipeline hands
//! every surviving table to a [`CellNormalizer`] as an opaque post-pass;
//! [`TextCleaner`] is the default.
//!
//! Rules (applied in order):
//! 1. Expand typographic ligatures (ﬁ → fi, ﬀ → ff, …)
//! 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphen, word joiner)
//! 3. Replace control characters (tabs, newlines, C0/C1) with spaces
//! 4. Collapse whitespace runs and trim

use once_cell::sync::Lazy;
use regex::Regex;

/// Post-pass applied to every cell string of a surviving table.
pub trait CellNormalizer: Send + Sync {
    fn normalize(&self, cell: &str) -> String;

    fn normalize_row(&self, row: &[String]) -> Vec<String> {
        row.iter().map(|c| self.normalize(c)).collect()
    }
}

/// Default [`CellNormalizer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCleaner;

impl CellNormalizer for TextCleaner {
    fn normalize(&self, cell: &str) -> String {
        let s = expand_ligatures(cell);
        let s = remove_invisible_chars(&s);
        let s = replace_control_chars(&s);
        collapse_whitespace(&s)
    }
}

// ── Rule 1: Ligatures ────────────────────────────────────────────────────────

const LIGATURES: [(char, &str); 7] = [
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

fn expand_ligatures(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == ch) {
            Some((_, expansion)) => out.push_str(expansion),
            None => out.push(ch),
        }
    }
    out
}

// ── Rule 2: Invisible characters ─────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(*c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'))
        .collect()
}

// ── Rule 3: Control characters ───────────────────────────────────────────────

fn replace_control_chars(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

// ── Rule 4: Whitespace ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").into_owned()
}
