//! Text normalization shared by the orchestrator, the engine and rule learning.
//!
//! Two forms exist:
//! - *collapsed*: surrounding whitespace trimmed, internal runs of whitespace
//!   replaced by a single space. Applied to every inbound message.
//! - *canonical*: collapsed, lower-cased, with the engine punctuation class
//!   removed. Triggers are stored in this form and input is matched in it.

use regex::Regex;
use std::sync::LazyLock;

/// Punctuation the engine strips before matching.
pub const DEFAULT_PUNCTUATION: &str = r#"[.,!?;:"@]"#;

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_PUNCTUATION).expect("static regex"));

/// The default engine punctuation class.
pub fn default_punctuation() -> &'static Regex {
    &PUNCTUATION
}

/// Trim and collapse whitespace runs to single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    SPACES.replace_all(text.trim(), " ").into_owned()
}

/// Canonical form used for triggers and matched input.
pub fn canonicalize(text: &str, punctuation: &Regex) -> String {
    let lowered = text.to_lowercase();
    let stripped = punctuation.replace_all(&lowered, "");
    collapse_whitespace(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_trims_and_squeezes() {
        assert_eq!(collapse_whitespace("  what \t about\n\ntomorrow  "), "what about tomorrow");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn canonicalize_matches_learned_and_runtime_forms() {
        let p = default_punctuation();
        assert_eq!(canonicalize("  Hello   World! ", p), "hello world");
        assert_eq!(canonicalize("hello world", p), "hello world");
    }

    #[test]
    fn canonicalize_removes_only_engine_punctuation() {
        let p = default_punctuation();
        assert_eq!(canonicalize("Mail me @ \"home\", ok?", p), "mail me home ok");
        // Apostrophes and hyphens are not in the class.
        assert_eq!(canonicalize("It's self-made", p), "it's self-made");
    }

    #[test]
    fn canonicalize_collapses_gaps_left_by_punctuation() {
        let p = default_punctuation();
        assert_eq!(canonicalize("a . b", p), "a b");
    }
}
