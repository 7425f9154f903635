//! Defense-in-depth sanitization for user-supplied text.
//!
//! Every string that enters the graph store passes through [`sanitize_text`]
//! before parameter binding: NFC normalization, control-character removal
//! (tab and newline excepted), and a per-field length cap. Bound parameters
//! are the primary injection defense; [`escape_literal`] exists for the rare
//! value that must be spliced as a literal.

use unicode_normalization::UnicodeNormalization;

/// Default length caps per field family.
pub const MAX_STATEMENT_LEN: usize = 400;
pub const MAX_EVIDENCE_LEN: usize = 800;
pub const MAX_FILE_PATH_LEN: usize = 240;
pub const MAX_NAME_LEN: usize = 80;

/// Normalize, strip control characters, and cap a text field.
pub fn sanitize_text(input: &str, max_len: usize) -> String {
    let normalized: String = input
        .nfc()
        .filter(|c| !c.is_control() || *c == '\t' || *c == '\n')
        .collect();

    if normalized.chars().count() <= max_len {
        return normalized;
    }
    normalized.chars().take(max_len).collect()
}

/// Sanitize each element of a string list with a shared cap.
pub fn sanitize_list(items: &[String], max_len: usize) -> Vec<String> {
    items.iter().map(|s| sanitize_text(s, max_len)).collect()
}

/// Escape a value for inclusion as a quoted literal in a query fragment.
///
/// Backslash and double-quote only; anything else is expected to have been
/// removed by [`sanitize_text`] first.
pub fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_control_chars_keeps_tab_newline() {
        let dirty = "line1\nline2\tok\u{0000}\u{0007}end";
        assert_eq!(sanitize_text(dirty, 100), "line1\nline2\tokend");
    }

    #[test]
    fn test_caps_length_by_chars() {
        let s = "a".repeat(500);
        assert_eq!(sanitize_text(&s, MAX_STATEMENT_LEN).len(), 400);
    }

    #[test]
    fn test_nfc_normalization() {
        // "e" + combining acute accent collapses to the precomposed form.
        let decomposed = "caf\u{0065}\u{0301}";
        assert_eq!(sanitize_text(decomposed, 100), "caf\u{00e9}");
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal(r#"say "hi"\now"#), r#"say \"hi\"\\now"#);
    }

    #[test]
    fn test_sanitize_list() {
        let items = vec!["ok".to_string(), "x".repeat(10)];
        let out = sanitize_list(&items, 4);
        assert_eq!(out, vec!["ok".to_string(), "xxxx".to_string()]);
    }

    proptest! {
        #[test]
        fn sanitized_text_never_exceeds_cap(s in ".{0,600}", cap in 1usize..500) {
            let out = sanitize_text(&s, cap);
            prop_assert!(out.chars().count() <= cap);
        }

        #[test]
        fn sanitized_text_has_no_bare_control_chars(s in "\\PC{0,200}") {
            let out = sanitize_text(&s, 400);
            prop_assert!(out.chars().all(|c| !c.is_control() || c == '\t' || c == '\n'));
        }

        #[test]
        fn sanitize_is_idempotent(s in ".{0,300}") {
            let once = sanitize_text(&s, 200);
            let twice = sanitize_text(&once, 200);
            prop_assert_eq!(once, twice);
        }
    }
}
