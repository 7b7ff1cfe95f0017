//! Text assembly helpers for transcript and translation content.

/// Punctuation that clings to the preceding word (no space before it).
fn is_clinging_punctuation(c: char) -> bool {
    matches!(c, ',' | '.' | '!' | '?' | ';' | ':')
}

/// Remove a single space before clinging punctuation, e.g. `"hi , there"` →
/// `"hi, there"`.
pub fn collapse_space_before_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_clinging_punctuation(c) && out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
    }
    out
}

/// Join recognition pieces into display text: single spaces between words,
/// punctuation attached to the preceding word, surrounding whitespace
/// trimmed.
pub fn join_content<'a, I>(pieces: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut joined = String::new();
    for piece in pieces {
        if piece.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(piece);
    }
    collapse_space_before_punctuation(joined.trim())
}

/// Append `addition` to `existing` as a continuation of the same speaker
/// turn.
pub fn merge_text(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        return addition.to_string();
    }
    if addition.is_empty() {
        return existing.to_string();
    }
    collapse_space_before_punctuation(&format!("{existing} {addition}"))
}

/// Language-agnostic cleanup of stutter artifacts in machine translations:
/// drops immediately repeated words and collapses A-B-A-B-A echo patterns
/// down to A-B. Comparison is case-insensitive; original casing is kept.
pub fn clean_repeated_words(text: &str) -> String {
    if text.len() <= 5 {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let mut result: Vec<&str> = Vec::with_capacity(words.len());

    let mut i = 0;
    while i < words.len() {
        let current = &lowered[i];

        // Exact immediate repetition
        if i > 0 && *current == lowered[i - 1] {
            i += 1;
            continue;
        }

        // A B A B A echo → keep only the leading A B
        if i >= 2 && *current == lowered[i - 2] {
            let middle = &lowered[i - 1];
            if middle != current
                && i + 2 < words.len()
                && lowered[i + 1] == *middle
                && lowered[i + 2] == *current
            {
                i += 3;
                continue;
            }
        }

        result.push(words[i]);
        i += 1;
    }

    result.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_attaches_punctuation_to_previous_word() {
        let pieces = ["hello", ",", "world", "!"];
        assert_eq!(join_content(pieces), "hello, world!");
    }

    #[test]
    fn join_skips_empty_pieces() {
        let pieces = ["one", "", "two"];
        assert_eq!(join_content(pieces), "one two");
    }

    #[test]
    fn merge_handles_leading_punctuation() {
        assert_eq!(merge_text("so far", ", and then"), "so far, and then");
        assert_eq!(merge_text("", "start"), "start");
        assert_eq!(merge_text("keep", ""), "keep");
    }

    #[test]
    fn repeated_word_cleanup_drops_immediate_duplicates() {
        assert_eq!(
            clean_repeated_words("the the meeting starts starts now"),
            "the meeting starts now"
        );
    }

    #[test]
    fn repeated_word_cleanup_collapses_echo_patterns() {
        assert_eq!(clean_repeated_words("yes no yes no yes"), "yes no");
    }

    #[test]
    fn repeated_word_cleanup_leaves_short_text_alone() {
        assert_eq!(clean_repeated_words("a a"), "a a");
    }

    #[test]
    fn repeated_word_cleanup_is_case_insensitive_but_preserves_casing() {
        assert_eq!(clean_repeated_words("Hello hello out there"), "Hello out there");
    }
}
