//! Content normalization, hashing, and similarity for the UAOS core (C1).
//!
//! Uses a SHA-256-over-a-normalized-byte-representation content hash,
//! generalized to the paragraph/line granularity the persona harvest and
//! cluster discoverer components need.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;
use uaos_types::ContentHash;

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

/// Zero-width code points stripped during normalization: ZWSP, ZWNJ, ZWJ,
/// BOM/zero-width-no-break-space, and the word joiner.
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{2060}')
}

fn fold_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Normalize text to a canonical form: NFC, strip zero-width code points,
/// fold CRLF/CR to LF, trim, lowercase, collapse whitespace runs to a single
/// space. Hashing is byte-exact on the UTF-8 encoding of this output.
pub fn normalize(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let stripped: String = nfc.chars().filter(|c| !is_zero_width(*c)).collect();
    let folded = fold_line_endings(&stripped);
    let trimmed = folded.trim();
    let lower = trimmed.to_lowercase();
    collapse_whitespace(&lower)
}

/// SHA-256 of `normalize(text)`, hex-encoded.
pub fn hash_text(text: &str) -> ContentHash {
    uaos_types::sha256_hex(normalize(text).as_bytes())
}

/// Options controlling paragraph/line extraction in [`hash_content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHashOptions {
    pub min_paragraph_words: usize,
    pub min_line_chars: usize,
    pub max_line_text_length: usize,
}

impl Default for ContentHashOptions {
    fn default() -> Self {
        Self {
            min_paragraph_words: 5,
            min_line_chars: 10,
            max_line_text_length: 100,
        }
    }
}

/// A hashed paragraph with its position (0-based character offset into the
/// line-ending-folded text) and length in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphHash {
    pub hash: ContentHash,
    pub position: usize,
    pub length: usize,
    pub word_count: usize,
}

/// A hashed line, with text truncated to `max_line_text_length`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineHash {
    pub hash: ContentHash,
    pub position: usize,
    pub text: String,
}

/// Aggregate stats over all extracted paragraphs/lines (not just those kept
/// after the minimum-size filters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStats {
    pub paragraph_count: usize,
    pub line_count: usize,
    pub char_count: usize,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHashResult {
    pub paragraph_hashes: Vec<ParagraphHash>,
    pub line_hashes: Vec<LineHash>,
    pub stats: ContentStats,
}

/// Split `text` into paragraphs (runs of two-or-more newlines delimit them)
/// and lines (single newline), hash the ones meeting the minimum-size
/// filters, and report aggregate stats over every paragraph/line found.
pub fn hash_content(text: &str, opts: &ContentHashOptions) -> ContentHashResult {
    let folded = fold_line_endings(text);

    let mut paragraph_hashes = Vec::new();
    let mut paragraph_count = 0;
    for (byte_start, raw) in split_paragraphs(&folded) {
        if raw.is_empty() {
            continue;
        }
        paragraph_count += 1;
        let word_count = raw.split_whitespace().count();
        if word_count >= opts.min_paragraph_words {
            let position = folded[..byte_start].chars().count();
            paragraph_hashes.push(ParagraphHash {
                hash: hash_text(raw),
                position,
                length: raw.chars().count(),
                word_count,
            });
        }
    }

    let mut line_hashes = Vec::new();
    let mut line_count = 0;
    let mut line_pos = 0usize;
    for line in folded.split('\n') {
        line_count += 1;
        let char_len = line.chars().count();
        if char_len >= opts.min_line_chars {
            let truncated: String = line.chars().take(opts.max_line_text_length).collect();
            line_hashes.push(LineHash {
                hash: hash_text(line),
                position: line_pos,
                text: truncated,
            });
        }
        line_pos += char_len + 1; // +1 for the newline consumed between lines
    }

    let char_count = folded.chars().count();
    let word_count = folded.split_whitespace().count();

    ContentHashResult {
        paragraph_hashes,
        line_hashes,
        stats: ContentStats {
            paragraph_count,
            line_count,
            char_count,
            word_count,
        },
    }
}

/// Split `text` on runs of two-or-more newlines, returning each paragraph's
/// byte offset into `text` alongside its (trimmed) slice.
fn split_paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for m in PARAGRAPH_BREAK.find_iter(text) {
        let chunk = &text[cursor..m.start()];
        out.push((cursor, chunk));
        cursor = m.end();
    }
    out.push((cursor, &text[cursor..]));
    out
}

/// Jaccard similarity over the unique hash sets of two already-hashed
/// contents (paragraph or line hashes, or any hash multiset). Both empty
/// collections compare equal (similarity 1.0); exactly one empty compares
/// completely dissimilar (0.0).
pub fn similarity<'a, I>(a: I, b: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    let set_a: std::collections::HashSet<&str> = a.into_iter().collect();
    let set_b: std::collections::HashSet<&str> = b.into_iter().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Convenience similarity over raw hash count maps (e.g. keyword frequency
/// tables), counting shared keys once each (Jaccard over the key sets, not
/// weighted by count).
pub fn similarity_counts(a: &HashMap<String, usize>, b: &HashMap<String, usize>) -> f64 {
    similarity(a.keys().map(|s| s.as_str()), b.keys().map(|s| s.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_zero_width_and_case() {
        let a = normalize("Hello\u{200B} World");
        let b = normalize("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_folds_crlf() {
        assert_eq!(normalize("a\r\nb"), normalize("a\nb"));
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("a    b\t\tc"), "a b c");
    }

    #[test]
    fn hash_text_stable_under_whitespace_and_case() {
        let h1 = hash_text("  Hello   World  ");
        let h2 = hash_text("hello world");
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_text_matches_normalized_input() {
        let text = "Some Text\r\nWith CRLF";
        assert_eq!(hash_text(text), hash_text(&normalize(text)));
    }

    #[test]
    fn paragraphs_below_min_words_are_omitted() {
        let text = "short one\n\nThis paragraph definitely has more than five words in it.";
        let result = hash_content(text, &ContentHashOptions::default());
        assert_eq!(result.paragraph_hashes.len(), 1);
        assert_eq!(result.stats.paragraph_count, 2);
    }

    #[test]
    fn lines_below_min_chars_are_omitted() {
        let text = "short\nthis line is long enough to keep";
        let result = hash_content(text, &ContentHashOptions::default());
        assert_eq!(result.line_hashes.len(), 1);
        assert_eq!(result.stats.line_count, 2);
    }

    #[test]
    fn line_text_is_truncated() {
        let opts = ContentHashOptions {
            max_line_text_length: 5,
            min_line_chars: 1,
            ..Default::default()
        };
        let result = hash_content("abcdefghij", &opts);
        assert_eq!(result.line_hashes[0].text, "abcde");
    }

    #[test]
    fn similarity_both_empty_is_one() {
        let empty: Vec<&str> = vec![];
        assert_eq!(similarity(empty.clone(), empty), 1.0);
    }

    #[test]
    fn similarity_one_empty_is_zero() {
        let empty: Vec<&str> = vec![];
        assert_eq!(similarity(vec!["a"], empty), 0.0);
    }

    #[test]
    fn similarity_jaccard() {
        assert_eq!(similarity(vec!["a", "b", "c"], vec!["b", "c", "d"]), 0.5);
    }

    #[test]
    fn similarity_identical_is_one() {
        assert_eq!(similarity(vec!["a", "b"], vec!["a", "b"]), 1.0);
    }

    proptest::proptest! {
        #[test]
        fn normalize_is_idempotent(s in ".*") {
            proptest::prop_assert_eq!(normalize(&normalize(&s)), normalize(&s));
        }

        #[test]
        fn hash_text_matches_hash_of_its_own_normalization(s in ".*") {
            proptest::prop_assert_eq!(hash_text(&s), hash_text(&normalize(&s)));
        }
    }
}
