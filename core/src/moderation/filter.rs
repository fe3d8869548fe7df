/// Lexical flagged-term filter
use crate::moderation::normalize::{normalize, normalize_term};

/// Default community term list
pub const DEFAULT_TERMS: &[&str] = &[
    "spam", "scam", "fake", "toxic", "noob", "trash", "garbage", "idiot", "stupid", "moron",
    "loser", "ez", "rekt", "pwned", "git gud",
];

/// Matched region of the original text, in char indices (end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct TermFilter {
    /// Normalized terms, longest first so the widest match wins
    terms: Vec<Vec<char>>,
}

impl TermFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<Vec<char>> = terms
            .into_iter()
            .map(|t| normalize_term(t.as_ref()).chars().collect::<Vec<_>>())
            .filter(|t| !t.is_empty())
            .collect();
        normalized.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        normalized.dedup();
        Self { terms: normalized }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Every flagged span in `text`, left to right, non-overlapping.
    /// A span must start and end on a word boundary of the original text.
    pub fn find_spans(&self, text: &str) -> Vec<Span> {
        let original: Vec<char> = text.chars().collect();
        let normalized = normalize(text);
        let norm = &normalized.chars;
        let origin = &normalized.origin;

        let mut spans = Vec::new();
        let mut i = 0;
        while i < norm.len() {
            let start = origin[i];
            let first_of_char = i == 0 || origin[i - 1] != start;
            let word_start = start == 0 || !original[start - 1].is_alphanumeric();

            if first_of_char && word_start {
                let matched = self.terms.iter().find_map(|term| {
                    let stop = i + term.len();
                    if stop > norm.len() || norm[i..stop] != term[..] {
                        return None;
                    }
                    let last = origin[stop - 1];
                    let last_of_char = stop == norm.len() || origin[stop] != last;
                    let word_end = last + 1 == original.len() || !original[last + 1].is_alphanumeric();
                    (last_of_char && word_end).then_some((term.len(), last + 1))
                });

                if let Some((consumed, end)) = matched {
                    spans.push(Span { start, end });
                    i += consumed;
                    continue;
                }
            }
            i += 1;
        }

        spans
    }
}

/// Replace every span with a same-length run of `*`
pub fn redact(text: &str, spans: &[Span]) -> String {
    text.chars()
        .enumerate()
        .map(|(index, c)| {
            if spans.iter().any(|s| index >= s.start && index < s.end) {
                '*'
            } else {
                c
            }
        })
        .collect()
}
