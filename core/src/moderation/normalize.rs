//! Text normalization for obfuscation-resistant matching
//!
//! Lower-cases, maps leetspeak look-alikes to letters and drops separator
//! characters, while remembering which original character each normalized
//! character came from so matches can be redacted on the original text.

/// Normalized view of an input string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub chars: Vec<char>,
    /// Index into the original `chars()` sequence for each normalized char
    pub origin: Vec<usize>,
}

impl Normalized {
    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Leetspeak substitution for a single lower-cased character
pub fn unleet(c: char) -> char {
    match c {
        '4' | '@' => 'a',
        '3' | '€' => 'e',
        '1' | '!' | '|' => 'i',
        '0' => 'o',
        '5' | '$' => 's',
        '7' => 't',
        other => other,
    }
}

pub fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '_' | '.')
}

pub fn normalize(text: &str) -> Normalized {
    let mut chars = Vec::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());

    for (index, c) in text.chars().enumerate() {
        if is_separator(c) {
            continue;
        }
        for lower in c.to_lowercase() {
            chars.push(unleet(lower));
            origin.push(index);
        }
    }

    Normalized { chars, origin }
}

/// Normalize a flagged term the same way input is normalized
pub fn normalize_term(term: &str) -> String {
    normalize(term).as_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leetspeak() {
        assert_eq!(normalize("SP4M").as_string(), "spam");
        assert_eq!(normalize("$c@m").as_string(), "scam");
        assert_eq!(normalize("7r45h").as_string(), "trash");
        assert_eq!(normalize("m0r0n").as_string(), "moron");
        assert_eq!(normalize("st|_|p1d").as_string(), "stiipid");
    }

    #[test]
    fn test_separators_collapse() {
        assert_eq!(normalize("s p-a_m.").as_string(), "spam");
        assert_eq!(normalize_term("git gud"), "gitgud");
    }

    #[test]
    fn test_origin_points_at_original_chars() {
        let normalized = normalize("a b");
        assert_eq!(normalized.chars, vec!['a', 'b']);
        assert_eq!(normalized.origin, vec![0, 2]);
    }
}
