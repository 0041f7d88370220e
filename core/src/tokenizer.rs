use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\w+").expect("valid regex");
}

/// Tokenize text into lowercase word tokens after NFKC normalization.
/// Punctuation and whitespace only separate tokens; nothing else is dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    if text.is_empty() { return Vec::new(); }
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    RE.find_iter(&normalized).map(|m| m.as_str().to_string()).collect()
}

/// Occurrence count of every token in `text`.
pub fn term_counts(text: &str) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Paris, the CAPITAL of France!");
        assert_eq!(t, vec!["paris", "the", "capital", "of", "france"]);
    }

    #[test]
    fn counts_repeats() {
        let c = term_counts("cat cat fish");
        assert_eq!(c["cat"], 2);
        assert_eq!(c["fish"], 1);
    }
}
