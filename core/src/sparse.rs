//! Term-frequency candidate scoring over the presence index.

use crate::corpus::Corpus;
use crate::tokenizer::{term_counts, tokenize};
use crate::{DocumentId, InvertedIndex, RankedList};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
pub struct ScorerConfig {
    pub top_n: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self { Self { top_n: 100 } }
}

/// Scored candidates, best first. A document is a candidate when it contains any query token;
/// its score is the summed occurrence count of every query token in its text.
/// Equal scores are ordered by document ID ascending.
pub fn score_candidates(query: &str, index: &InvertedIndex, corpus: &Corpus, top_n: usize) -> Vec<(DocumentId, u32)> {
    let q_tokens = tokenize(query);
    if q_tokens.is_empty() { return Vec::new(); }

    let mut scored: Vec<(DocumentId, u32)> = Vec::new();
    for doc_id in index.candidates(&q_tokens) {
        // Index and corpus disagree only when the corpus changed after the build.
        let Some(text) = corpus.get(doc_id) else {
            tracing::warn!(%doc_id, "candidate missing from corpus, skipping");
            continue;
        };
        let counts = term_counts(text);
        let score: u32 = q_tokens.iter().map(|t| counts.get(t).copied().unwrap_or(0)).sum();
        scored.push((doc_id.clone(), score));
    }
    scored.sort_by(|a, b| match b.1.cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored.truncate(top_n);
    scored
}

pub fn score(query: &str, index: &InvertedIndex, corpus: &Corpus, top_n: usize) -> RankedList {
    score_candidates(query, index, corpus, top_n).into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(pairs: &[(&str, &str)]) -> (InvertedIndex, Corpus) {
        let corpus: Corpus = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        (InvertedIndex::build(&corpus), corpus)
    }

    #[test]
    fn ranks_by_term_frequency() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "cat cat fish")]);
        assert_eq!(score("cat", &index, &corpus, 10), vec!["d2", "d1"]);
    }

    #[test]
    fn any_matching_token_makes_a_candidate() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "fish"), ("d3", "bird")]);
        let got = score_candidates("Dog or fish?", &index, &corpus, 10);
        assert_eq!(got, vec![("d1".to_string(), 1), ("d2".to_string(), 1)]);
    }

    #[test]
    fn ties_break_by_id_and_truncate() {
        let (index, corpus) = setup(&[("b", "sun"), ("a", "sun"), ("c", "sun sun")]);
        assert_eq!(score("sun", &index, &corpus, 2), vec!["c", "a"]);
    }

    #[test]
    fn no_known_token_is_empty() {
        let (index, corpus) = setup(&[("d1", "cat dog")]);
        assert!(score("zebra", &index, &corpus, 10).is_empty());
        assert!(score("", &index, &corpus, 10).is_empty());
    }
}
