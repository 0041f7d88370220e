//! Weighted lexical scorers over the presence index: Okapi BM25 and TF-IDF cosine.
//!
//! Document frequencies are posting-set sizes. Term frequencies and document lengths are
//! recomputed from corpus text for each candidate, the same way the term-frequency scorer does.

use crate::corpus::Corpus;
use crate::tokenizer::{term_counts, tokenize};
use crate::{DocumentId, InvertedIndex};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: BM25_K1, b: BM25_B } }
}

/// BM25 with the corpus-wide average document length, computed once per corpus.
#[derive(Debug, Clone)]
pub struct Bm25 {
    params: Bm25Params,
    avg_doc_len: f64,
}

impl Bm25 {
    pub fn new(corpus: &Corpus, params: Bm25Params) -> Self {
        let total: usize = corpus.values().map(|text| tokenize(text).len()).sum();
        let avg_doc_len = if corpus.is_empty() { 0.0 } else { total as f64 / corpus.len() as f64 };
        tracing::debug!(num_docs = corpus.len(), avg_doc_len, "bm25 statistics ready");
        Self { params, avg_doc_len }
    }

    pub fn avg_doc_len(&self) -> f64 { self.avg_doc_len }

    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`, positive even for terms in every document.
    pub fn idf(num_docs: u32, df: usize) -> f64 {
        let (n, df) = (num_docs as f64, df as f64);
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Candidates are documents holding any query token. Repeated query tokens count again.
    pub fn score_candidates(&self, query: &str, index: &InvertedIndex, corpus: &Corpus, top_n: usize) -> Vec<(DocumentId, f64)> {
        let q_tokens = tokenize(query);
        if q_tokens.is_empty() { return Vec::new(); }
        let idf: HashMap<&str, f64> = q_tokens
            .iter()
            .map(|t| (t.as_str(), Self::idf(index.num_docs, index.document_frequency(t))))
            .collect();
        let Bm25Params { k1, b } = self.params;

        let mut scored = Vec::new();
        for doc_id in index.candidates(&q_tokens) {
            let Some(text) = corpus.get(doc_id) else {
                tracing::warn!(%doc_id, "candidate missing from corpus, skipping");
                continue;
            };
            let counts = term_counts(text);
            let doc_len: u32 = counts.values().sum();
            let rel_len = if self.avg_doc_len > 0.0 { doc_len as f64 / self.avg_doc_len } else { 1.0 };
            let norm = k1 * (1.0 - b + b * rel_len);
            let score: f64 = q_tokens
                .iter()
                .map(|t| {
                    let tf = counts.get(t).copied().unwrap_or(0) as f64;
                    idf[t.as_str()] * tf * (k1 + 1.0) / (tf + norm)
                })
                .sum();
            scored.push((doc_id.clone(), score));
        }
        best_first(scored, top_n)
    }
}

/// `ln(N / df)`; zero for terms in every document and for unknown terms.
pub fn tfidf_idf(num_docs: u32, df: usize) -> f64 {
    if df == 0 { return 0.0; }
    (num_docs as f64 / df as f64).ln()
}

fn tfidf_weights(counts: &HashMap<String, u32>, index: &InvertedIndex) -> HashMap<String, f64> {
    let len: u32 = counts.values().sum();
    if len == 0 { return HashMap::new(); }
    counts
        .iter()
        .map(|(t, &c)| (t.clone(), c as f64 / len as f64 * tfidf_idf(index.num_docs, index.document_frequency(t))))
        .collect()
}

/// Cosine similarity between length-normalised TF-IDF vectors of the query and each candidate.
/// Candidates with zero similarity are dropped.
pub fn tfidf_score_candidates(query: &str, index: &InvertedIndex, corpus: &Corpus, top_n: usize) -> Vec<(DocumentId, f64)> {
    let q_counts = term_counts(query);
    let q_weights = tfidf_weights(&q_counts, index);
    let q_norm = q_weights.values().map(|w| w * w).sum::<f64>().sqrt();
    if q_norm == 0.0 { return Vec::new(); }

    let q_tokens: Vec<String> = q_counts.into_keys().collect();
    let mut scored = Vec::new();
    for doc_id in index.candidates(&q_tokens) {
        let Some(text) = corpus.get(doc_id) else {
            tracing::warn!(%doc_id, "candidate missing from corpus, skipping");
            continue;
        };
        let d_weights = tfidf_weights(&term_counts(text), index);
        let d_norm = d_weights.values().map(|w| w * w).sum::<f64>().sqrt();
        if d_norm == 0.0 { continue; }
        let dot: f64 = q_weights.iter().map(|(t, w)| w * d_weights.get(t).copied().unwrap_or(0.0)).sum();
        let cosine = dot / (q_norm * d_norm);
        if cosine > 0.0 { scored.push((doc_id.clone(), cosine)); }
    }
    best_first(scored, top_n)
}

/// Score descending, then document ID ascending.
fn best_first(mut scored: Vec<(DocumentId, f64)>, top_n: usize) -> Vec<(DocumentId, f64)> {
    scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    scored.truncate(top_n);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(pairs: &[(&str, &str)]) -> (InvertedIndex, Corpus) {
        let corpus: Corpus = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        (InvertedIndex::build(&corpus), corpus)
    }

    fn ids(scored: &[(DocumentId, f64)]) -> Vec<&str> {
        scored.iter().map(|(d, _)| d.as_str()).collect()
    }

    #[test]
    fn bm25_prefers_higher_frequency() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "bird")]);
        let bm25 = Bm25::new(&corpus, Bm25Params::default());
        assert!((bm25.avg_doc_len() - 2.0).abs() < 1e-12);
        assert_eq!(ids(&bm25.score_candidates("cat", &index, &corpus, 10)), vec!["d2", "d1"]);
    }

    #[test]
    fn bm25_favours_shorter_documents_for_equally_rare_terms() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "cat cat fish"), ("d3", "bird")]);
        let bm25 = Bm25::new(&corpus, Bm25Params::default());
        let scored = bm25.score_candidates("dog fish", &index, &corpus, 10);
        assert_eq!(ids(&scored), vec!["d1", "d2"]);
        assert!(scored.iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn bm25_idf_stays_positive() {
        assert!(Bm25::idf(3, 3) > 0.0);
        assert!(Bm25::idf(3, 1) > Bm25::idf(3, 2));
    }

    #[test]
    fn tfidf_ranks_by_cosine() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "dog fish fish"), ("d3", "bird")]);
        let scored = tfidf_score_candidates("dog", &index, &corpus, 10);
        assert_eq!(ids(&scored), vec!["d1", "d2"]);
        assert!(scored[0].1 <= 1.0);
    }

    #[test]
    fn tfidf_ignores_terms_present_everywhere() {
        let (index, corpus) = setup(&[("d1", "cat dog"), ("d2", "cat fish")]);
        assert!(tfidf_score_candidates("cat", &index, &corpus, 10).is_empty());
        assert_eq!(ids(&tfidf_score_candidates("cat dog", &index, &corpus, 10)), vec!["d1"]);
    }

    #[test]
    fn truncates_to_top_n() {
        let (index, corpus) = setup(&[("a", "x"), ("b", "x"), ("c", "x y")]);
        let bm25 = Bm25::new(&corpus, Bm25Params::default());
        assert_eq!(bm25.score_candidates("x", &index, &corpus, 2).len(), 2);
    }
}
