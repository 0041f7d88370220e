use crate::corpus::Corpus;
use crate::tokenizer::tokenize;
use crate::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Token presence index. A document sits under a token iff its text contains the token at
/// least once; frequencies are recomputed from the corpus at scoring time.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub postings: BTreeMap<String, BTreeSet<DocumentId>>,
    pub num_docs: u32,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn build(corpus: &Corpus) -> Self {
        let mut index = Self::new();
        for (doc_id, text) in corpus {
            let unique: HashSet<String> = tokenize(text).into_iter().collect();
            for token in unique {
                index.postings.entry(token).or_default().insert(doc_id.clone());
            }
            index.num_docs += 1;
        }
        tracing::info!(num_docs = index.num_docs, num_terms = index.postings.len(), "built inverted index");
        index
    }

    pub fn posting(&self, token: &str) -> Option<&BTreeSet<DocumentId>> { self.postings.get(token) }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    /// Number of documents containing `token`.
    pub fn document_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map_or(0, |docs| docs.len())
    }

    /// Union of the posting sets of every token (OR semantics).
    pub fn candidates<'a, I>(&self, tokens: I) -> BTreeSet<&DocumentId>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out = BTreeSet::new();
        for token in tokens {
            if let Some(docs) = self.postings.get(token) {
                out.extend(docs.iter());
            }
        }
        out
    }
}
